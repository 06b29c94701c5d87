//! Error types for the region allocator.
//!
//! Errors come in two tiers. Most of them are recoverable and simply reported
//! back to the caller. [`Error::CorruptionDetected`] and
//! [`Error::DoubleFreeDetected`] mean the bookkeeping inside the region can no
//! longer be trusted; see [`Error::is_fatal`].

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The requested region size was zero.
    #[error("invalid region size: the region must be at least one byte long")]
    InvalidSize,

    /// The process-wide region already exists.
    #[error("memory allocator already initialized")]
    AlreadyInitialized,

    /// The OS refused to map the region.
    #[error("failed to acquire a region of {size} bytes from the OS")]
    RegionAcquisitionFailed {
        /// Page-aligned size that was requested.
        size: usize,
    },

    /// No region has been initialized yet.
    #[error("memory allocator not initialized")]
    NotInitialized,

    /// No free block is big enough for the request.
    #[error("out of memory: no free block can hold {requested} bytes")]
    OutOfMemory {
        /// Payload size requested by the caller.
        requested: usize,
    },

    /// The header in front of a pointer does not carry the live sentinel.
    #[error("memory corruption detected at block {addr:#x}")]
    CorruptionDetected {
        /// Address handed to the allocator.
        addr: usize,
    },

    /// The block is already on the free list.
    #[error("double free detected at block {addr:#x}")]
    DoubleFreeDetected {
        /// Address handed to the allocator.
        addr: usize,
    },
}

impl Error {
    /// Whether continuing after this error risks silent heap damage.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::CorruptionDetected { .. } | Error::DoubleFreeDetected { .. }
        )
    }
}

/// Returned when a [`crate::Strategy`] name can't be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown fit strategy `{0}`, expected one of: best, worst, first, next")]
pub struct ParseStrategyError(pub String);
