//! # umem - A fixed region memory allocator
//!
//! This crate serves variable size allocations out of a single memory region
//! obtained once from the OS (`mmap` on unix, `VirtualAlloc` on Windows). The
//! region never grows. Freed blocks go back to a free list and are merged
//! with free blocks that touch them in memory.
//!
//! ```text
//!   Region (page aligned, never resized)
//!   +--------+---------+------+--------------+--------+-------+------------+
//!   | Header | payload | Node |     free     | Header | payld |    Node    |
//!   +--------+---------+------+--------------+--------+-------+------------+
//!                         |                                         ^
//!                         +-----------------------------------------+
//!                                free list, threaded through the
//!                                free blocks themselves
//! ```
//!
//! Which free block serves a request is decided by a [`Strategy`]: best fit,
//! worst fit, first fit or next fit.
//!
//! ## Crate Structure
//!
//! ```text
//!   umem
//!   ├── allocator  - RegionAllocator: alloc, free, realloc, stats
//!   ├── global     - process-wide allocator (init, alloc, free, realloc, stats)
//!   ├── strategy   - fit strategies and block selection
//!   ├── freelist   - free list threaded through the region, coalescing
//!   ├── block      - header / free node layout
//!   ├── region     - the mapped region
//!   ├── kernel     - platform memory (mmap / VirtualAlloc)
//!   ├── stats      - counters and fragmentation report
//!   └── error      - error types
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use umem::Strategy;
//!
//! umem::init(64 * 1024, Strategy::BestFit).unwrap();
//!
//! let ptr = umem::alloc(100).unwrap();
//! unsafe { ptr.as_ptr().write_bytes(0xAB, 100) };
//!
//! let ptr = umem::realloc(Some(ptr), 400);
//! umem::free(ptr);
//!
//! println!("{}", umem::stats().unwrap());
//! ```
//!
//! [`RegionAllocator`] offers the same operations on an owned value, so
//! several independent regions can be used side by side and fatal errors are
//! returned instead of terminating the process.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: callers must serialize access.
//! - **Fixed size**: the region is never grown nor returned to the OS early.
//! - **Lazy coalescing**: only blocks next to each other in the free list are
//!   merged, so some neighbours in memory may stay apart for a while.

mod allocator;
mod block;
mod error;
mod freelist;
mod global;
mod kernel;
mod region;
mod stats;
mod strategy;
mod utils;

pub use allocator::RegionAllocator;
pub use block::{ALIGNMENT, HEADER_SIZE};
pub use error::{Error, ParseStrategyError, Result};
pub use global::{alloc, free, init, realloc, stats};
pub use stats::Stats;
pub use strategy::Strategy;
