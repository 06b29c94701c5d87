//! Process-wide allocator.
//!
//! These functions drive a single [`RegionAllocator`] that lives until the
//! process exits. It is created by [`init`] and can't be created again.
//!
//! Unlike the methods of [`RegionAllocator`], [`free`] and [`realloc`] don't
//! return fatal errors: a corrupted header or a double free terminates the
//! process, since carrying on with a damaged free list would silently corrupt
//! the heap.

use std::{
    process,
    ptr::NonNull,
    sync::{Mutex, MutexGuard, PoisonError},
};

use log::{error, info, warn};

use crate::{
    allocator::RegionAllocator,
    error::{Error, Result},
    stats::Stats,
    strategy::Strategy,
};

/// The allocator is single threaded, the lock only makes the static sound.
static ALLOCATOR: Mutex<Option<RegionAllocator>> = Mutex::new(None);

fn lock() -> MutexGuard<'static, Option<RegionAllocator>> {
    ALLOCATOR.lock().unwrap_or_else(PoisonError::into_inner)
}

fn with<T>(f: impl FnOnce(&mut RegionAllocator) -> Result<T>) -> Result<T> {
    lock().as_mut().ok_or(Error::NotInitialized).and_then(f)
}

/// Reports a fatal error and terminates the process.
fn abort(err: Error) -> ! {
    error!("{err}");
    eprintln!("Error: {err}");
    process::exit(1)
}

/// Maps the process-wide region. Only the first successful call does
/// anything, later calls fail with [`Error::AlreadyInitialized`].
pub fn init(region_size: usize, strategy: Strategy) -> Result<()> {
    if region_size == 0 {
        return Err(Error::InvalidSize);
    }

    let mut allocator = lock();

    if allocator.is_some() {
        return Err(Error::AlreadyInitialized);
    }

    *allocator = Some(RegionAllocator::new(region_size, strategy)?);

    Ok(())
}

/// Allocates `size` bytes from the process-wide region. Returns `None` when
/// the allocator isn't initialized or there's no free block big enough.
pub fn alloc(size: usize) -> Option<NonNull<u8>> {
    with(|allocator| allocator.alloc(size))
        .inspect_err(|err| warn!("alloc of {size} bytes failed: {err}"))
        .ok()
}

/// Frees a pointer returned by [`alloc`] or [`realloc`]. `None` does nothing.
///
/// Terminates the process on a corrupted header or a double free.
pub fn free(ptr: Option<NonNull<u8>>) {
    match with(|allocator| allocator.free(ptr)) {
        Ok(()) => {}
        Err(err) if err.is_fatal() => abort(err),
        Err(err) => warn!("free of {ptr:?} ignored: {err}"),
    }
}

/// Resizes the allocation behind `ptr`, see [`RegionAllocator::realloc`].
///
/// Terminates the process on a corrupted header.
pub fn realloc(ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
    match with(|allocator| allocator.realloc(ptr, size)) {
        Ok(new) => new,
        Err(err) if err.is_fatal() => abort(err),
        Err(err) => {
            warn!("realloc of {ptr:?} to {size} bytes failed: {err}");
            None
        }
    }
}

/// Current statistics of the process-wide region. The report is also logged.
pub fn stats() -> Result<Stats> {
    let stats = with(|allocator| Ok(allocator.stats()))?;
    info!("{stats}");

    Ok(stats)
}
