//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.


/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// This method is used to round the region size up to a multiple of [`crate::kernel::page_size`]
/// and payload sizes up to a multiple of [`crate::block::ALIGNMENT`], so every block
/// header inside the region stays aligned.
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around when
/// `to_be_aligned` is too close to `usize::MAX`.
pub fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    to_be_aligned
        .checked_add(aligment - 1)
        .map(|value| value & !(aligment - 1))
}
