use std::ptr::NonNull;

use log::debug;

use crate::{
    block::{ALIGNMENT, FreeNode, HEADER_SIZE, Header, Offset},
    error::{Error, Result},
    kernel::{page_size, request_memory, return_memory},
    utils::checked_align,
};

/// The single contiguous range of memory the allocator manages.
///
/// [`crate::kernel::request_memory`] gives as memory regions aligned with the
/// computer page size, so the region always starts on a page boundary and its
/// length is a whole number of pages. Blocks inside of it are identified by
/// their byte [`Offset`] from the start, never by references:
///
/// ```text
///  0                                                              len
///  +--------+---------+--------+------------+--------+-------------+
///  | Header | Payload | Header |  Payload   |  Node  |  (unused)   |
///  +--------+---------+--------+------------+--------+-------------+
///  ^ offset 0          ^ offset 16 + size    ^ free block
/// ```
///
/// Headers and nodes are copied in and out through raw pointers, so no
/// Rust reference ever aliases a payload the user is writing to.
pub(crate) struct Region {
    /// Start of the mapping returned by the kernel.
    base: NonNull<u8>,
    /// Size of the mapping, a multiple of the page size.
    len: usize,
}

impl Region {
    /// Maps `requested` bytes rounded up to the next page.
    pub fn acquire(requested: usize) -> Result<Self> {
        if requested == 0 {
            return Err(Error::InvalidSize);
        }

        let len = checked_align(requested, page_size())
            .ok_or(Error::RegionAcquisitionFailed { size: requested })?;

        let base = unsafe { request_memory(len) }
            .ok_or(Error::RegionAcquisitionFailed { size: len })?;

        debug!("acquired region of {len} bytes at {:p}", base);

        Ok(Self { base, len })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Pointer to the first payload byte of the block at `offset`.
    #[inline]
    pub fn payload(&self, offset: Offset) -> NonNull<u8> {
        debug_assert!(offset + HEADER_SIZE <= self.len);
        unsafe { self.base.add(offset + HEADER_SIZE) }
    }

    /// Finds the block that owns the payload `ptr`. Pointers that can't
    /// have come from this region are reported as corruption, we never
    /// read memory outside of it.
    pub fn block_of(&self, ptr: NonNull<u8>) -> Result<Offset> {
        let addr = ptr.as_ptr() as usize;
        let corrupted = Error::CorruptionDetected { addr };

        let distance = addr
            .checked_sub(self.base().as_ptr() as usize)
            .ok_or(corrupted)?;

        if distance < HEADER_SIZE || distance >= self.len || distance % ALIGNMENT != 0 {
            return Err(corrupted);
        }

        Ok(distance - HEADER_SIZE)
    }

    #[inline]
    pub fn header(&self, offset: Offset) -> Header {
        debug_assert!(offset + HEADER_SIZE <= self.len);
        unsafe { self.base.add(offset).cast::<Header>().read() }
    }

    #[inline]
    pub fn set_header(&mut self, offset: Offset, header: Header) {
        debug_assert!(offset + HEADER_SIZE + header.size <= self.len);
        unsafe { self.base.add(offset).cast::<Header>().write(header) }
    }

    #[inline]
    pub fn node(&self, offset: Offset) -> FreeNode {
        debug_assert!(offset + HEADER_SIZE <= self.len);
        unsafe { self.base.add(offset).cast::<FreeNode>().read() }
    }

    #[inline]
    pub fn set_node(&mut self, offset: Offset, node: FreeNode) {
        debug_assert!(node.end(offset) <= self.len);
        unsafe { self.base.add(offset).cast::<FreeNode>().write(node) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        debug!("returning region of {} bytes at {:p}", self.len, self.base);
        unsafe { return_memory(self.base, self.len) }
    }
}
