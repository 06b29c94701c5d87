use std::ptr::{self, NonNull};

use log::{debug, trace};

use crate::{
    block::{ALIGNMENT, HEADER_SIZE, Header, Offset},
    error::{Error, Result},
    freelist::FreeList,
    region::Region,
    stats::{Counters, Stats},
    strategy::{self, Strategy},
    utils::align,
};

/// Allocator serving variable size blocks out of one fixed [`Region`].
///
/// Every block starts with a header of [`HEADER_SIZE`] bytes. While the block
/// is allocated the header holds its size and a sentinel; while it is free the
/// same bytes hold its size and the link to the next free block:
///
/// ```text
///              Free List
///        +-----------------------------------+
///        |                                   v
/// +------|------+--------+-----------+------------+--------+------------+
/// | Node | free | Header | allocated | Node  free | Header | allocated  |
/// +-------------+--------+-----------+------------+--------+------------+
/// ```
///
/// Allocating splits the chosen free block when the leftover is big enough to
/// hold another block. Freeing puts the block back at the head of the free list
/// and merges it with free blocks that touch it in memory.
///
/// The allocator is meant for a single thread. Errors that mean the region
/// bookkeeping was damaged are still returned, see [`Error::is_fatal`].
pub struct RegionAllocator {
    region: Region,
    free_list: FreeList,
    strategy: Strategy,
    counters: Counters,
}

// The region is only reachable through the allocator, moving the allocator
// moves the ownership of every block with it.
unsafe impl Send for RegionAllocator {}

impl RegionAllocator {
    /// Maps a region of at least `region_size` bytes (rounded up to the page
    /// size) and turns it into a single free block.
    pub fn new(region_size: usize, strategy: Strategy) -> Result<Self> {
        let mut region = Region::acquire(region_size)?;
        let free_list = FreeList::new(&mut region);

        debug!(
            "initialized {} bytes with {strategy}, {} bytes usable",
            region.len(),
            region.len() - HEADER_SIZE
        );

        Ok(Self {
            region,
            free_list,
            strategy,
            counters: Counters::default(),
        })
    }

    /// Size of the mapped region, a multiple of the page size.
    #[inline]
    pub fn region_size(&self) -> usize {
        self.region.len()
    }

    #[inline]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Allocates at least `size` bytes and returns a pointer to them. The
    /// pointer is aligned to [`ALIGNMENT`].
    ///
    /// A request of zero bytes is served as an [`ALIGNMENT`] bytes block, so
    /// that it can be told apart from other allocations and freed.
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        let requested = size;

        if requested > self.region.len() {
            return Err(Error::OutOfMemory { requested });
        }

        let size = align(requested.max(1), ALIGNMENT);
        let total = HEADER_SIZE + size;

        let entry = strategy::select(self.strategy, &self.free_list, &self.region, size)
            .ok_or(Error::OutOfMemory { requested })?;

        trace!(
            "{} picked block {:#x} ({} bytes) for {size} bytes",
            self.strategy, entry.offset, entry.node.size
        );

        // Split only if what's left can still be a block of its own.
        let granted = if entry.node.size > size + HEADER_SIZE {
            let rest = entry.offset + total;
            let rest_size = entry.node.size - total;

            self.free_list.replace(&mut self.region, &entry, rest, rest_size);

            debug!(
                "split block {:#x}: {size} bytes used, {rest_size} bytes left at {rest:#x}",
                entry.offset
            );
            size
        } else {
            self.free_list.unlink(&mut self.region, &entry);

            // The whole block goes, including the bytes that didn't fit a node.
            entry.node.size
        };

        // Next search starts at the block that followed the chosen one, never
        // at the leftover of a split.
        if self.strategy == Strategy::NextFit {
            self.free_list.set_rover(entry.node.next());
        }

        self.region.set_header(entry.offset, Header::live(granted));

        self.counters.allocations += 1;
        self.counters.bytes_allocated += granted;

        Ok(self.region.payload(entry.offset))
    }

    /// Gives the block behind `ptr` back to the free list. `None` does
    /// nothing.
    ///
    /// Fails with [`Error::DoubleFreeDetected`] if the block is already free
    /// and with [`Error::CorruptionDetected`] if its header was overwritten or
    /// `ptr` never came from this allocator. In both cases nothing changes.
    pub fn free(&mut self, ptr: Option<NonNull<u8>>) -> Result<()> {
        let Some(ptr) = ptr else {
            return Ok(());
        };

        let (offset, header) = self.live_block(ptr)?;

        self.counters.deallocations += 1;
        self.counters.bytes_allocated -= header.size;

        self.free_list.push_front(&mut self.region, offset, header.size);
        let merges = self.free_list.coalesce(&mut self.region);

        trace!("freed block {offset:#x} ({} bytes), {merges} merges", header.size);

        Ok(())
    }

    /// Resizes the allocation behind `ptr`.
    ///
    /// - `ptr == None` is the same as [`RegionAllocator::alloc`].
    /// - `size == 0` frees `ptr` and returns `None`.
    /// - If the block is already big enough `ptr` comes back unchanged.
    /// - Otherwise the content moves to a new block and the old one is freed.
    ///   If there's no room for the new block the old one stays untouched.
    pub fn realloc(
        &mut self,
        ptr: Option<NonNull<u8>>,
        size: usize,
    ) -> Result<Option<NonNull<u8>>> {
        let Some(old) = ptr else {
            return self.alloc(size).map(Some);
        };

        if size == 0 {
            self.free(Some(old))?;
            return Ok(None);
        }

        let (_, header) = self.live_block(old)?;

        if header.size >= size {
            return Ok(Some(old));
        }

        let new = self.alloc(size)?;

        unsafe {
            ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), header.size);
        }

        self.free(Some(old))?;

        Ok(Some(new))
    }

    /// Number of bytes usable behind `ptr`. Might be more than requested.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize> {
        self.live_block(ptr).map(|(_, header)| header.size)
    }

    pub fn stats(&self) -> Stats {
        Stats::collect(&self.counters, &self.free_list, &self.region)
    }

    /// Checks that `ptr` is the payload of an allocated block of this region.
    fn live_block(&self, ptr: NonNull<u8>) -> Result<(Offset, Header)> {
        let addr = ptr.as_ptr() as usize;
        let offset = self.region.block_of(ptr)?;

        if self.free_list.contains(&self.region, offset) {
            return Err(Error::DoubleFreeDetected { addr });
        }

        let header = self.region.header(offset);

        if !header.is_live() || header.size > self.region.len() - HEADER_SIZE - offset {
            return Err(Error::CorruptionDetected { addr });
        }

        Ok((offset, header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGION: usize = 64 * 1024;

    /// Every byte of the region is either a header, free or allocated.
    fn assert_accounted(allocator: &RegionAllocator) {
        let stats = allocator.stats();
        let live = stats.allocations - stats.deallocations;
        let headers = (live + stats.free_blocks) * HEADER_SIZE;

        assert_eq!(
            allocator.region_size(),
            stats.bytes_free + stats.bytes_allocated + headers
        );
    }

    #[test]
    fn basic_alloc() {
        let mut allocator = RegionAllocator::new(REGION, Strategy::BestFit).unwrap();
        unsafe {
            let block = allocator.alloc(4).unwrap().cast::<u32>();
            *block.as_ptr() = 23;
            assert_eq!(23, *block.as_ptr());
        }
        assert_accounted(&allocator);
    }

    #[test]
    fn region_is_page_rounded() {
        let allocator = RegionAllocator::new(1, Strategy::FirstFit).unwrap();
        assert!(allocator.region_size() >= 1);
        assert!(allocator.region_size().is_power_of_two());
        assert_eq!(allocator.region_size() - HEADER_SIZE, allocator.stats().bytes_free);
    }

    #[test]
    fn zero_size_region_is_rejected() {
        assert_eq!(
            Some(Error::InvalidSize),
            RegionAllocator::new(0, Strategy::BestFit).err()
        );
    }

    #[test]
    fn payloads_are_aligned_and_disjoint() {
        let all = [
            Strategy::BestFit,
            Strategy::WorstFit,
            Strategy::FirstFit,
            Strategy::NextFit,
        ];

        for strategy in all {
            let mut allocator = RegionAllocator::new(REGION, strategy).unwrap();
            let mut blocks = Vec::new();

            for size in [1, 7, 8, 13, 100, 0, 333] {
                let ptr = allocator.alloc(size).unwrap();
                assert_eq!(0, ptr.as_ptr() as usize % ALIGNMENT);
                assert!(allocator.usable_size(ptr).unwrap() >= size);
                blocks.push((ptr.as_ptr() as usize, allocator.usable_size(ptr).unwrap()));
            }

            blocks.sort();
            for pair in blocks.windows(2) {
                assert!(pair[0].0 + pair[0].1 <= pair[1].0);
            }

            assert_accounted(&allocator);
        }
    }

    #[test]
    fn zero_size_alloc_is_freeable() {
        let mut allocator = RegionAllocator::new(REGION, Strategy::BestFit).unwrap();

        let a = allocator.alloc(0).unwrap();
        let b = allocator.alloc(0).unwrap();
        assert_ne!(a, b);
        assert_eq!(ALIGNMENT, allocator.usable_size(a).unwrap());

        allocator.free(Some(a)).unwrap();
        allocator.free(Some(b)).unwrap();
        assert_eq!(0, allocator.stats().bytes_allocated);
        assert_accounted(&allocator);
    }

    #[test]
    fn freed_block_is_reused() {
        let mut allocator = RegionAllocator::new(REGION, Strategy::BestFit).unwrap();

        let first = allocator.alloc(4).unwrap();
        let _ = allocator.alloc(8).unwrap();
        let _ = allocator.alloc(8).unwrap();

        allocator.free(Some(first)).unwrap();

        let second = allocator.alloc(4).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn free_none_is_noop() {
        let mut allocator = RegionAllocator::new(REGION, Strategy::BestFit).unwrap();
        let before = allocator.stats();

        allocator.free(None).unwrap();
        assert_eq!(before, allocator.stats());
    }

    #[test]
    fn out_of_memory_leaves_state_alone() {
        let mut allocator = RegionAllocator::new(4096, Strategy::FirstFit).unwrap();
        let before = allocator.stats();

        assert_eq!(
            Err(Error::OutOfMemory { requested: allocator.region_size() }),
            allocator.alloc(allocator.region_size())
        );
        assert!(matches!(allocator.alloc(usize::MAX), Err(Error::OutOfMemory { .. })));

        // The caller's size is reported, not the rounded one.
        let odd = allocator.region_size() - 3;
        assert_eq!(Err(Error::OutOfMemory { requested: odd }), allocator.alloc(odd));
        assert_eq!(before, allocator.stats());
    }

    #[test]
    fn small_leftover_is_not_split() {
        let mut allocator = RegionAllocator::new(4096, Strategy::BestFit).unwrap();
        let whole = allocator.stats().bytes_free;

        // Leaves exactly one header worth of bytes, not enough for a block.
        let ptr = allocator.alloc(whole - HEADER_SIZE).unwrap();

        assert_eq!(whole, allocator.usable_size(ptr).unwrap());
        assert_eq!(0, allocator.stats().free_blocks);
        assert_accounted(&allocator);

        allocator.free(Some(ptr)).unwrap();
        assert_eq!(whole, allocator.stats().bytes_free);
    }

    #[test]
    fn adjacent_blocks_coalesce() {
        let mut allocator = RegionAllocator::new(REGION, Strategy::BestFit).unwrap();

        let a = allocator.alloc(256).unwrap();
        let b = allocator.alloc(512).unwrap();
        let _guard = allocator.alloc(64).unwrap();

        allocator.free(Some(a)).unwrap();
        allocator.free(Some(b)).unwrap();

        let stats = allocator.stats();
        assert_eq!(2, stats.free_blocks);

        // Wouldn't fit in either block on its own.
        let merged = allocator.alloc(256 + 512 + HEADER_SIZE).unwrap();
        assert_eq!(a, merged);
        assert_accounted(&allocator);
    }

    #[test]
    fn everything_coalesces_back() {
        let mut allocator = RegionAllocator::new(REGION, Strategy::FirstFit).unwrap();
        let whole = allocator.stats().bytes_free;

        let blocks: Vec<_> = (1..=5).map(|i| allocator.alloc(i * 40).unwrap()).collect();

        // Freeing from the end keeps every freed block next to its neighbour
        // in the list too.
        for ptr in blocks.into_iter().rev() {
            allocator.free(Some(ptr)).unwrap();
        }

        let stats = allocator.stats();
        assert_eq!(1, stats.free_blocks);
        assert_eq!(whole, stats.bytes_free);
    }

    #[test]
    fn double_free_is_detected() {
        let mut allocator = RegionAllocator::new(REGION, Strategy::BestFit).unwrap();

        let a = allocator.alloc(128).unwrap();
        let _b = allocator.alloc(128).unwrap();
        allocator.free(Some(a)).unwrap();

        let before = allocator.stats();
        let err = allocator.free(Some(a)).unwrap_err();

        assert_eq!(Error::DoubleFreeDetected { addr: a.as_ptr() as usize }, err);
        assert!(err.is_fatal());
        assert_eq!(before, allocator.stats());

        // The list still works.
        assert_eq!(a, allocator.alloc(128).unwrap());
        assert_accounted(&allocator);
    }

    #[test]
    fn corrupted_header_is_detected() {
        let mut allocator = RegionAllocator::new(REGION, Strategy::BestFit).unwrap();

        let a = allocator.alloc(64).unwrap();
        unsafe {
            // The sentinel is the word right before the payload.
            *a.as_ptr().cast::<usize>().sub(1) = 0;
        }

        let err = allocator.free(Some(a)).unwrap_err();
        assert_eq!(Error::CorruptionDetected { addr: a.as_ptr() as usize }, err);
        assert!(err.is_fatal());
        assert!(matches!(allocator.realloc(Some(a), 128), Err(Error::CorruptionDetected { .. })));
    }

    #[test]
    fn foreign_pointer_is_corruption() {
        let mut allocator = RegionAllocator::new(REGION, Strategy::BestFit).unwrap();
        let mut value = 0u64;

        let err = allocator.free(Some(NonNull::from(&mut value).cast())).unwrap_err();
        assert!(matches!(err, Error::CorruptionDetected { .. }));
    }

    #[test]
    fn realloc_in_place_and_moving() {
        let mut allocator = RegionAllocator::new(REGION, Strategy::BestFit).unwrap();

        let ptr = allocator.alloc(100).unwrap();
        unsafe {
            for i in 0..104 {
                *ptr.as_ptr().add(i) = i as u8;
            }
        }

        assert_eq!(Some(ptr), allocator.realloc(Some(ptr), 50).unwrap());
        assert_eq!(Some(ptr), allocator.realloc(Some(ptr), 104).unwrap());

        let moved = allocator.realloc(Some(ptr), 500).unwrap().unwrap();
        assert_ne!(ptr, moved);
        unsafe {
            for i in 0..104 {
                assert_eq!(i as u8, *moved.as_ptr().add(i));
            }
        }

        // Old block went back to the free list.
        assert!(matches!(allocator.free(Some(ptr)), Err(Error::DoubleFreeDetected { .. })));
        assert_eq!(504, allocator.stats().bytes_allocated);
        assert_accounted(&allocator);
    }

    #[test]
    fn realloc_edge_cases() {
        let mut allocator = RegionAllocator::new(REGION, Strategy::BestFit).unwrap();

        let ptr = allocator.realloc(None, 32).unwrap().unwrap();
        assert_eq!(32, allocator.usable_size(ptr).unwrap());

        assert_eq!(None, allocator.realloc(Some(ptr), 0).unwrap());
        assert_eq!(0, allocator.stats().bytes_allocated);
        assert_eq!(1, allocator.stats().deallocations);
    }

    #[test]
    fn failed_realloc_keeps_old_block() {
        let mut allocator = RegionAllocator::new(4096, Strategy::BestFit).unwrap();

        let ptr = allocator.alloc(64).unwrap();
        let too_big = allocator.region_size();
        let err = allocator.realloc(Some(ptr), too_big).unwrap_err();

        assert!(matches!(err, Error::OutOfMemory { .. }));
        assert_eq!(64, allocator.usable_size(ptr).unwrap());
    }

    #[test]
    fn next_fit_moves_on() {
        let mut allocator = RegionAllocator::new(REGION, Strategy::NextFit).unwrap();

        let a = allocator.alloc(48).unwrap();
        let _x = allocator.alloc(48).unwrap();
        let b = allocator.alloc(48).unwrap();
        let _y = allocator.alloc(48).unwrap();

        allocator.free(Some(a)).unwrap();
        allocator.free(Some(b)).unwrap();

        // List is b, a, rest. Every split so far was of the last node, so
        // there is no rover yet: the search starts at the head and the rover
        // moves on to a.
        assert_eq!(b, allocator.alloc(32).unwrap());
        allocator.free(Some(b)).unwrap();

        // b is back at the head but the scan resumes at a.
        assert_eq!(a, allocator.alloc(32).unwrap());

        // First fit starts from the head every time.
        let mut first = RegionAllocator::new(REGION, Strategy::FirstFit).unwrap();
        let a = first.alloc(48).unwrap();
        let _x = first.alloc(48).unwrap();
        let b = first.alloc(48).unwrap();
        let _y = first.alloc(48).unwrap();
        first.free(Some(a)).unwrap();
        first.free(Some(b)).unwrap();
        assert_eq!(b, first.alloc(32).unwrap());
    }

    #[test]
    fn next_fit_leaves_split_block_behind() {
        let mut allocator = RegionAllocator::new(4096, Strategy::NextFit).unwrap();

        let a = allocator.alloc(256).unwrap();
        let _g1 = allocator.alloc(16).unwrap();
        let c = allocator.alloc(256).unwrap();
        let _g2 = allocator.alloc(16).unwrap();

        let rest = allocator.stats().largest_free_block;
        let _filler = allocator.alloc(rest - HEADER_SIZE).unwrap();

        allocator.free(Some(c)).unwrap();
        allocator.free(Some(a)).unwrap();

        // List is a, c. The first request splits a, the second one must
        // start from c even though a's leftover could serve it.
        assert_eq!(a, allocator.alloc(32).unwrap());
        assert_eq!(c, allocator.alloc(32).unwrap());
        assert_accounted(&allocator);
    }

    #[test]
    fn next_fit_wraps_around() {
        let mut allocator = RegionAllocator::new(4096, Strategy::NextFit).unwrap();

        let a = allocator.alloc(16).unwrap();
        let _x = allocator.alloc(48).unwrap();
        // Next fit wants room for the header too, 64 bytes serve a 48 bytes request.
        let b = allocator.alloc(64).unwrap();
        let _y = allocator.alloc(48).unwrap();

        // Swallow the rest of the region so only a and b will be free.
        let rest = allocator.stats().largest_free_block;
        let _filler = allocator.alloc(rest - HEADER_SIZE).unwrap();
        assert_eq!(0, allocator.stats().free_blocks);

        allocator.free(Some(a)).unwrap();
        allocator.free(Some(b)).unwrap();

        // List is b, a. Takes b and leaves the rover on a.
        assert_eq!(b, allocator.alloc(48).unwrap());
        allocator.free(Some(b)).unwrap();

        // a is too small, the scan wraps to the head and finds b again.
        assert_eq!(b, allocator.alloc(48).unwrap());
        assert_accounted(&allocator);
    }
}
