use std::fmt;

use crate::{block::HEADER_SIZE, freelist::FreeList, region::Region};

/// Snapshot of the allocator's counters and of the free list.
///
/// A free block counts as *fragmented* when it is smaller than half of the
/// largest free block; `fragmentation_pct` is the share of free memory
/// (headers included) locked in those blocks.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Stats {
    /// Successful allocations since init.
    pub allocations: usize,
    /// Successful frees since init.
    pub deallocations: usize,
    /// Payload bytes currently handed out.
    pub bytes_allocated: usize,
    /// Payload bytes currently on the free list.
    pub bytes_free: usize,
    /// Payload size of the biggest free block.
    pub largest_free_block: usize,
    /// Number of nodes on the free list.
    pub free_blocks: usize,
    /// Between 0 and 100.
    pub fragmentation_pct: f64,
}

/// Running totals kept by the allocator between calls.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub allocations: usize,
    pub deallocations: usize,
    pub bytes_allocated: usize,
}

impl Stats {
    pub(crate) fn collect(counters: &Counters, free_list: &FreeList, region: &Region) -> Self {
        let (bytes_free, largest_free_block, free_blocks) = free_list
            .iter(region)
            .fold((0, 0, 0), |(free, largest, count), entry| {
                (free + entry.node.size, largest.max(entry.node.size), count + 1)
            });

        let threshold = largest_free_block / 2;

        let fragmented: usize = free_list
            .iter(region)
            .filter(|entry| entry.node.size < threshold)
            .map(|entry| entry.node.size + HEADER_SIZE)
            .sum();

        let fragmentation_pct = match bytes_free {
            0 => 0.0,
            free => fragmented as f64 / free as f64 * 100.0,
        };

        Self {
            allocations: counters.allocations,
            deallocations: counters.deallocations,
            bytes_allocated: counters.bytes_allocated,
            bytes_free,
            largest_free_block,
            free_blocks,
            fragmentation_pct,
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "umem statistics:")?;
        writeln!(f, "  allocations:        {}", self.allocations)?;
        writeln!(f, "  deallocations:      {}", self.deallocations)?;
        writeln!(f, "  bytes allocated:    {}", self.bytes_allocated)?;
        writeln!(f, "  bytes free:         {}", self.bytes_free)?;
        writeln!(f, "  largest free block: {}", self.largest_free_block)?;
        writeln!(f, "  free blocks:        {}", self.free_blocks)?;
        write!(f, "  fragmentation:      {:.2}%", self.fragmentation_pct)
    }
}
