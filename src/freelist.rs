use log::debug;

use crate::{
    block::{FreeNode, HEADER_SIZE, Link, Offset},
    region::Region,
};

/// Singly linked list of free blocks.
///
/// The list doesn't own any memory. Every free block stores its own
/// [`FreeNode`] at the front, so the list is threaded through the free bytes
/// of the [`Region`] and we only keep the offset of its head here:
///
/// ```text
///   head
///    |
///    v
/// +------+-----+    +-------+    +------+---------+    +-------+
/// | Node | ... | -> | Block | -> | Node |   ...   | -> | Block |
/// +------+-----+    +-------+    +------+---------+    +-------+
///    |                              ^
///    +------------------------------+
///              next (offset)
/// ```
///
/// There is no ordering by address. New blocks are pushed at the head so the
/// most recently freed block is always found first.
///
/// The list also keeps the `rover`, the persistent cursor used by
/// [`crate::Strategy::NextFit`]. Whenever a node disappears from the list the
/// rover is moved to whatever took its place, so it never points inside a
/// block that is allocated or was merged away.
pub(crate) struct FreeList {
    head: Link,
    rover: Link,
}

/// One step of a walk over the [`FreeList`]. `prev` is needed to unlink
/// `offset` since the list is singly linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    pub prev: Link,
    pub offset: Offset,
    pub node: FreeNode,
}

pub(crate) struct Iter<'a> {
    region: &'a Region,
    prev: Link,
    current: Link,
}

impl FreeList {
    /// Turns the whole `region` into a single free block.
    pub fn new(region: &mut Region) -> Self {
        let size = region.len() - HEADER_SIZE;
        region.set_node(0, FreeNode::new(size, None));

        Self {
            head: Some(0),
            rover: None,
        }
    }

    #[inline]
    pub fn rover(&self) -> Link {
        self.rover
    }

    #[inline]
    pub fn set_rover(&mut self, rover: Link) {
        self.rover = rover;
    }

    pub fn iter<'a>(&self, region: &'a Region) -> Iter<'a> {
        Iter {
            region,
            prev: None,
            current: self.head,
        }
    }

    /// Tells whether a block starting at `offset` is already on the list.
    pub fn contains(&self, region: &Region, offset: Offset) -> bool {
        self.iter(region).any(|entry| entry.offset == offset)
    }

    /// Inserts the block at `offset` as the new head of the list.
    pub fn push_front(&mut self, region: &mut Region, offset: Offset, size: usize) {
        region.set_node(offset, FreeNode::new(size, self.head));
        self.head = Some(offset);
    }

    /// Removes `entry` from the list. The block it describes is left
    /// untouched, the caller is about to overwrite it.
    pub fn unlink(&mut self, region: &mut Region, entry: &Entry) {
        self.relink(region, entry.prev, entry.node.next());

        if self.rover == Some(entry.offset) {
            self.rover = entry.node.next();
        }
    }

    /// Puts a new node of `size` bytes at `offset` in the slot `entry`
    /// occupied, keeping its place in the list.
    pub fn replace(&mut self, region: &mut Region, entry: &Entry, offset: Offset, size: usize) {
        region.set_node(offset, FreeNode::new(size, entry.node.next()));
        self.relink(region, entry.prev, Some(offset));

        if self.rover == Some(entry.offset) {
            self.rover = Some(offset);
        }
    }

    /// Merges free blocks that touch in memory.
    ///
    /// Only neighbours *in the list* are compared, one pair at a time, in
    /// both directions:
    ///
    /// ```text
    /// current.end == next.offset   =>  current absorbs next
    /// next.end == current.offset   =>  next absorbs current
    /// ```
    ///
    /// A merged node is compared again against its new neighbour, so runs of
    /// adjacent blocks collapse in one pass as long as they are also next to
    /// each other in the list. Blocks that touch in memory but sit far apart
    /// in the list are left alone until a later free brings them together.
    ///
    /// Returns how many merges were performed.
    pub fn coalesce(&mut self, region: &mut Region) -> usize {
        let mut merges = 0;
        let mut prev: Link = None;
        let mut current = self.head;

        while let Some(offset) = current {
            let mut node = region.node(offset);
            let Some(next_offset) = node.next() else {
                break;
            };
            let next = region.node(next_offset);

            if node.end(offset) == next_offset {
                debug!("merging free block {next_offset:#x} into {offset:#x}");

                node.size += HEADER_SIZE + next.size;
                node.set_next(next.next());
                region.set_node(offset, node);
                self.moved(next_offset, offset);
                merges += 1;
                // Stay on `offset`, its new neighbour may touch it too.
                continue;
            }

            if next.end(next_offset) == offset {
                debug!("merging free block {offset:#x} into {next_offset:#x}");

                let merged = FreeNode::new(next.size + HEADER_SIZE + node.size, next.next());
                region.set_node(next_offset, merged);
                self.relink(region, prev, Some(next_offset));
                self.moved(offset, next_offset);
                merges += 1;
                current = Some(next_offset);
                continue;
            }

            prev = current;
            current = Some(next_offset);
        }

        merges
    }

    /// Points whatever linked to the removed slot (the head or `prev`) at `to`.
    fn relink(&mut self, region: &mut Region, prev: Link, to: Link) {
        match prev {
            Some(prev) => {
                let mut node = region.node(prev);
                node.set_next(to);
                region.set_node(prev, node);
            }
            None => self.head = to,
        }
    }

    /// The node at `from` was merged into the node at `to`.
    fn moved(&mut self, from: Offset, to: Offset) {
        if self.rover == Some(from) {
            self.rover = Some(to);
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.current?;
        let node = self.region.node(offset);

        let entry = Entry {
            prev: self.prev,
            offset,
            node,
        };

        self.prev = Some(offset);
        self.current = node.next();

        Some(entry)
    }
}
