use std::mem;


/// Every payload size handed out by the allocator is a multiple of this.
pub const ALIGNMENT: usize = 8;

/// Sentinel stored in [`Header::magic`] while a block is allocated.
pub(crate) const MAGIC: usize = 0x0C0F_FEE5;

/// Encoding of "no next node" inside [`FreeNode::next`].
const NIL: usize = usize::MAX;

/// Size of the bookkeeping at the front of every block. The same bytes are
/// read either as a [`Header`] or as a [`FreeNode`], so both views must be
/// exactly this big.
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

const _: () = assert!(mem::size_of::<Header>() == mem::size_of::<FreeNode>());
const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);

/// Byte offset of a block from the start of the region.
pub(crate) type Offset = usize;

/// Offset of the next free node, if any.
pub(crate) type Link = Option<Offset>;

/// Allocated view of a block. The payload starts right after it.
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        | -> Header
/// |        magic        |        |
/// +---------------------+ <------+ <- pointer returned to the user
/// |       Payload       |        |
/// |         ...         |        | -> `size` bytes
/// |                     |        |
/// +---------------------+ <------+
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    /// Payload size, always a multiple of [`ALIGNMENT`].
    pub size: usize,
    /// [`MAGIC`] while the block is allocated.
    pub magic: usize,
}

/// Free view of a block. Nodes form the free list; the list is threaded
/// through the region itself so it never needs memory of its own.
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        | -> FreeNode
/// |        next         | ---------------> next free block (offset)
/// +---------------------+ <------+
/// |   Unused payload    |
/// |         ...         |
/// +---------------------+
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeNode {
    /// Usable bytes after this node.
    pub size: usize,
    next: usize,
}

impl Header {
    pub fn live(size: usize) -> Self {
        Self { size, magic: MAGIC }
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.magic == MAGIC
    }
}

impl FreeNode {
    pub fn new(size: usize, next: Link) -> Self {
        Self {
            size,
            next: next.unwrap_or(NIL),
        }
    }

    #[inline]
    pub fn next(&self) -> Link {
        (self.next != NIL).then_some(self.next)
    }

    #[inline]
    pub fn set_next(&mut self, next: Link) {
        self.next = next.unwrap_or(NIL);
    }

    /// Offset right past the end of the block that starts at `offset`.
    #[inline]
    pub fn end(&self, offset: Offset) -> Offset {
        offset + HEADER_SIZE + self.size
    }
}
