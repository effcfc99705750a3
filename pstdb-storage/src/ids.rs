use crate::error::Result;
use crate::serde::{Deser, Ser, Serde};
use std::fmt;
use std::mem;

pub type Bid = u64;
pub type Ib = u64;

/// Bit marking internal blocks in a block id.
pub const BID_INTERNAL_MASK: Bid = 0x2;
/// Block ids are allocated in steps of 4.
pub const BID_INCREMENT: Bid = 4;

#[inline]
pub fn bid_is_internal(bid: Bid) -> bool {
    bid & BID_INTERNAL_MASK != 0
}

/// Node id. Low 5 bits are the nid type, upper 27 bits the index
/// within that type.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Nid(pub u32);

pub const NID_TYPE_MASK: u32 = 0x1F;
/// Largest index a node id can carry.
pub const NID_INDEX_MAX: u32 = u32::MAX >> 5;

impl Nid {
    #[inline]
    pub fn new(nid_type: NidType, index: u32) -> Self {
        debug_assert!(index <= NID_INDEX_MAX);
        Nid((index << 5) | nid_type as u32)
    }

    #[inline]
    pub fn nid_type(self) -> u8 {
        (self.0 & NID_TYPE_MASK) as u8
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0 >> 5
    }
}

impl fmt::Debug for Nid {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nid({:#x})", self.0)
    }
}

impl From<u32> for Nid {
    #[inline]
    fn from(value: u32) -> Self {
        Nid(value)
    }
}

/// Well-known nid types. Only the ones the node database cares about
/// are listed, other values are carried through untouched.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NidType {
    Hid = 0x00,
    Internal = 0x01,
    NormalFolder = 0x02,
    SearchFolder = 0x03,
    NormalMessage = 0x04,
    Attachment = 0x05,
    HierarchyTable = 0x0D,
    ContentsTable = 0x0E,
    AssocContentsTable = 0x0F,
    LocalDescriptor = 0x1F,
}

/// Heap item id: block index in the upper 16 bits, 1-based item index
/// in the next 11 bits, low 5 bits zero. Zero means "no item".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hid(pub u32);

pub const HID_INDEX_MAX: u16 = 0x7FF;

impl Hid {
    #[inline]
    pub fn new(block: u16, index: u16) -> Self {
        Hid(((block as u32) << 16) | (((index & HID_INDEX_MAX) as u32) << 5))
    }

    #[inline]
    pub fn block(self) -> u16 {
        (self.0 >> 16) as u16
    }

    #[inline]
    pub fn index(self) -> u16 {
        ((self.0 >> 5) & HID_INDEX_MAX as u32) as u16
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Whether the value is shaped like a heap item id.
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 & NID_TYPE_MASK == NidType::Hid as u32 && self.index() != 0
    }
}

impl fmt::Debug for Hid {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hid({:#x})", self.0)
    }
}

/// Number of nid types tracked by the header counters.
pub const NID_TYPE_COUNT: usize = 32;

/// Reference to a block or page: permanent id plus current offset.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockRef {
    pub bid: Bid,
    pub ib: Ib,
}

pub const BLOCK_REF_SIZE: usize = mem::size_of::<Bid>() + mem::size_of::<Ib>();

impl BlockRef {
    #[inline]
    pub fn new(bid: Bid, ib: Ib) -> Self {
        BlockRef { bid, ib }
    }

    /// A zero reference means "absent".
    #[inline]
    pub fn is_null(&self) -> bool {
        self.bid == 0 && self.ib == 0
    }
}

impl fmt::Debug for BlockRef {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockRef(bid={:#x}, ib={:#x})", self.bid, self.ib)
    }
}

impl Ser for BlockRef {
    #[inline]
    fn ser_len(&self) -> usize {
        BLOCK_REF_SIZE
    }

    #[inline]
    fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize {
        let idx = out.ser_u64(start_idx, self.bid);
        out.ser_u64(idx, self.ib)
    }
}

impl Deser for BlockRef {
    #[inline]
    fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)> {
        let (idx, bid) = input.deser_u64(start_idx)?;
        let (idx, ib) = input.deser_u64(idx)?;
        Ok((idx, BlockRef { bid, ib }))
    }
}
