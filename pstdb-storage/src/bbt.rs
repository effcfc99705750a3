use crate::block::PageType;
use crate::btree::{BTree, PageCodec, Slot};
use crate::error::Result;
use crate::ids::{Bid, BlockRef, Ib};
use crate::serde::{Deser, Ser, Serde};

/// Leaf value of the block tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    pub ib: Ib,
    /// Data bytes of the block, trailer excluded.
    pub cb: u16,
    pub cref: u16,
}

impl Ser for BlockEntry {
    #[inline]
    fn ser_len(&self) -> usize {
        BBT_LEAF_ENTRY_SIZE - 8
    }

    #[inline]
    fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize {
        let idx = out.ser_u64(start_idx, self.ib);
        let idx = out.ser_u16(idx, self.cb);
        let idx = out.ser_u16(idx, self.cref);
        out.ser_u32(idx, 0)
    }
}

impl Deser for BlockEntry {
    #[inline]
    fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)> {
        let (idx, ib) = input.deser_u64(start_idx)?;
        let (idx, cb) = input.deser_u16(idx)?;
        let (idx, cref) = input.deser_u16(idx)?;
        let (idx, _) = input.deser_u32(idx)?;
        Ok((idx, BlockEntry { ib, cb, cref }))
    }
}

pub const BBT_LEAF_ENTRY_SIZE: usize = 24;

pub struct BbtCodec;

impl PageCodec for BbtCodec {
    type Key = Bid;
    type Value = BlockEntry;

    const PAGE_TYPE: PageType = PageType::Bbt;
    const LEAF_ENTRY_SIZE: usize = BBT_LEAF_ENTRY_SIZE;

    #[inline]
    fn key_to_u64(key: Bid) -> u64 {
        key
    }

    #[inline]
    fn key_from_u64(raw: u64) -> Result<Bid> {
        Ok(raw)
    }
}

pub type BlockTree = BTree<Slot<BlockRef>>;
