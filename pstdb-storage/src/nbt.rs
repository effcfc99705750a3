//! Node tree: maps every node id to its data block, subnode block and
//! parent node.
use crate::block::PageType;
use crate::btree::{BTree, PageCodec, Slot};
use crate::error::{Error, Result};
use crate::ids::{Bid, BlockRef, Nid};
use crate::serde::{Deser, Ser, Serde};

/// Leaf value of the node tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeEntry {
    /// Root block of the node data, 0 if the node holds no data.
    pub data: Bid,
    /// Root block of the subnode tree, 0 if the node has no subnodes.
    pub sub: Bid,
    pub parent: Nid,
}

impl Ser for NodeEntry {
    #[inline]
    fn ser_len(&self) -> usize {
        NBT_LEAF_ENTRY_SIZE - 8
    }

    #[inline]
    fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize {
        let idx = out.ser_u64(start_idx, self.data);
        let idx = out.ser_u64(idx, self.sub);
        let idx = out.ser_u32(idx, self.parent.0);
        out.ser_u32(idx, 0)
    }
}

impl Deser for NodeEntry {
    #[inline]
    fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)> {
        let (idx, data) = input.deser_u64(start_idx)?;
        let (idx, sub) = input.deser_u64(idx)?;
        let (idx, parent) = input.deser_u32(idx)?;
        let (idx, _) = input.deser_u32(idx)?;
        Ok((
            idx,
            NodeEntry {
                data,
                sub,
                parent: Nid(parent),
            },
        ))
    }
}

pub const NBT_LEAF_ENTRY_SIZE: usize = 32;

pub struct NbtCodec;

impl PageCodec for NbtCodec {
    type Key = Nid;
    type Value = NodeEntry;

    const PAGE_TYPE: PageType = PageType::Nbt;
    const LEAF_ENTRY_SIZE: usize = NBT_LEAF_ENTRY_SIZE;

    #[inline]
    fn key_to_u64(key: Nid) -> u64 {
        key.0 as u64
    }

    #[inline]
    fn key_from_u64(raw: u64) -> Result<Nid> {
        u32::try_from(raw)
            .map(Nid)
            .map_err(|_| Error::InvalidFormat)
    }
}

pub type NodeTree = BTree<Slot<BlockRef>>;
