//! Data Tree: a logical byte stream stored as a chain of blocks.
//!
//! The root is a single data block, an XBlock listing up to `fanout`
//! data blocks, or an XXBlock listing up to `fanout` XBlocks. The root
//! kind follows the number of blocks, so appending promotes it and
//! trimming demotes it. Every block but the last one is full, readers
//! rely on it to locate a byte without reading the blocks before it.
//!
//! List block layout:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ btype(1) = 0x01 level(1)     │
//! │ cEnt(2) lcbTotal(4)          │
//! ├──────────────────────────────┤
//! │ bid(8) * cEnt                │
//! └──────────────────────────────┘
//! ```
use crate::block::{BlockAccess, MAX_BLOCK_DATA};
use crate::error::{Error, Result};
use crate::ids::{bid_is_internal, Bid};
use crate::serde::Serde;
use log::{trace, warn};
use std::mem;

pub const XBLOCK_TYPE: u8 = 0x01;
const LIST_HEADER_SIZE: usize = 8;
/// Maximum number of ids in one list block.
pub const XBLOCK_FANOUT: usize = (MAX_BLOCK_DATA - LIST_HEADER_SIZE) / mem::size_of::<Bid>();

/// Shape of a data tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTreeLimits {
    /// Data bytes of a full block.
    pub block_size: usize,
    /// Ids per list block.
    pub fanout: usize,
}

impl Default for DataTreeLimits {
    #[inline]
    fn default() -> Self {
        DataTreeLimits {
            block_size: MAX_BLOCK_DATA,
            fanout: XBLOCK_FANOUT,
        }
    }
}

impl DataTreeLimits {
    #[inline]
    pub fn new(block_size: usize, fanout: usize) -> Result<Self> {
        if block_size == 0 || block_size > MAX_BLOCK_DATA || !(2..=XBLOCK_FANOUT).contains(&fanout) {
            return Err(Error::InvalidArgument);
        }
        Ok(DataTreeLimits { block_size, fanout })
    }

    /// Maximum number of blocks.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.fanout * self.fanout
    }
}

/// Kind of the root block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRoot {
    Empty,
    Block,
    XBlock,
    XXBlock,
}

#[derive(Debug, Clone)]
enum DataBlock {
    Stored { bid: Bid, len: usize },
    Pending(Vec<u8>),
}

impl DataBlock {
    #[inline]
    fn len(&self) -> usize {
        match self {
            DataBlock::Stored { len, .. } => *len,
            DataBlock::Pending(data) => data.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ListBlock {
    bid: Bid,
    level: u8,
    total: u32,
    bids: Vec<Bid>,
}

pub struct DataTree {
    limits: DataTreeLimits,
    blocks: Vec<DataBlock>,
    // root and list blocks as last stored.
    root: Bid,
    lists: Vec<ListBlock>,
    // stored blocks replaced since last save.
    released: Vec<Bid>,
    dirty: bool,
}

impl DataTree {
    /// Create an empty data tree.
    #[inline]
    pub fn new(limits: DataTreeLimits) -> Self {
        DataTree {
            limits,
            blocks: vec![],
            root: 0,
            lists: vec![],
            released: vec![],
            dirty: false,
        }
    }

    /// Open a stored data tree. A zero id opens an empty tree.
    pub fn open<A: BlockAccess>(access: &mut A, bid: Bid, limits: DataTreeLimits) -> Result<Self> {
        let mut tree = DataTree::new(limits);
        if bid == 0 {
            return Ok(tree);
        }
        tree.root = bid;
        if !bid_is_internal(bid) {
            let data = access.read_block(bid)?;
            tree.blocks.push(DataBlock::Stored {
                bid,
                len: data.len(),
            });
            return Ok(tree);
        }
        let root = read_list(access, bid)?;
        let total = root.total as usize;
        let mut bids = vec![];
        if root.level == 1 {
            bids.extend_from_slice(&root.bids);
        } else {
            for child in &root.bids {
                let list = read_list(access, *child)?;
                if list.level != 1 {
                    return Err(Error::InvalidFormat);
                }
                bids.extend_from_slice(&list.bids);
                tree.lists.push(list);
            }
        }
        tree.lists.push(root);
        let count = bids.len();
        let block_size = limits.block_size;
        if count == 0
            || count > limits.capacity()
            || total <= (count - 1) * block_size
            || total > count * block_size
        {
            return Err(Error::InvalidFormat);
        }
        tree.blocks = bids
            .into_iter()
            .enumerate()
            .map(|(i, bid)| DataBlock::Stored {
                bid,
                len: if i + 1 < count {
                    block_size
                } else {
                    total - (count - 1) * block_size
                },
            })
            .collect();
        Ok(tree)
    }

    #[inline]
    pub fn limits(&self) -> DataTreeLimits {
        self.limits
    }

    /// Total bytes of the stream.
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.len()).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn block_len(&self, idx: usize) -> Option<usize> {
        self.blocks.get(idx).map(|b| b.len())
    }

    /// Whether the tree changed since it was opened or saved.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Root id as last stored, 0 if the stored tree is empty.
    #[inline]
    pub fn stored_root(&self) -> Bid {
        self.root
    }

    #[inline]
    pub fn root_kind(&self) -> DataRoot {
        match self.blocks.len() {
            0 => DataRoot::Empty,
            1 => DataRoot::Block,
            n if n <= self.limits.fanout => DataRoot::XBlock,
            _ => DataRoot::XXBlock,
        }
    }

    /// Read data of a block.
    pub fn get_block<A: BlockAccess>(&self, access: &mut A, idx: usize) -> Result<Vec<u8>> {
        match self.blocks.get(idx) {
            None => Err(Error::InvalidArgument),
            Some(DataBlock::Pending(data)) => Ok(data.clone()),
            Some(DataBlock::Stored { bid, len }) => {
                let data = access.read_block(*bid)?;
                if data.len() != *len {
                    return Err(Error::InvalidFormat);
                }
                Ok(data)
            }
        }
    }

    /// Replace data of a block. Every block but the last one must stay full.
    pub fn update_block(&mut self, idx: usize, data: &[u8]) -> Result<()> {
        let count = self.blocks.len();
        if idx >= count || data.is_empty() || data.len() > self.limits.block_size {
            return Err(Error::InvalidArgument);
        }
        if idx + 1 < count && data.len() != self.limits.block_size {
            return Err(Error::InvalidArgument);
        }
        self.replace(idx, data.to_vec());
        Ok(())
    }

    /// Append a block. The current last block is padded with zeros
    /// to full size first.
    pub fn append_block<A: BlockAccess>(&mut self, access: &mut A, data: &[u8]) -> Result<()> {
        if data.is_empty() || data.len() > self.limits.block_size {
            return Err(Error::InvalidArgument);
        }
        if self.blocks.len() >= self.limits.capacity() {
            return Err(Error::DataTreeFull);
        }
        self.pad_last(access)?;
        self.blocks.push(DataBlock::Pending(data.to_vec()));
        self.dirty = true;
        Ok(())
    }

    /// Remove the last block.
    pub fn delete_last_block(&mut self) -> Result<()> {
        match self.blocks.pop() {
            None => Err(Error::EmptyTree),
            Some(block) => {
                if let DataBlock::Stored { bid, .. } = block {
                    self.released.push(bid);
                }
                self.dirty = true;
                Ok(())
            }
        }
    }

    /// Remove every block. Storage is released on next save.
    #[inline]
    pub fn delete(&mut self) {
        for block in self.blocks.drain(..) {
            if let DataBlock::Stored { bid, .. } = block {
                self.released.push(bid);
            }
        }
        self.released.extend(self.lists.drain(..).map(|l| l.bid));
        self.dirty = true;
    }

    /// Append bytes at end of the stream, filling the last block first.
    pub fn append_data<A: BlockAccess>(&mut self, access: &mut A, data: &[u8]) -> Result<()> {
        let block_size = self.limits.block_size;
        let free = match self.blocks.last() {
            Some(last) => block_size - last.len(),
            None => 0,
        };
        let fill = free.min(data.len());
        let new_blocks = (data.len() - fill).div_ceil(block_size);
        if self.blocks.len() + new_blocks > self.limits.capacity() {
            return Err(Error::DataTreeFull);
        }
        if fill > 0 {
            let idx = self.blocks.len() - 1;
            let mut last = self.get_block(access, idx)?;
            last.extend_from_slice(&data[..fill]);
            self.replace(idx, last);
        }
        for chunk in data[fill..].chunks(block_size) {
            self.blocks.push(DataBlock::Pending(chunk.to_vec()));
            self.dirty = true;
        }
        Ok(())
    }

    /// Read the whole stream.
    pub fn get_data<A: BlockAccess>(&self, access: &mut A) -> Result<Vec<u8>> {
        let mut res = Vec::with_capacity(self.len());
        for idx in 0..self.blocks.len() {
            res.extend_from_slice(&self.get_block(access, idx)?);
        }
        Ok(res)
    }

    /// Write pending blocks and rebuild list blocks, then release
    /// replaced storage. Returns the root id, 0 if the tree is empty.
    ///
    /// On error every block written by this call is released again and
    /// the tree keeps its pending state, so the save can be retried.
    pub fn save<A: BlockAccess>(&mut self, access: &mut A) -> Result<Bid> {
        if !self.dirty {
            return Ok(self.root);
        }
        let mut written = vec![];
        let placed = match self.place(access, &mut written) {
            Ok(placed) => placed,
            Err(err) => {
                for bid in written {
                    if let Err(e) = access.release_block(bid) {
                        warn!("release of unsaved block {:#x} failed: {}", bid, e);
                    }
                }
                return Err(err);
            }
        };
        for (block, bid) in self.blocks.iter_mut().zip(&placed.bids) {
            if let DataBlock::Pending(data) = block {
                let len = data.len();
                *block = DataBlock::Stored { bid: *bid, len };
            }
        }
        self.lists = placed.lists;
        self.root = placed.root;
        self.dirty = false;
        for list in placed.unused {
            access.release_block(list.bid)?;
        }
        for bid in self.released.drain(..) {
            access.release_block(bid)?;
        }
        trace!(
            "data tree saved, root={:#x}, blocks={}, lists={}",
            placed.root,
            self.blocks.len(),
            self.lists.len()
        );
        Ok(placed.root)
    }

    /// Write pending blocks and list blocks without touching the tree.
    /// Ids of new blocks are collected in `written`.
    fn place<A: BlockAccess>(&self, access: &mut A, written: &mut Vec<Bid>) -> Result<Placed> {
        let mut bids = Vec::with_capacity(self.blocks.len());
        let mut lens = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let bid = match block {
                DataBlock::Stored { bid, .. } => *bid,
                DataBlock::Pending(data) => {
                    let bid = access.write_block(&data[..], false)?;
                    written.push(bid);
                    bid
                }
            };
            bids.push(bid);
            lens.push(block.len());
        }
        let fanout = self.limits.fanout;
        let mut unused = self.lists.clone();
        let mut lists = vec![];
        let root = match bids.len() {
            0 => 0,
            1 => bids[0],
            n if n <= fanout => {
                let total = lens.iter().sum::<usize>();
                let mut place = ListPlacer::new(access, &mut unused, &mut lists, written);
                place.list(1, total, bids.clone())?
            }
            _ => {
                let mut place = ListPlacer::new(access, &mut unused, &mut lists, written);
                let mut children = vec![];
                for (chunk, chunk_lens) in bids.chunks(fanout).zip(lens.chunks(fanout)) {
                    let total = chunk_lens.iter().sum::<usize>();
                    children.push(place.list(1, total, chunk.to_vec())?);
                }
                let total = lens.iter().sum::<usize>();
                place.list(2, total, children)?
            }
        };
        Ok(Placed {
            root,
            bids,
            lists,
            unused,
        })
    }

    #[inline]
    fn replace(&mut self, idx: usize, data: Vec<u8>) {
        let old = mem::replace(&mut self.blocks[idx], DataBlock::Pending(data));
        if let DataBlock::Stored { bid, .. } = old {
            self.released.push(bid);
        }
        self.dirty = true;
    }

    #[inline]
    fn pad_last<A: BlockAccess>(&mut self, access: &mut A) -> Result<()> {
        let block_size = self.limits.block_size;
        let Some(idx) = self.blocks.len().checked_sub(1) else {
            return Ok(());
        };
        if self.blocks[idx].len() < block_size {
            let mut data = self.get_block(access, idx)?;
            data.resize(block_size, 0);
            self.replace(idx, data);
        }
        Ok(())
    }
}

/// Outcome of a save pass before it is applied to the tree.
struct Placed {
    root: Bid,
    bids: Vec<Bid>,
    lists: Vec<ListBlock>,
    // stored list blocks no longer referenced.
    unused: Vec<ListBlock>,
}

struct ListPlacer<'a, A> {
    access: &'a mut A,
    old: &'a mut Vec<ListBlock>,
    placed: &'a mut Vec<ListBlock>,
    written: &'a mut Vec<Bid>,
}

impl<'a, A: BlockAccess> ListPlacer<'a, A> {
    #[inline]
    fn new(
        access: &'a mut A,
        old: &'a mut Vec<ListBlock>,
        placed: &'a mut Vec<ListBlock>,
        written: &'a mut Vec<Bid>,
    ) -> Self {
        ListPlacer {
            access,
            old,
            placed,
            written,
        }
    }

    /// Reuse an unchanged stored list block or write a new one.
    fn list(&mut self, level: u8, total: usize, bids: Vec<Bid>) -> Result<Bid> {
        let total = u32::try_from(total).map_err(|_| Error::DataTreeFull)?;
        let list = match self
            .old
            .iter()
            .position(|l| l.level == level && l.total == total && l.bids == bids)
        {
            Some(pos) => self.old.swap_remove(pos),
            None => {
                let bid = self
                    .access
                    .write_block(&encode_list(level, total, &bids), true)?;
                self.written.push(bid);
                ListBlock {
                    bid,
                    level,
                    total,
                    bids,
                }
            }
        };
        let bid = list.bid;
        self.placed.push(list);
        Ok(bid)
    }
}

fn encode_list(level: u8, total: u32, bids: &[Bid]) -> Vec<u8> {
    let mut buf = vec![0u8; LIST_HEADER_SIZE + bids.len() * mem::size_of::<Bid>()];
    let idx = buf.ser_u8(0, XBLOCK_TYPE);
    let idx = buf.ser_u8(idx, level);
    let idx = buf.ser_u16(idx, bids.len() as u16);
    let mut idx = buf.ser_u32(idx, total);
    for bid in bids {
        idx = buf.ser_u64(idx, *bid);
    }
    buf
}

fn read_list<A: BlockAccess>(access: &mut A, bid: Bid) -> Result<ListBlock> {
    let data = access.read_block(bid)?;
    let buf = &data[..];
    let (idx, btype) = buf.deser_u8(0)?;
    let (idx, level) = buf.deser_u8(idx)?;
    let (idx, count) = buf.deser_u16(idx)?;
    let (mut idx, total) = buf.deser_u32(idx)?;
    if btype != XBLOCK_TYPE || !(1..=2).contains(&level) || count == 0 {
        return Err(Error::InvalidFormat);
    }
    let mut bids = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (next, child) = buf.deser_u64(idx)?;
        bids.push(child);
        idx = next;
    }
    Ok(ListBlock {
        bid,
        level,
        total,
        bids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlocks;
    use proptest::prelude::*;

    fn small() -> DataTreeLimits {
        DataTreeLimits::new(16, 4).unwrap()
    }

    fn block(fill: u8, len: usize) -> Vec<u8> {
        vec![fill; len]
    }

    #[test]
    fn test_limits() {
        assert_eq!(XBLOCK_FANOUT, 1021);
        assert!(DataTreeLimits::new(0, 4).is_err());
        assert!(DataTreeLimits::new(16, 1).is_err());
        assert!(DataTreeLimits::new(MAX_BLOCK_DATA + 1, 4).is_err());
        assert_eq!(small().capacity(), 16);
    }

    #[test]
    fn test_delete_last_block_demotes_root() {
        let mut access = MemBlocks::new();
        let mut tree = DataTree::new(DataTreeLimits::default());
        let first = block(1, MAX_BLOCK_DATA);
        tree.append_block(&mut access, &first).unwrap();
        tree.append_block(&mut access, &block(2, MAX_BLOCK_DATA)).unwrap();
        tree.append_block(&mut access, &block(3, MAX_BLOCK_DATA)).unwrap();
        assert_eq!(tree.root_kind(), DataRoot::XBlock);
        let root = tree.save(&mut access).unwrap();
        assert!(bid_is_internal(root));

        tree.delete_last_block().unwrap();
        assert_eq!(tree.root_kind(), DataRoot::XBlock);
        tree.delete_last_block().unwrap();
        assert_eq!(tree.root_kind(), DataRoot::Block);
        let root = tree.save(&mut access).unwrap();
        assert!(!bid_is_internal(root));
        assert_eq!(access.read_block(root).unwrap(), first);
        // the list and the two trimmed blocks are released.
        assert_eq!(access.len(), 1);

        let tree = DataTree::open(&mut access, root, DataTreeLimits::default()).unwrap();
        assert_eq!(tree.get_block(&mut access, 0).unwrap(), first);
    }

    #[test]
    fn test_promotion_and_totals() {
        let mut access = MemBlocks::new();
        let mut tree = DataTree::new(small());
        let kinds = [
            DataRoot::Block,
            DataRoot::XBlock,
            DataRoot::XBlock,
            DataRoot::XBlock,
            DataRoot::XXBlock,
        ];
        for (i, kind) in kinds.iter().enumerate() {
            tree.append_block(&mut access, &block(i as u8, 16)).unwrap();
            assert_eq!(tree.root_kind(), *kind);
        }
        tree.append_block(&mut access, &block(9, 5)).unwrap();
        assert_eq!(tree.len(), 5 * 16 + 5);

        let root = tree.save(&mut access).unwrap();
        let list = read_list(&mut access, root).unwrap();
        assert_eq!(list.level, 2);
        assert_eq!(list.total as usize, tree.len());
        assert_eq!(list.bids.len(), 2);
        let children: Vec<ListBlock> = list
            .bids
            .iter()
            .map(|bid| read_list(&mut access, *bid).unwrap())
            .collect();
        assert_eq!(children[0].total, 64);
        assert_eq!(children[1].total, 16 + 5);
        assert_eq!(
            children.iter().map(|c| c.total).sum::<u32>(),
            list.total
        );

        let reopened = DataTree::open(&mut access, root, small()).unwrap();
        assert_eq!(reopened.root_kind(), DataRoot::XXBlock);
        assert_eq!(reopened.block_len(5), Some(5));
        assert_eq!(reopened.get_data(&mut access).unwrap(), tree.get_data(&mut access).unwrap());
    }

    #[test]
    fn test_append_pads_previous_block() {
        let mut access = MemBlocks::new();
        let mut tree = DataTree::new(small());
        tree.append_block(&mut access, b"short").unwrap();
        tree.save(&mut access).unwrap();
        tree.append_block(&mut access, b"next").unwrap();
        let mut expected = b"short".to_vec();
        expected.resize(16, 0);
        assert_eq!(tree.get_block(&mut access, 0).unwrap(), expected);
        assert_eq!(tree.len(), 20);
        tree.save(&mut access).unwrap();
        // padded block rewritten, old block released, one list block added.
        assert_eq!(access.len(), 3);
    }

    #[test]
    fn test_update_block() {
        let mut access = MemBlocks::new();
        let mut tree = DataTree::new(small());
        tree.append_data(&mut access, &block(1, 40)).unwrap();
        let root = tree.save(&mut access).unwrap();
        let old = read_list(&mut access, root).unwrap();

        assert_eq!(tree.update_block(0, &block(7, 10)), Err(Error::InvalidArgument));
        assert_eq!(tree.update_block(3, &block(7, 16)), Err(Error::InvalidArgument));
        tree.update_block(0, &block(7, 16)).unwrap();
        tree.update_block(2, &block(8, 3)).unwrap();
        assert_eq!(tree.len(), 35);
        let root = tree.save(&mut access).unwrap();
        let new = read_list(&mut access, root).unwrap();
        // rewritten blocks get new ids.
        assert_ne!(new.bids[0], old.bids[0]);
        assert_eq!(new.bids[1], old.bids[1]);
        assert!(!access.contains(old.bids[0]));
        assert!(!access.contains(old.bid));
        assert_eq!(new.total, 35);
        let mut expected = block(7, 16);
        expected.extend(block(1, 16));
        expected.extend(block(8, 3));
        assert_eq!(tree.get_data(&mut access).unwrap(), expected);
    }

    #[test]
    fn test_unchanged_lists_are_reused() {
        let mut access = MemBlocks::new();
        let mut tree = DataTree::new(small());
        tree.append_data(&mut access, &block(1, 16 * 9)).unwrap();
        let root = tree.save(&mut access).unwrap();
        let before = read_list(&mut access, root).unwrap();
        tree.append_data(&mut access, b"tail").unwrap();
        let root = tree.save(&mut access).unwrap();
        let after = read_list(&mut access, root).unwrap();
        assert_eq!(before.bids[..2], after.bids[..2]);
        assert_ne!(before.bids[2], after.bids[2]);
        // unchanged saves write nothing.
        let blocks = access.len();
        assert_eq!(tree.save(&mut access).unwrap(), root);
        assert_eq!(access.len(), blocks);
    }

    #[test]
    fn test_data_tree_full_and_empty() {
        let mut access = MemBlocks::new();
        let mut tree = DataTree::new(small());
        assert_eq!(tree.delete_last_block(), Err(Error::EmptyTree));
        assert_eq!(tree.get_block(&mut access, 0), Err(Error::InvalidArgument));
        assert_eq!(
            tree.append_data(&mut access, &block(1, 16 * 16 + 1)),
            Err(Error::DataTreeFull)
        );
        assert!(tree.is_empty());
        tree.append_data(&mut access, &block(1, 16 * 16)).unwrap();
        assert_eq!(tree.append_block(&mut access, b"x"), Err(Error::DataTreeFull));
        assert_eq!(tree.root_kind(), DataRoot::XXBlock);
        tree.save(&mut access).unwrap();

        tree.delete();
        assert_eq!(tree.root_kind(), DataRoot::Empty);
        assert_eq!(tree.save(&mut access).unwrap(), 0);
        assert!(access.is_empty());
    }

    /// Fails every write once the budget is used up.
    struct LimitedBlocks {
        inner: MemBlocks,
        writes_left: usize,
    }

    impl BlockAccess for LimitedBlocks {
        fn read_block(&mut self, bid: Bid) -> Result<Vec<u8>> {
            self.inner.read_block(bid)
        }

        fn write_block(&mut self, data: &[u8], internal: bool) -> Result<Bid> {
            if self.writes_left == 0 {
                return Err(Error::FileFull);
            }
            self.writes_left -= 1;
            self.inner.write_block(data, internal)
        }

        fn release_block(&mut self, bid: Bid) -> Result<()> {
            self.inner.release_block(bid)
        }
    }

    #[test]
    fn test_failed_save_leaves_tree_unchanged() {
        let mut access = LimitedBlocks {
            inner: MemBlocks::new(),
            writes_left: usize::MAX,
        };
        let mut tree = DataTree::new(small());
        tree.append_data(&mut access, &block(1, 16 * 6)).unwrap();
        let root = tree.save(&mut access).unwrap();
        // six data blocks and two level-1 lists under one level-2 list.
        assert_eq!(access.inner.len(), 9);

        tree.append_data(&mut access, &block(2, 20)).unwrap();
        // both new data blocks are written, the changed list block is not.
        access.writes_left = 2;
        assert_eq!(tree.save(&mut access), Err(Error::FileFull));
        assert!(tree.is_dirty());
        assert_eq!(tree.stored_root(), root);
        assert_eq!(access.inner.len(), 9);
        let reopened = DataTree::open(&mut access, root, small()).unwrap();
        assert_eq!(reopened.get_data(&mut access).unwrap(), block(1, 16 * 6));

        access.writes_left = usize::MAX;
        let root = tree.save(&mut access).unwrap();
        // old second list and old root replaced, first list reused.
        assert_eq!(access.inner.len(), 8 + 3);
        let mut expected = block(1, 16 * 6);
        expected.extend(block(2, 20));
        let reopened = DataTree::open(&mut access, root, small()).unwrap();
        assert_eq!(reopened.get_data(&mut access).unwrap(), expected);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_stream_matches_model(
            ops in prop::collection::vec((0usize..40, any::<bool>(), any::<bool>()), 1..30),
        ) {
            let mut access = MemBlocks::new();
            let mut tree = DataTree::new(small());
            let mut model: Vec<u8> = vec![];
            for (i, (len, trim, save)) in ops.into_iter().enumerate() {
                let data: Vec<u8> = (0..len).map(|v| (v + i) as u8).collect();
                if tree.append_data(&mut access, &data).is_ok() {
                    model.extend_from_slice(&data);
                }
                if trim && tree.block_count() > 0 {
                    let last = tree.block_count() - 1;
                    let last_len = tree.block_len(last).unwrap();
                    tree.delete_last_block().unwrap();
                    model.truncate(model.len() - last_len);
                }
                prop_assert_eq!(tree.len(), model.len());
                if save {
                    let root = tree.save(&mut access).unwrap();
                    tree = DataTree::open(&mut access, root, small()).unwrap();
                }
            }
            prop_assert_eq!(tree.get_data(&mut access).unwrap(), model.clone());
            let root = tree.save(&mut access).unwrap();
            let reopened = DataTree::open(&mut access, root, small()).unwrap();
            prop_assert_eq!(reopened.get_data(&mut access).unwrap(), model);
            tree.delete();
            prop_assert_eq!(tree.save(&mut access).unwrap(), 0);
            prop_assert!(access.is_empty());
        }
    }
}
