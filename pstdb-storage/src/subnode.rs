//! Subnode tree: a per-node B+Tree keyed by local node id whose values
//! are the roots of the subnode's own data tree and subnode tree.
//!
//! Pages are internal blocks: SLBLOCK leaves and SIBLOCK index pages,
//! both starting with {btype 0x02, level, cEnt u16, padding u32}.
use crate::block::{BlockAccess, MAX_BLOCK_DATA};
use crate::btree::pending::PendingPage;
use crate::btree::{BTree, Page, PagePlacer, PageStore, PendingPages, Slot, TreeRoot};
use crate::error::{Error, Result};
use crate::ids::{Bid, Nid};
use crate::serde::Serde;
use log::trace;
use std::mem;

pub const SUBNODE_BLOCK_TYPE: u8 = 0x02;
const SUBNODE_HEADER_SIZE: usize = 8;
const SL_ENTRY_SIZE: usize = 24;
const SI_ENTRY_SIZE: usize = 16;
pub const SL_FANOUT: usize = (MAX_BLOCK_DATA - SUBNODE_HEADER_SIZE) / SL_ENTRY_SIZE;
pub const SI_FANOUT: usize = (MAX_BLOCK_DATA - SUBNODE_HEADER_SIZE) / SI_ENTRY_SIZE;

/// Leaf value of a subnode tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubnodeEntry {
    pub data: Bid,
    pub sub: Bid,
}

/// Page capacities of a subnode tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnodeLimits {
    pub leaf: usize,
    pub index: usize,
}

impl Default for SubnodeLimits {
    #[inline]
    fn default() -> Self {
        SubnodeLimits {
            leaf: SL_FANOUT,
            index: SI_FANOUT,
        }
    }
}

type SubnodePage<L> = Page<Nid, SubnodeEntry, L>;

fn encode_block(page: &SubnodePage<Bid>) -> Vec<u8> {
    let (count, entry_size) = match page {
        Page::Leaf(entries) => (entries.len(), SL_ENTRY_SIZE),
        Page::Index { entries, .. } => (entries.len(), SI_ENTRY_SIZE),
    };
    let mut buf = vec![0u8; SUBNODE_HEADER_SIZE + count * entry_size];
    let idx = buf.ser_u8(0, SUBNODE_BLOCK_TYPE);
    let idx = buf.ser_u8(idx, page.level());
    let idx = buf.ser_u16(idx, count as u16);
    let mut idx = buf.ser_u32(idx, 0);
    match page {
        Page::Leaf(entries) => {
            for (nid, entry) in entries {
                idx = buf.ser_u64(idx, nid.0 as u64);
                idx = buf.ser_u64(idx, entry.data);
                idx = buf.ser_u64(idx, entry.sub);
            }
        }
        Page::Index { entries, .. } => {
            for (nid, bid) in entries {
                idx = buf.ser_u64(idx, nid.0 as u64);
                idx = buf.ser_u64(idx, *bid);
            }
        }
    }
    buf
}

fn decode_block(data: &[u8]) -> Result<SubnodePage<Bid>> {
    let (idx, btype) = data.deser_u8(0)?;
    let (idx, level) = data.deser_u8(idx)?;
    let (idx, count) = data.deser_u16(idx)?;
    let (mut idx, _) = data.deser_u32(idx)?;
    if btype != SUBNODE_BLOCK_TYPE {
        return Err(Error::InvalidFormat);
    }
    let nid_of = |raw: u64| u32::try_from(raw).map(Nid).map_err(|_| Error::InvalidFormat);
    if level == 0 {
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (i, nid) = data.deser_u64(idx)?;
            let (i, data_bid) = data.deser_u64(i)?;
            let (i, sub) = data.deser_u64(i)?;
            entries.push((nid_of(nid)?, SubnodeEntry { data: data_bid, sub }));
            idx = i;
        }
        Ok(Page::Leaf(entries))
    } else {
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (i, nid) = data.deser_u64(idx)?;
            let (i, bid) = data.deser_u64(i)?;
            entries.push((nid_of(nid)?, bid));
            idx = i;
        }
        Ok(Page::Index { level, entries })
    }
}

/// Page store over subnode blocks.
struct SubnodePages<'a, A> {
    access: &'a mut A,
    pending: &'a mut PendingPages<Nid, SubnodeEntry, Bid>,
    limits: SubnodeLimits,
}

impl<A: BlockAccess> PageStore for SubnodePages<'_, A> {
    type Key = Nid;
    type Value = SubnodeEntry;
    type Loc = Slot<Bid>;

    #[inline]
    fn max_entries(&self, level: u8) -> usize {
        if level == 0 {
            self.limits.leaf
        } else {
            self.limits.index
        }
    }

    fn load(&mut self, loc: Slot<Bid>, level: u8) -> Result<PendingPage<Nid, SubnodeEntry, Bid>> {
        match loc {
            Slot::Pending(id) => self.pending.get(id).cloned(),
            Slot::Stored(bid) => {
                let page = decode_block(&self.access.read_block(bid)?)?;
                if page.level() != level {
                    return Err(Error::InvalidFormat);
                }
                Ok(page.map_loc(Slot::Stored))
            }
        }
    }

    #[inline]
    fn store(
        &mut self,
        prior: Option<Slot<Bid>>,
        page: &PendingPage<Nid, SubnodeEntry, Bid>,
    ) -> Result<Slot<Bid>> {
        Ok(self.pending.put(prior, page))
    }

    #[inline]
    fn free(&mut self, loc: Slot<Bid>, _level: u8) -> Result<()> {
        self.pending.discard(loc);
        Ok(())
    }
}

struct SubnodePlacer<'a, A> {
    access: &'a mut A,
    pending: &'a mut PendingPages<Nid, SubnodeEntry, Bid>,
}

impl<A: BlockAccess> PagePlacer for SubnodePlacer<'_, A> {
    type Key = Nid;
    type Value = SubnodeEntry;
    type Handle = Bid;

    #[inline]
    fn take_pending(&mut self, id: u32) -> Result<PendingPage<Nid, SubnodeEntry, Bid>> {
        self.pending.take(id)
    }

    #[inline]
    fn place(&mut self, page: SubnodePage<Bid>) -> Result<Bid> {
        let bid = self.access.write_block(&encode_block(&page), true)?;
        trace!("place subnode page {:#x}, level={}", bid, page.level());
        Ok(bid)
    }
}

/// Subnode tree of one node.
pub struct SubnodeTree {
    tree: BTree<Slot<Bid>>,
    pending: PendingPages<Nid, SubnodeEntry, Bid>,
    limits: SubnodeLimits,
}

impl SubnodeTree {
    #[inline]
    pub fn new(limits: SubnodeLimits) -> Self {
        SubnodeTree {
            tree: BTree::new(),
            pending: PendingPages::new(),
            limits,
        }
    }

    /// Open a stored subnode tree. A zero id opens an empty tree.
    pub fn open<A: BlockAccess>(access: &mut A, bid: Bid, limits: SubnodeLimits) -> Result<Self> {
        let mut res = SubnodeTree::new(limits);
        if bid != 0 {
            let page = decode_block(&access.read_block(bid)?)?;
            res.tree.set_root(Some(TreeRoot {
                loc: Slot::Stored(bid),
                level: page.level(),
            }));
        }
        Ok(res)
    }

    #[inline]
    fn pages<'a, A: BlockAccess>(
        pending: &'a mut PendingPages<Nid, SubnodeEntry, Bid>,
        access: &'a mut A,
        limits: SubnodeLimits,
    ) -> SubnodePages<'a, A> {
        SubnodePages {
            access,
            pending,
            limits,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Whether the tree holds modifications not saved yet.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        matches!(self.tree.root(), Some(TreeRoot { loc: Slot::Pending(_), .. }))
            || !self.pending.is_empty()
    }

    /// Root id as last stored, 0 if empty.
    #[inline]
    pub fn stored_root(&self) -> Bid {
        match self.tree.root() {
            Some(TreeRoot {
                loc: Slot::Stored(bid),
                ..
            }) => bid,
            _ => 0,
        }
    }

    #[inline]
    pub fn get<A: BlockAccess>(&mut self, access: &mut A, nid: Nid) -> Result<Option<SubnodeEntry>> {
        let mut pages = Self::pages(&mut self.pending, access, self.limits);
        self.tree.get(&mut pages, nid)
    }

    #[inline]
    pub fn insert<A: BlockAccess>(&mut self, access: &mut A, nid: Nid, entry: SubnodeEntry) -> Result<()> {
        let mut pages = Self::pages(&mut self.pending, access, self.limits);
        self.tree.insert(&mut pages, nid, entry)
    }

    #[inline]
    pub fn update<A: BlockAccess>(&mut self, access: &mut A, nid: Nid, entry: SubnodeEntry) -> Result<bool> {
        let mut pages = Self::pages(&mut self.pending, access, self.limits);
        self.tree.update(&mut pages, nid, entry)
    }

    #[inline]
    pub fn upsert<A: BlockAccess>(&mut self, access: &mut A, nid: Nid, entry: SubnodeEntry) -> Result<()> {
        let mut pages = Self::pages(&mut self.pending, access, self.limits);
        self.tree.upsert(&mut pages, nid, entry)
    }

    #[inline]
    pub fn delete<A: BlockAccess>(&mut self, access: &mut A, nid: Nid) -> Result<Option<SubnodeEntry>> {
        let mut pages = Self::pages(&mut self.pending, access, self.limits);
        self.tree.delete(&mut pages, nid)
    }

    #[inline]
    pub fn entries<A: BlockAccess>(&mut self, access: &mut A) -> Result<Vec<(Nid, SubnodeEntry)>> {
        let mut pages = Self::pages(&mut self.pending, access, self.limits);
        self.tree.entries(&mut pages)
    }

    /// Verify structure and return number of entries.
    #[inline]
    pub fn check<A: BlockAccess>(&mut self, access: &mut A) -> Result<usize> {
        let mut pages = Self::pages(&mut self.pending, access, self.limits);
        self.tree.check(&mut pages)
    }

    /// Write pending pages and release superseded ones. Returns root id.
    pub fn save<A: BlockAccess>(&mut self, access: &mut A) -> Result<Bid> {
        let mut placer = SubnodePlacer {
            access: &mut *access,
            pending: &mut self.pending,
        };
        let root = self.tree.flush(&mut placer)?;
        for bid in self.pending.take_superseded() {
            access.release_block(bid)?;
        }
        Ok(root.map(|r| r.loc).unwrap_or(0))
    }

    /// Release every page of the tree. Subnodes referenced by entries
    /// are left to the caller.
    pub fn destroy<A: BlockAccess>(&mut self, access: &mut A) -> Result<()> {
        let mut pages = Self::pages(&mut self.pending, access, self.limits);
        self.tree.destroy(&mut pages)?;
        for bid in mem::take(&mut self.pending).take_superseded() {
            access.release_block(bid)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlocks;
    use crate::ids::{bid_is_internal, NidType};

    fn nid(i: u32) -> Nid {
        Nid::new(NidType::LocalDescriptor, i)
    }

    fn entry(i: u32) -> SubnodeEntry {
        SubnodeEntry {
            data: i as u64 * 4 + 4,
            sub: 0,
        }
    }

    #[test]
    fn test_fanout() {
        assert_eq!(SL_FANOUT, 340);
        assert_eq!(SI_FANOUT, 510);
    }

    #[test]
    fn test_block_codec() {
        let leaf: SubnodePage<Bid> = Page::Leaf(vec![(nid(1), entry(1)), (nid(2), entry(2))]);
        let data = encode_block(&leaf);
        assert_eq!(data.len(), 8 + 2 * 24);
        assert_eq!(&data[..4], &[0x02, 0, 2, 0]);
        assert_eq!(decode_block(&data).unwrap(), leaf);
        let index: SubnodePage<Bid> = Page::Index {
            level: 1,
            entries: vec![(nid(1), 0x06), (nid(9), 0x0A)],
        };
        let data = encode_block(&index);
        assert_eq!(data.len(), 8 + 2 * 16);
        assert_eq!(decode_block(&data).unwrap(), index);
        assert_eq!(decode_block(&[0x01, 0, 0, 0, 0, 0, 0, 0]), Err(Error::InvalidFormat));
        assert_eq!(decode_block(&data[..20]), Err(Error::InvalidFormat));
    }

    #[test]
    fn test_subnode_tree_save_and_reopen() {
        let mut access = MemBlocks::new();
        let limits = SubnodeLimits { leaf: 4, index: 3 };
        let mut tree = SubnodeTree::new(limits);
        assert_eq!(tree.save(&mut access).unwrap(), 0);
        for i in 0..30 {
            tree.insert(&mut access, nid(i), entry(i)).unwrap();
        }
        assert!(tree.is_dirty());
        let root = tree.save(&mut access).unwrap();
        assert!(bid_is_internal(root));
        assert!(!tree.is_dirty());
        assert_eq!(tree.stored_root(), root);
        let pages = access.len();

        let mut reopened = SubnodeTree::open(&mut access, root, limits).unwrap();
        assert_eq!(reopened.check(&mut access).unwrap(), 30);
        assert_eq!(reopened.get(&mut access, nid(17)).unwrap(), Some(entry(17)));
        assert_eq!(reopened.get(&mut access, nid(99)).unwrap(), None);

        // one update rewrites the path to the root and releases the old pages.
        assert!(reopened
            .update(&mut access, nid(17), SubnodeEntry { data: 8, sub: 12 })
            .unwrap());
        let new_root = reopened.save(&mut access).unwrap();
        assert_ne!(new_root, root);
        assert_eq!(access.len(), pages);
        assert!(!access.contains(root));

        for i in 0..30 {
            assert!(reopened.delete(&mut access, nid(i)).unwrap().is_some());
        }
        assert_eq!(reopened.save(&mut access).unwrap(), 0);
        assert!(access.is_empty());
    }

    #[test]
    fn test_subnode_tree_destroy() {
        let mut access = MemBlocks::new();
        let limits = SubnodeLimits { leaf: 3, index: 3 };
        let mut tree = SubnodeTree::new(limits);
        for i in 0..20 {
            tree.insert(&mut access, nid(i), entry(i)).unwrap();
        }
        tree.save(&mut access).unwrap();
        tree.insert(&mut access, nid(100), entry(100)).unwrap();
        tree.destroy(&mut access).unwrap();
        assert!(tree.is_empty());
        assert!(access.is_empty());
    }
}
