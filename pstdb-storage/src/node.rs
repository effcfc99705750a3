//! A node is a data tree plus a subnode tree. Subnodes are nodes
//! themselves, nested to any depth.
use crate::block::BlockAccess;
use crate::data_tree::{DataTree, DataTreeLimits};
use crate::error::{Error, Result};
use crate::ids::{Bid, Nid};
use crate::subnode::{SubnodeEntry, SubnodeLimits, SubnodeTree};

/// Shape of the trees of a node and its subnodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeLimits {
    pub data: DataTreeLimits,
    pub subnode: SubnodeLimits,
}

pub struct Node {
    nid: Nid,
    limits: NodeLimits,
    data: DataTree,
    subnodes: SubnodeTree,
    // roots as last stored, used to detect replaced entries.
    stored: SubnodeEntry,
}

impl Node {
    /// Create an empty node.
    #[inline]
    pub fn new(nid: Nid, limits: NodeLimits) -> Self {
        Node {
            nid,
            limits,
            data: DataTree::new(limits.data),
            subnodes: SubnodeTree::new(limits.subnode),
            stored: SubnodeEntry::default(),
        }
    }

    /// Open a node from its stored roots.
    pub fn open<A: BlockAccess>(
        access: &mut A,
        nid: Nid,
        data: Bid,
        sub: Bid,
        limits: NodeLimits,
    ) -> Result<Self> {
        Ok(Node {
            nid,
            limits,
            data: DataTree::open(access, data, limits.data)?,
            subnodes: SubnodeTree::open(access, sub, limits.subnode)?,
            stored: SubnodeEntry { data, sub },
        })
    }

    #[inline]
    pub fn nid(&self) -> Nid {
        self.nid
    }

    #[inline]
    pub fn limits(&self) -> NodeLimits {
        self.limits
    }

    #[inline]
    pub fn data(&self) -> &DataTree {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut DataTree {
        &mut self.data
    }

    #[inline]
    pub fn subnodes(&self) -> &SubnodeTree {
        &self.subnodes
    }

    /// Roots as last opened or saved.
    #[inline]
    pub fn stored_roots(&self) -> (Bid, Bid) {
        (self.stored.data, self.stored.sub)
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.data.is_dirty() || self.subnodes.is_dirty()
    }

    /// Create an empty subnode sharing the limits of this node. It is
    /// attached by `put_subnode`.
    #[inline]
    pub fn create_subnode(&self, nid: Nid) -> Node {
        Node::new(nid, self.limits)
    }

    /// Open a subnode, `None` if absent.
    pub fn subnode<A: BlockAccess>(&mut self, access: &mut A, nid: Nid) -> Result<Option<Node>> {
        match self.subnodes.get(access, nid)? {
            None => Ok(None),
            Some(entry) => Node::open(access, nid, entry.data, entry.sub, self.limits).map(Some),
        }
    }

    /// Local ids of all direct subnodes.
    #[inline]
    pub fn subnode_ids<A: BlockAccess>(&mut self, access: &mut A) -> Result<Vec<Nid>> {
        Ok(self
            .subnodes
            .entries(access)?
            .into_iter()
            .map(|(nid, _)| nid)
            .collect())
    }

    /// Save a subnode and record its roots. A subnode which was not
    /// opened from the current entry of its id fails with `DuplicateKey`.
    pub fn put_subnode<A: BlockAccess>(&mut self, access: &mut A, sub: &mut Node) -> Result<()> {
        let current = self.subnodes.get(access, sub.nid)?;
        if current.unwrap_or_default() != sub.stored {
            return Err(Error::DuplicateKey);
        }
        let (data, subs) = sub.save(access)?;
        let entry = SubnodeEntry { data, sub: subs };
        if current != Some(entry) {
            self.subnodes.upsert(access, sub.nid, entry)?;
        }
        Ok(())
    }

    /// Remove a subnode and release all of its storage.
    pub fn remove_subnode<A: BlockAccess>(&mut self, access: &mut A, nid: Nid) -> Result<bool> {
        let Some(entry) = self.subnodes.delete(access, nid)? else {
            return Ok(false);
        };
        Node::open(access, nid, entry.data, entry.sub, self.limits)?.destroy(access)?;
        Ok(true)
    }

    /// Save data tree and subnode tree. Returns their roots.
    pub fn save<A: BlockAccess>(&mut self, access: &mut A) -> Result<(Bid, Bid)> {
        let data = self.data.save(access)?;
        let sub = self.subnodes.save(access)?;
        self.stored = SubnodeEntry { data, sub };
        Ok((data, sub))
    }

    /// Release the storage of this node and all nested subnodes.
    pub fn destroy<A: BlockAccess>(mut self, access: &mut A) -> Result<()> {
        for (nid, entry) in self.subnodes.entries(access)? {
            Node::open(access, nid, entry.data, entry.sub, self.limits)?.destroy(access)?;
        }
        self.subnodes.destroy(access)?;
        self.data.delete();
        self.data.save(access)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlocks;
    use crate::ids::NidType;

    fn limits() -> NodeLimits {
        NodeLimits {
            data: DataTreeLimits::new(64, 4).unwrap(),
            subnode: SubnodeLimits { leaf: 3, index: 3 },
        }
    }

    fn local(i: u32) -> Nid {
        Nid::new(NidType::LocalDescriptor, i)
    }

    #[test]
    fn test_nested_subnodes() {
        let mut access = MemBlocks::new();
        let mut root = Node::new(Nid::new(NidType::NormalMessage, 0x400), limits());
        root.data_mut().append_data(&mut access, b"message body").unwrap();
        for i in 1..=5 {
            let mut sub = root.create_subnode(local(i));
            sub.data_mut()
                .append_data(&mut access, &vec![i as u8; 100])
                .unwrap();
            let mut nested = sub.create_subnode(local(100 + i));
            nested
                .data_mut()
                .append_data(&mut access, b"nested")
                .unwrap();
            sub.put_subnode(&mut access, &mut nested).unwrap();
            root.put_subnode(&mut access, &mut sub).unwrap();
        }
        let (data, sub) = root.save(&mut access).unwrap();
        assert_ne!(data, 0);
        assert_ne!(sub, 0);
        assert!(!root.is_dirty());

        let mut reopened = Node::open(&mut access, root.nid(), data, sub, limits()).unwrap();
        assert_eq!(reopened.data().get_data(&mut access).unwrap(), b"message body");
        assert_eq!(
            reopened.subnode_ids(&mut access).unwrap(),
            (1..=5).map(local).collect::<Vec<_>>()
        );
        let mut third = reopened.subnode(&mut access, local(3)).unwrap().unwrap();
        assert_eq!(third.data().get_data(&mut access).unwrap(), vec![3u8; 100]);
        let nested = third.subnode(&mut access, local(103)).unwrap().unwrap();
        assert_eq!(nested.data().get_data(&mut access).unwrap(), b"nested");
        assert!(reopened.subnode(&mut access, local(9)).unwrap().is_none());
    }

    #[test]
    fn test_put_subnode_replaces_only_its_own_entry() {
        let mut access = MemBlocks::new();
        let mut root = Node::new(Nid(0x21), limits());
        let mut sub = root.create_subnode(local(1));
        sub.data_mut().append_data(&mut access, b"one").unwrap();
        root.put_subnode(&mut access, &mut sub).unwrap();

        // a stale or fresh node for an existing id is rejected.
        let mut fresh = root.create_subnode(local(1));
        assert_eq!(
            root.put_subnode(&mut access, &mut fresh),
            Err(Error::DuplicateKey)
        );

        // the node which was put keeps tracking the entry.
        sub.data_mut().append_data(&mut access, b" two").unwrap();
        root.put_subnode(&mut access, &mut sub).unwrap();
        let mut again = root.subnode(&mut access, local(1)).unwrap().unwrap();
        assert_eq!(again.data().get_data(&mut access).unwrap(), b"one two");
        again.data_mut().delete();
        root.put_subnode(&mut access, &mut again).unwrap();
        let emptied = root.subnode(&mut access, local(1)).unwrap().unwrap();
        assert!(emptied.data().is_empty());
    }

    #[test]
    fn test_remove_and_destroy_release_everything() {
        let mut access = MemBlocks::new();
        let mut root = Node::new(Nid(0x22), limits());
        for i in 1..=6 {
            let mut sub = root.create_subnode(local(i));
            sub.data_mut()
                .append_data(&mut access, &vec![0xAB; 300])
                .unwrap();
            let mut nested = sub.create_subnode(local(50 + i));
            nested.data_mut().append_data(&mut access, b"x").unwrap();
            sub.put_subnode(&mut access, &mut nested).unwrap();
            root.put_subnode(&mut access, &mut sub).unwrap();
        }
        root.save(&mut access).unwrap();
        assert!(root.remove_subnode(&mut access, local(2)).unwrap());
        assert!(!root.remove_subnode(&mut access, local(2)).unwrap());
        root.save(&mut access).unwrap();
        assert_eq!(root.subnode_ids(&mut access).unwrap().len(), 5);

        root.destroy(&mut access).unwrap();
        assert!(access.is_empty());
    }
}
