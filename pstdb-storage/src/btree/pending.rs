//! Buffer of tree pages modified since the last save.
//!
//! Pages are never rewritten in place: the first modification of a
//! stored page moves it into the buffer under a pending slot and
//! records the stored handle as superseded. Later modifications of
//! the same page overwrite the pending copy and keep the slot, which
//! stops the cascade of parent updates. The save pass places pending
//! pages children first and only then frees superseded storage.
use crate::btree::page::Page;
use crate::btree::{BTree, TreeRoot};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// Location of a page which is either stored or still in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot<H> {
    Stored(H),
    Pending(u32),
}

impl<H: Copy> Slot<H> {
    #[inline]
    pub fn stored(self) -> Option<H> {
        match self {
            Slot::Stored(h) => Some(h),
            Slot::Pending(_) => None,
        }
    }
}

pub type PendingPage<K, V, H> = Page<K, V, Slot<H>>;

pub struct PendingPages<K, V, H> {
    pages: HashMap<u32, PendingPage<K, V, H>>,
    next_id: u32,
    superseded: Vec<H>,
}

impl<K: Copy, V: Clone, H: Copy> Default for PendingPages<K, V, H> {
    #[inline]
    fn default() -> Self {
        PendingPages {
            pages: HashMap::new(),
            next_id: 0,
            superseded: vec![],
        }
    }
}

impl<K: Copy, V: Clone, H: Copy> PendingPages<K, V, H> {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending pages.
    #[inline]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    #[inline]
    pub fn get(&self, id: u32) -> Result<&PendingPage<K, V, H>> {
        self.pages.get(&id).ok_or(Error::InvalidArgument)
    }

    /// Buffer a modified page. `prior` is the slot the page was loaded
    /// from, `None` for a new page.
    #[inline]
    pub fn put(&mut self, prior: Option<Slot<H>>, page: &PendingPage<K, V, H>) -> Slot<H> {
        match prior {
            Some(Slot::Pending(id)) => {
                self.pages.insert(id, page.clone());
                Slot::Pending(id)
            }
            Some(Slot::Stored(handle)) => {
                self.superseded.push(handle);
                self.add(page)
            }
            None => self.add(page),
        }
    }

    #[inline]
    fn add(&mut self, page: &PendingPage<K, V, H>) -> Slot<H> {
        let id = self.next_id;
        self.next_id += 1;
        self.pages.insert(id, page.clone());
        Slot::Pending(id)
    }

    /// Drop a page from the tree.
    #[inline]
    pub fn discard(&mut self, slot: Slot<H>) {
        match slot {
            Slot::Pending(id) => {
                self.pages.remove(&id);
            }
            Slot::Stored(handle) => self.superseded.push(handle),
        }
    }

    /// Remove a page for placement.
    #[inline]
    pub fn take(&mut self, id: u32) -> Result<PendingPage<K, V, H>> {
        self.pages.remove(&id).ok_or(Error::InvalidArgument)
    }

    /// Storage which is no longer referenced once pending pages are placed.
    #[inline]
    pub fn take_superseded(&mut self) -> Vec<H> {
        std::mem::take(&mut self.superseded)
    }
}

/// Places pending pages during the save pass.
pub trait PagePlacer {
    type Key: Copy;
    type Value;
    type Handle: Copy + Eq + fmt::Debug;

    fn take_pending(&mut self, id: u32) -> Result<PendingPage<Self::Key, Self::Value, Self::Handle>>;

    /// Write a page whose children are all placed, returns its handle.
    fn place(&mut self, page: Page<Self::Key, Self::Value, Self::Handle>) -> Result<Self::Handle>;
}

impl<H: Copy + Eq + fmt::Debug> BTree<Slot<H>> {
    /// Place every pending page, children before parents, and return
    /// the stored root.
    pub fn flush<P: PagePlacer<Handle = H>>(&mut self, placer: &mut P) -> Result<Option<TreeRoot<H>>> {
        let Some(root) = self.root() else {
            return Ok(None);
        };
        let handle = match root.loc {
            Slot::Stored(handle) => handle,
            Slot::Pending(id) => place_page(placer, id)?,
        };
        self.set_root(Some(TreeRoot {
            loc: Slot::Stored(handle),
            level: root.level,
        }));
        Ok(Some(TreeRoot {
            loc: handle,
            level: root.level,
        }))
    }
}

fn place_page<P: PagePlacer>(placer: &mut P, id: u32) -> Result<P::Handle> {
    let page = match placer.take_pending(id)? {
        Page::Leaf(entries) => Page::Leaf(entries),
        Page::Index { level, entries } => {
            let mut placed = Vec::with_capacity(entries.len());
            for (key, slot) in entries {
                let handle = match slot {
                    Slot::Stored(handle) => handle,
                    Slot::Pending(child) => place_page(placer, child)?,
                };
                placed.push((key, handle));
            }
            Page::Index {
                level,
                entries: placed,
            }
        }
    };
    placer.place(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_pages() {
        let mut pending: PendingPages<u32, u32, u64> = PendingPages::new();
        let page = Page::Leaf(vec![(1, 10)]);
        let slot = pending.put(None, &page);
        assert_eq!(slot, Slot::Pending(0));
        // rewriting a pending page keeps its slot.
        let page2 = Page::Leaf(vec![(1, 10), (2, 20)]);
        assert_eq!(pending.put(Some(slot), &page2), slot);
        assert_eq!(pending.get(0).unwrap(), &page2);

        // rewriting a stored page supersedes it.
        let slot2 = pending.put(Some(Slot::Stored(0x4400)), &page);
        assert_eq!(slot2, Slot::Pending(1));
        pending.discard(Slot::Stored(0x4800));
        pending.discard(slot2);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.take_superseded(), vec![0x4400, 0x4800]);
        assert!(pending.take_superseded().is_empty());
        assert!(pending.take(1).is_err());
        assert_eq!(pending.take(0).unwrap(), page2);
        assert!(pending.is_empty());
    }
}
