//! Generic copy-on-write B+Tree.
//!
//! One engine backs every tree of the node database. The tree only
//! holds its root; pages are loaded from and written to a `PageStore`
//! which decides where pages live (file pages, subnode blocks or heap
//! items) and how they are encoded.
//!
//! Invariants maintained by every operation:
//!
//! 1. Keys inside a page are strictly ascending.
//! 2. The key of an index entry equals the minimum key under its child.
//! 3. Only the root page may be empty, and an empty root is dropped.
//!
//! Writes are copy-on-write: storing a page may move it, so the parent
//! entry is repointed and the parent itself is stored again, up to the
//! root. The cascade stops as soon as a parent entry is left unchanged.
//! Parents are never referenced from children, each modification keeps
//! the path of ancestors it descended through on its own stack.
pub mod cache;
pub mod page;
pub mod pending;
pub mod store;

pub use cache::PageCache;
pub use page::{decode_page, encode_page, Page, PageCodec};
pub use pending::{PagePlacer, PendingPages, Slot};

use crate::error::{Error, Result};
use log::debug;
use std::fmt;

/// Storage of tree pages.
pub trait PageStore {
    type Key: Copy + Ord + fmt::Debug;
    type Value: Clone + fmt::Debug;
    type Loc: Copy + Eq + fmt::Debug;

    /// Capacity of a page at given level.
    fn max_entries(&self, level: u8) -> usize;

    /// Load page at given location. `level` is the level the caller
    /// expects the page to have.
    fn load(
        &mut self,
        loc: Self::Loc,
        level: u8,
    ) -> Result<Page<Self::Key, Self::Value, Self::Loc>>;

    /// Store a page. `prior` is the location the page was loaded from,
    /// `None` for a new page. Returns the location of the page, which
    /// may equal `prior`.
    fn store(
        &mut self,
        prior: Option<Self::Loc>,
        page: &Page<Self::Key, Self::Value, Self::Loc>,
    ) -> Result<Self::Loc>;

    /// Release a page which is no longer part of the tree.
    fn free(&mut self, loc: Self::Loc, level: u8) -> Result<()>;
}

pub type StorePage<S> =
    Page<<S as PageStore>::Key, <S as PageStore>::Value, <S as PageStore>::Loc>;

/// Location and level of the root page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeRoot<L> {
    pub loc: L,
    pub level: u8,
}

/// B+Tree identified by its root. `None` means the tree is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTree<L> {
    root: Option<TreeRoot<L>>,
}

impl<L> Default for BTree<L> {
    #[inline]
    fn default() -> Self {
        BTree { root: None }
    }
}

/// Effect of storing a page, applied to its parent entry.
enum Change<K, L> {
    Updated { key: K, loc: L },
    Split { left: (K, L), right: (K, L) },
    Removed,
}

struct Frame<K, V, L> {
    loc: L,
    page: Page<K, V, L>,
    // child position in index page, search position in leaf page.
    idx: usize,
}

type StoreFrame<S> =
    Frame<<S as PageStore>::Key, <S as PageStore>::Value, <S as PageStore>::Loc>;

impl<L: Copy + Eq + fmt::Debug> BTree<L> {
    #[inline]
    pub fn new() -> Self {
        BTree { root: None }
    }

    #[inline]
    pub fn with_root(root: Option<TreeRoot<L>>) -> Self {
        BTree { root }
    }

    #[inline]
    pub fn root(&self) -> Option<TreeRoot<L>> {
        self.root
    }

    #[inline]
    pub fn set_root(&mut self, root: Option<TreeRoot<L>>) {
        self.root = root;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Returns the leaf page which holds the key if present.
    pub fn find_leaf<S: PageStore<Loc = L>>(
        &self,
        store: &mut S,
        key: S::Key,
    ) -> Result<Option<(L, Vec<(S::Key, S::Value)>)>> {
        let Some(mut path) = self.descend(store, key)? else {
            return Ok(None);
        };
        let leaf = pop_leaf(&mut path)?;
        match leaf.page {
            Page::Leaf(entries) => Ok(Some((leaf.loc, entries))),
            Page::Index { .. } => Err(Error::InvalidFormat),
        }
    }

    /// Lookup value of given key.
    pub fn get<S: PageStore<Loc = L>>(&self, store: &mut S, key: S::Key) -> Result<Option<S::Value>> {
        let Some((_, entries)) = self.find_leaf(store, key)? else {
            return Ok(None);
        };
        Ok(entries
            .binary_search_by(|e| e.0.cmp(&key))
            .ok()
            .map(|idx| entries[idx].1.clone()))
    }

    /// Insert a new key. Inserting an existing key fails with `DuplicateKey`.
    pub fn insert<S: PageStore<Loc = L>>(
        &mut self,
        store: &mut S,
        key: S::Key,
        value: S::Value,
    ) -> Result<()> {
        let Some(mut path) = self.descend(store, key)? else {
            let loc = store.store(None, &Page::Leaf(vec![(key, value)]))?;
            self.root = Some(TreeRoot { loc, level: 0 });
            return Ok(());
        };
        let mut leaf = pop_leaf(&mut path)?;
        let Page::Leaf(entries) = &mut leaf.page else {
            return Err(Error::InvalidFormat);
        };
        if entries.get(leaf.idx).is_some_and(|e| e.0 == key) {
            return Err(Error::DuplicateKey);
        }
        entries.insert(leaf.idx, (key, value));
        let change = write_page(store, leaf.loc, leaf.page)?;
        self.propagate(store, path, change)
    }

    /// Replace value of an existing key. Returns false if key not found.
    pub fn update<S: PageStore<Loc = L>>(
        &mut self,
        store: &mut S,
        key: S::Key,
        value: S::Value,
    ) -> Result<bool> {
        let Some(mut path) = self.descend(store, key)? else {
            return Ok(false);
        };
        let mut leaf = pop_leaf(&mut path)?;
        let Page::Leaf(entries) = &mut leaf.page else {
            return Err(Error::InvalidFormat);
        };
        match entries.get_mut(leaf.idx) {
            Some(e) if e.0 == key => e.1 = value,
            _ => return Ok(false),
        }
        let change = write_page(store, leaf.loc, leaf.page)?;
        self.propagate(store, path, change)?;
        Ok(true)
    }

    /// Insert or replace value of given key.
    pub fn upsert<S: PageStore<Loc = L>>(
        &mut self,
        store: &mut S,
        key: S::Key,
        value: S::Value,
    ) -> Result<()> {
        if self.update(store, key, value.clone())? {
            return Ok(());
        }
        self.insert(store, key, value)
    }

    /// Delete a key. Returns its value, or `None` if key not found.
    pub fn delete<S: PageStore<Loc = L>>(
        &mut self,
        store: &mut S,
        key: S::Key,
    ) -> Result<Option<S::Value>> {
        let Some(mut path) = self.descend(store, key)? else {
            return Ok(None);
        };
        let mut leaf = pop_leaf(&mut path)?;
        let Page::Leaf(entries) = &mut leaf.page else {
            return Err(Error::InvalidFormat);
        };
        if !entries.get(leaf.idx).is_some_and(|e| e.0 == key) {
            return Ok(None);
        }
        let (_, value) = entries.remove(leaf.idx);
        let change = write_page(store, leaf.loc, leaf.page)?;
        self.propagate(store, path, change)?;
        Ok(Some(value))
    }

    /// All entries in key order.
    pub fn entries<S: PageStore<Loc = L>>(&self, store: &mut S) -> Result<Vec<(S::Key, S::Value)>> {
        let mut res = vec![];
        self.walk(store, |_, page| {
            if let Page::Leaf(entries) = page {
                res.extend(entries.iter().cloned());
            }
            Ok(())
        })?;
        Ok(res)
    }

    /// Visit every page, parents before children and children in key order.
    pub fn walk<S, F>(&self, store: &mut S, mut f: F) -> Result<()>
    where
        S: PageStore<Loc = L>,
        F: FnMut(L, &StorePage<S>) -> Result<()>,
    {
        let Some(root) = self.root else {
            return Ok(());
        };
        let mut stack = vec![(root.loc, root.level)];
        while let Some((loc, level)) = stack.pop() {
            let page = store.load(loc, level)?;
            if page.level() != level {
                return Err(Error::InvalidFormat);
            }
            f(loc, &page)?;
            if let Page::Index { level, entries } = &page {
                if *level == 0 {
                    return Err(Error::InvalidFormat);
                }
                stack.extend(entries.iter().rev().map(|e| (e.1, level - 1)));
            }
        }
        Ok(())
    }

    /// Verify structural invariants of the whole tree and return number
    /// of entries.
    pub fn check<S: PageStore<Loc = L>>(&self, store: &mut S) -> Result<usize> {
        match self.root {
            None => Ok(0),
            Some(root) => check_page(store, root.loc, root.level, true).map(|(_, count)| count),
        }
    }

    /// Free every page and leave the tree empty.
    pub fn destroy<S: PageStore<Loc = L>>(&mut self, store: &mut S) -> Result<()> {
        let mut pages = vec![];
        self.walk(store, |loc, page| {
            pages.push((loc, page.level()));
            Ok(())
        })?;
        for (loc, level) in pages {
            store.free(loc, level)?;
        }
        self.root = None;
        Ok(())
    }

    /// Descend to the leaf which may hold the key, recording every page
    /// on the way. Returns `None` if the tree is empty.
    fn descend<S: PageStore<Loc = L>>(
        &self,
        store: &mut S,
        key: S::Key,
    ) -> Result<Option<Vec<StoreFrame<S>>>> {
        let Some(root) = self.root else {
            return Ok(None);
        };
        let mut path = Vec::with_capacity(root.level as usize + 1);
        let mut loc = root.loc;
        let mut level = root.level;
        loop {
            let page = store.load(loc, level)?;
            if page.level() != level {
                return Err(Error::InvalidFormat);
            }
            let (idx, child) = match &page {
                Page::Leaf(entries) => {
                    let idx = match entries.binary_search_by(|e| e.0.cmp(&key)) {
                        Ok(idx) | Err(idx) => idx,
                    };
                    (idx, None)
                }
                Page::Index { entries, .. } => {
                    if entries.is_empty() || level == 0 {
                        return Err(Error::InvalidFormat);
                    }
                    let idx = child_index(entries, &key);
                    (idx, Some(entries[idx].1))
                }
            };
            path.push(Frame { loc, page, idx });
            match child {
                None => return Ok(Some(path)),
                Some(child) => {
                    loc = child;
                    level -= 1;
                }
            }
        }
    }

    /// Apply the change of a stored child to its ancestors.
    fn propagate<S: PageStore<Loc = L>>(
        &mut self,
        store: &mut S,
        mut path: Vec<StoreFrame<S>>,
        mut change: Change<S::Key, L>,
    ) -> Result<()> {
        let mut single_child = None;
        while let Some(mut frame) = path.pop() {
            let Page::Index { entries, .. } = &mut frame.page else {
                return Err(Error::InvalidFormat);
            };
            let idx = frame.idx;
            match change {
                Change::Updated { key, loc } => {
                    if entries[idx] == (key, loc) {
                        return Ok(());
                    }
                    entries[idx] = (key, loc);
                }
                Change::Split { left, right } => {
                    entries[idx] = left;
                    entries.insert(idx + 1, right);
                }
                Change::Removed => {
                    entries.remove(idx);
                }
            }
            if path.is_empty() && entries.len() == 1 {
                single_child = Some(entries[0].1);
            }
            change = write_page(store, frame.loc, frame.page)?;
        }
        let Some(root) = self.root else {
            return Err(Error::EmptyTree);
        };
        match change {
            Change::Updated { loc, .. } => {
                self.root = Some(TreeRoot {
                    loc,
                    level: root.level,
                });
                if let Some(child) = single_child {
                    self.collapse_root(store, child)?;
                }
            }
            Change::Split { left, right } => {
                let level = root.level + 1;
                let page = Page::Index {
                    level,
                    entries: vec![left, right],
                };
                let loc = store.store(None, &page)?;
                self.root = Some(TreeRoot { loc, level });
                debug!("btree root split, level={}", level);
            }
            Change::Removed => {
                self.root = None;
            }
        }
        Ok(())
    }

    /// Replace an index root holding a single child by that child.
    fn collapse_root<S: PageStore<Loc = L>>(&mut self, store: &mut S, mut child: L) -> Result<()> {
        while let Some(root) = self.root {
            if root.level == 0 {
                break;
            }
            store.free(root.loc, root.level)?;
            let level = root.level - 1;
            self.root = Some(TreeRoot { loc: child, level });
            debug!("btree root collapsed, level={}", level);
            if level == 0 {
                break;
            }
            match store.load(child, level)? {
                Page::Index { entries, .. } if entries.len() == 1 => child = entries[0].1,
                _ => break,
            }
        }
        Ok(())
    }
}

/// Position of the rightmost entry whose key is not greater than the
/// target, or the first entry if every key is greater.
#[inline]
fn child_index<K: Ord, L>(entries: &[(K, L)], key: &K) -> usize {
    match entries.binary_search_by(|e| e.0.cmp(key)) {
        Ok(idx) => idx,
        Err(0) => 0,
        Err(idx) => idx - 1,
    }
}

#[inline]
fn pop_leaf<F>(path: &mut Vec<F>) -> Result<F> {
    path.pop().ok_or(Error::EmptyTree)
}

/// Store a modified page, splitting it if it overflows and freeing it
/// if it became empty.
fn write_page<S: PageStore>(
    store: &mut S,
    loc: S::Loc,
    mut page: StorePage<S>,
) -> Result<Change<S::Key, S::Loc>> {
    let level = page.level();
    if page.is_empty() {
        store.free(loc, level)?;
        return Ok(Change::Removed);
    }
    if page.len() > store.max_entries(level) {
        // lower half keeps the location, upper half is a new page.
        // The new page is placed first so a failed allocation leaves
        // the stored page untouched.
        let right = page.split_off(page.len() / 2);
        let left_key = page.first_key().ok_or(Error::InvalidFormat)?;
        let right_key = right.first_key().ok_or(Error::InvalidFormat)?;
        let right_loc = store.store(None, &right)?;
        let left_loc = match store.store(Some(loc), &page) {
            Ok(loc) => loc,
            Err(err) => {
                store.free(right_loc, level)?;
                return Err(err);
            }
        };
        return Ok(Change::Split {
            left: (left_key, left_loc),
            right: (right_key, right_loc),
        });
    }
    let key = page.first_key().ok_or(Error::InvalidFormat)?;
    let loc = store.store(Some(loc), &page)?;
    Ok(Change::Updated { key, loc })
}

fn check_page<S: PageStore>(
    store: &mut S,
    loc: S::Loc,
    level: u8,
    is_root: bool,
) -> Result<(Option<S::Key>, usize)> {
    let page = store.load(loc, level)?;
    if page.level() != level
        || (!is_root && page.is_empty())
        || page.len() > store.max_entries(level)
    {
        return Err(Error::InvalidFormat);
    }
    let first = page.first_key();
    match page {
        Page::Leaf(entries) => {
            if !entries.windows(2).all(|w| w[0].0 < w[1].0) {
                return Err(Error::InvalidFormat);
            }
            Ok((first, entries.len()))
        }
        Page::Index { level, entries } => {
            if level == 0 || !entries.windows(2).all(|w| w[0].0 < w[1].0) {
                return Err(Error::InvalidFormat);
            }
            let mut total = 0;
            for (key, child) in entries {
                let (min, count) = check_page(store, child, level - 1, false)?;
                if min != Some(key) {
                    return Err(Error::InvalidFormat);
                }
                total += count;
            }
            Ok((first, total))
        }
    }
}
