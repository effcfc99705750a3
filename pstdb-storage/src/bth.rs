//! BTree-on-Heap: the generic B+Tree with its pages stored as heap
//! items.
//!
//! The tree is described by a header item {bType 0xB5, cbKey, cbEnt,
//! bIdxLevels, hidRoot}. Leaf items hold packed fixed-width records,
//! index items hold packed {key, hid} pairs. Keys are 2, 4 or 8 bytes
//! wide and compare as unsigned integers. A zero root means the tree is
//! empty.
use crate::btree::{BTree, Page, PageCache, PageStore, TreeRoot};
use crate::error::{Error, Result};
use crate::heap::Heap;
use crate::ids::Hid;
use crate::serde::Serde;
use log::trace;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;

pub const BTH_TYPE: u8 = 0xB5;
const BTH_HEADER_SIZE: usize = 8;
const HID_SIZE: usize = 4;

/// Fail with `NotSupported` unless key width is 2, 4 or 8.
#[inline]
pub fn check_key_width(width: usize) -> Result<()> {
    match width {
        2 | 4 | 8 => Ok(()),
        _ => Err(Error::NotSupported("BTH key width")),
    }
}

/// Read a little-endian key of given width.
#[inline]
pub fn read_key(input: &[u8], idx: usize, width: usize) -> Result<(usize, u64)> {
    match width {
        2 => input.deser_u16(idx).map(|(i, k)| (i, k as u64)),
        4 => input.deser_u32(idx).map(|(i, k)| (i, k as u64)),
        8 => input.deser_u64(idx),
        _ => Err(Error::NotSupported("BTH key width")),
    }
}

#[inline]
fn write_key(out: &mut [u8], idx: usize, width: usize, key: u64) -> usize {
    match width {
        2 => out.ser_u16(idx, key as u16),
        4 => out.ser_u32(idx, key as u32),
        _ => out.ser_u64(idx, key),
    }
}

#[inline]
fn key_fits(width: usize, key: u64) -> bool {
    width >= 8 || key >> (width * 8) == 0
}

/// Fixed-width leaf record of a BTH.
pub trait BthRecord: Clone + fmt::Debug {
    fn key(&self) -> u64;

    fn key_len(&self) -> usize;

    fn data_len(&self) -> usize;

    /// Write key followed by data, returns the index after the record.
    fn write_bytes(&self, out: &mut [u8], idx: usize) -> usize;

    #[inline]
    fn cmp_key(&self, key: u64) -> Ordering {
        self.key().cmp(&key)
    }

    #[inline]
    fn cmp_record(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Builds records of one declared width from leaf bytes.
pub trait RecordFactory {
    type Record: BthRecord;

    fn key_len(&self) -> usize;

    fn data_len(&self) -> usize;

    fn create(&self, bytes: &[u8], offset: usize) -> Result<Self::Record>;
}

/// Record holding its data as plain bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    key: u64,
    key_len: u8,
    data: SmallVec<[u8; 16]>,
}

impl RawRecord {
    #[inline]
    pub fn new(key_len: usize, key: u64, data: &[u8]) -> Result<Self> {
        check_key_width(key_len)?;
        if !key_fits(key_len, key) {
            return Err(Error::InvalidKeyLength(key_len));
        }
        if data.len() > u8::MAX as usize {
            return Err(Error::InvalidArgument);
        }
        Ok(RawRecord {
            key,
            key_len: key_len as u8,
            data: SmallVec::from_slice(data),
        })
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl BthRecord for RawRecord {
    #[inline]
    fn key(&self) -> u64 {
        self.key
    }

    #[inline]
    fn key_len(&self) -> usize {
        self.key_len as usize
    }

    #[inline]
    fn data_len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn write_bytes(&self, out: &mut [u8], idx: usize) -> usize {
        let idx = write_key(out, idx, self.key_len(), self.key);
        out.ser_byte_slice(idx, &self.data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecordFactory {
    key_len: usize,
    data_len: usize,
}

impl RawRecordFactory {
    #[inline]
    pub fn new(key_len: usize, data_len: usize) -> Result<Self> {
        check_key_width(key_len)?;
        if data_len > u8::MAX as usize {
            return Err(Error::InvalidArgument);
        }
        Ok(RawRecordFactory { key_len, data_len })
    }
}

impl RecordFactory for RawRecordFactory {
    type Record = RawRecord;

    #[inline]
    fn key_len(&self) -> usize {
        self.key_len
    }

    #[inline]
    fn data_len(&self) -> usize {
        self.data_len
    }

    #[inline]
    fn create(&self, bytes: &[u8], offset: usize) -> Result<RawRecord> {
        let (idx, key) = read_key(bytes, offset, self.key_len)?;
        let (_, data) = bytes.deser_byte_slice(idx, self.data_len)?;
        RawRecord::new(self.key_len, key, data)
    }
}

/// Page capacities of a BTH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BthLimits {
    pub leaf: usize,
    pub index: usize,
}

type LeafEntries<R> = Vec<(u64, R)>;

/// Page store over heap items.
struct HeapPages<'a, F: RecordFactory> {
    heap: &'a mut Heap,
    factory: &'a F,
    cache: &'a mut PageCache<Hid, LeafEntries<F::Record>>,
    limits: BthLimits,
}

impl<F: RecordFactory> HeapPages<'_, F> {
    fn encode(&self, page: &Page<u64, F::Record, Hid>) -> Result<Vec<u8>> {
        let key_len = self.factory.key_len();
        match page {
            Page::Leaf(entries) => {
                let size = key_len + self.factory.data_len();
                let mut buf = vec![0u8; entries.len() * size];
                let mut idx = 0;
                for (_, record) in entries {
                    idx = record.write_bytes(&mut buf, idx);
                }
                Ok(buf)
            }
            Page::Index { entries, .. } => {
                let mut buf = vec![0u8; entries.len() * (key_len + HID_SIZE)];
                let mut idx = 0;
                for (key, hid) in entries {
                    idx = write_key(&mut buf, idx, key_len, *key);
                    idx = buf.ser_u32(idx, hid.0);
                }
                Ok(buf)
            }
        }
    }
}

impl<F: RecordFactory> PageStore for HeapPages<'_, F> {
    type Key = u64;
    type Value = F::Record;
    type Loc = Hid;

    #[inline]
    fn max_entries(&self, level: u8) -> usize {
        if level == 0 {
            self.limits.leaf
        } else {
            self.limits.index
        }
    }

    fn load(&mut self, hid: Hid, level: u8) -> Result<Page<u64, F::Record, Hid>> {
        if level == 0 {
            if let Some(entries) = self.cache.get(&hid) {
                return Ok(Page::Leaf(entries.clone()));
            }
        }
        let bytes = self.heap.get(hid)?;
        let key_len = self.factory.key_len();
        if level == 0 {
            let size = key_len + self.factory.data_len();
            if bytes.len() % size != 0 {
                return Err(Error::InvalidFormat);
            }
            let mut entries = Vec::with_capacity(bytes.len() / size);
            for offset in (0..bytes.len()).step_by(size) {
                let (_, key) = read_key(bytes, offset, key_len)?;
                let record = self.factory.create(bytes, offset)?;
                if record.key() != key {
                    return Err(Error::InvalidFormat);
                }
                entries.push((key, record));
            }
            self.cache.insert(hid, entries.clone());
            Ok(Page::Leaf(entries))
        } else {
            let size = key_len + HID_SIZE;
            if bytes.len() % size != 0 {
                return Err(Error::InvalidFormat);
            }
            let mut entries = Vec::with_capacity(bytes.len() / size);
            for offset in (0..bytes.len()).step_by(size) {
                let (idx, key) = read_key(bytes, offset, key_len)?;
                let (_, child) = bytes.deser_u32(idx)?;
                entries.push((key, Hid(child)));
            }
            Ok(Page::Index { level, entries })
        }
    }

    fn store(&mut self, prior: Option<Hid>, page: &Page<u64, F::Record, Hid>) -> Result<Hid> {
        let data = self.encode(page)?;
        let hid = match prior {
            Some(prior) => {
                self.cache.remove(&prior);
                let hid = self.heap.set(prior, &data)?;
                if hid != prior {
                    trace!("BTH page moves from {:?} to {:?}", prior, hid);
                }
                hid
            }
            None => self.heap.allocate(&data)?,
        };
        if let Page::Leaf(entries) = page {
            self.cache.insert(hid, entries.clone());
        }
        Ok(hid)
    }

    #[inline]
    fn free(&mut self, hid: Hid, _level: u8) -> Result<()> {
        self.cache.remove(&hid);
        self.heap.free(hid)
    }
}

/// BTree-on-Heap bound to its header item. The heap is passed to every
/// operation, the leaf cache lives as long as this value.
pub struct Bth<F: RecordFactory> {
    header: Hid,
    factory: F,
    tree: BTree<Hid>,
    // root as recorded in the header item.
    written: Option<TreeRoot<Hid>>,
    cache: PageCache<Hid, LeafEntries<F::Record>>,
    limits: BthLimits,
}

impl<F: RecordFactory> Bth<F> {
    /// Create an empty tree and its header item.
    pub fn create(heap: &mut Heap, factory: F, cache_size: usize) -> Result<Self> {
        check_key_width(factory.key_len())?;
        let limits = Self::default_limits(heap, &factory)?;
        let header = heap.allocate(&encode_header(&factory, None))?;
        trace!(
            "create BTH {:?}, cbKey={}, cbEnt={}",
            header,
            factory.key_len(),
            factory.data_len()
        );
        Ok(Bth {
            header,
            factory,
            tree: BTree::new(),
            written: None,
            cache: PageCache::new(cache_size),
            limits,
        })
    }

    /// Open the tree described by given header item.
    pub fn open(heap: &Heap, header: Hid, factory: F, cache_size: usize) -> Result<Self> {
        let bytes = heap.get(header)?;
        if bytes.len() != BTH_HEADER_SIZE {
            return Err(Error::InvalidFormat);
        }
        let (idx, btype) = bytes.deser_u8(0)?;
        let (idx, cb_key) = bytes.deser_u8(idx)?;
        let (idx, cb_ent) = bytes.deser_u8(idx)?;
        let (idx, levels) = bytes.deser_u8(idx)?;
        let (_, hid_root) = bytes.deser_u32(idx)?;
        if btype != BTH_TYPE {
            return Err(Error::InvalidFormat);
        }
        check_key_width(cb_key as usize)?;
        if cb_key as usize != factory.key_len() || cb_ent as usize != factory.data_len() {
            return Err(Error::InvalidFormat);
        }
        let root = (hid_root != 0).then_some(TreeRoot {
            loc: Hid(hid_root),
            level: levels,
        });
        let limits = Self::default_limits(heap, &factory)?;
        Ok(Bth {
            header,
            factory,
            tree: BTree::with_root(root),
            written: root,
            cache: PageCache::new(cache_size),
            limits,
        })
    }

    #[inline]
    fn default_limits(heap: &Heap, factory: &F) -> Result<BthLimits> {
        let max = heap.max_item_size();
        let leaf = max / (factory.key_len() + factory.data_len());
        let index = max / (factory.key_len() + HID_SIZE);
        if leaf < 2 {
            return Err(Error::InvalidArgument);
        }
        Ok(BthLimits { leaf, index })
    }

    /// Lower page capacities. Capacities above what a heap item holds
    /// are rejected.
    #[inline]
    pub fn with_limits(mut self, limits: BthLimits) -> Result<Self> {
        if limits.leaf < 2
            || limits.index < 2
            || limits.leaf > self.limits.leaf
            || limits.index > self.limits.index
        {
            return Err(Error::InvalidArgument);
        }
        self.limits = limits;
        Ok(self)
    }

    #[inline]
    pub fn header(&self) -> Hid {
        self.header
    }

    #[inline]
    pub fn limits(&self) -> BthLimits {
        self.limits
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Number of cached leaf pages.
    #[inline]
    pub fn cached_leaves(&self) -> usize {
        self.cache.len()
    }

    #[inline]
    fn pages<'a>(&'a mut self, heap: &'a mut Heap) -> (&'a mut BTree<Hid>, HeapPages<'a, F>) {
        (
            &mut self.tree,
            HeapPages {
                heap,
                factory: &self.factory,
                cache: &mut self.cache,
                limits: self.limits,
            },
        )
    }

    #[inline]
    fn check_record(&self, record: &F::Record) -> Result<()> {
        if record.key_len() != self.factory.key_len() || !key_fits(record.key_len(), record.key()) {
            return Err(Error::InvalidKeyLength(record.key_len()));
        }
        if record.data_len() != self.factory.data_len() {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    /// Lookup record of given key.
    pub fn get(&mut self, heap: &mut Heap, key: u64) -> Result<Option<F::Record>> {
        if self.tree.is_empty() {
            return Ok(None);
        }
        let (tree, mut pages) = self.pages(heap);
        let Some((_, entries)) = tree.find_leaf(&mut pages, key)? else {
            return Ok(None);
        };
        Ok(entries
            .binary_search_by(|(_, r)| r.cmp_key(key))
            .ok()
            .map(|idx| entries[idx].1.clone()))
    }

    /// Insert a new record, fails with `DuplicateKey` if its key exists.
    pub fn insert(&mut self, heap: &mut Heap, record: F::Record) -> Result<()> {
        self.check_record(&record)?;
        let (tree, mut pages) = self.pages(heap);
        tree.insert(&mut pages, record.key(), record)?;
        self.write_header(heap)
    }

    /// Replace the record of an existing key. Returns false if not found.
    pub fn update(&mut self, heap: &mut Heap, record: F::Record) -> Result<bool> {
        self.check_record(&record)?;
        let (tree, mut pages) = self.pages(heap);
        let found = tree.update(&mut pages, record.key(), record)?;
        self.write_header(heap)?;
        Ok(found)
    }

    pub fn upsert(&mut self, heap: &mut Heap, record: F::Record) -> Result<()> {
        self.check_record(&record)?;
        let (tree, mut pages) = self.pages(heap);
        tree.upsert(&mut pages, record.key(), record)?;
        self.write_header(heap)
    }

    pub fn delete(&mut self, heap: &mut Heap, key: u64) -> Result<Option<F::Record>> {
        if self.tree.is_empty() {
            return Ok(None);
        }
        let (tree, mut pages) = self.pages(heap);
        let res = tree.delete(&mut pages, key)?;
        self.write_header(heap)?;
        Ok(res)
    }

    /// All records in key order.
    pub fn records(&mut self, heap: &mut Heap) -> Result<Vec<F::Record>> {
        let (tree, mut pages) = self.pages(heap);
        Ok(tree
            .entries(&mut pages)?
            .into_iter()
            .map(|(_, r)| r)
            .collect())
    }

    /// Verify structure and record order, returns number of records.
    pub fn check(&mut self, heap: &mut Heap) -> Result<usize> {
        let (tree, mut pages) = self.pages(heap);
        let count = tree.check(&mut pages)?;
        let records = self.records(heap)?;
        if records
            .windows(2)
            .any(|w| w[0].cmp_record(&w[1]) != Ordering::Less)
        {
            return Err(Error::InvalidFormat);
        }
        Ok(count)
    }

    /// Free every page and the header item.
    pub fn destroy(mut self, heap: &mut Heap) -> Result<()> {
        let (tree, mut pages) = self.pages(heap);
        tree.destroy(&mut pages)?;
        heap.free(self.header)
    }

    #[inline]
    fn write_header(&mut self, heap: &mut Heap) -> Result<()> {
        let root = self.tree.root();
        if root == self.written {
            return Ok(());
        }
        let hid = heap.set(self.header, &encode_header(&self.factory, root))?;
        debug_assert_eq!(hid, self.header);
        self.header = hid;
        self.written = root;
        Ok(())
    }
}

fn encode_header<F: RecordFactory>(factory: &F, root: Option<TreeRoot<Hid>>) -> Vec<u8> {
    let mut buf = vec![0u8; BTH_HEADER_SIZE];
    let (hid, levels) = root.map(|r| (r.loc.0, r.level)).unwrap_or((0, 0));
    let idx = buf.ser_u8(0, BTH_TYPE);
    let idx = buf.ser_u8(idx, factory.key_len() as u8);
    let idx = buf.ser_u8(idx, factory.data_len() as u8);
    let idx = buf.ser_u8(idx, levels);
    buf.ser_u32(idx, hid);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlocks;
    use crate::data_tree::{DataTree, DataTreeLimits};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn record(key: u64, val: u8) -> RawRecord {
        RawRecord::new(4, key, &[val; 6]).unwrap()
    }

    fn factory() -> RawRecordFactory {
        RawRecordFactory::new(4, 6).unwrap()
    }

    #[test]
    fn test_key_width() {
        assert_eq!(RawRecordFactory::new(3, 4), Err(Error::NotSupported("BTH key width")));
        assert_eq!(read_key(&[1, 2, 3], 0, 3), Err(Error::NotSupported("BTH key width")));
        assert_eq!(read_key(&[1, 2, 3], 0, 2).unwrap(), (2, 0x0201));
        assert_eq!(
            RawRecord::new(2, 0x1_0000, &[]),
            Err(Error::InvalidKeyLength(2))
        );
        let rec = RawRecord::new(2, 0x0102, &[9]).unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(rec.write_bytes(&mut buf, 0), 3);
        assert_eq!(buf, [0x02, 0x01, 9]);
        assert_eq!(RawRecordFactory::new(2, 1).unwrap().create(&buf, 0).unwrap(), rec);
    }

    #[test]
    fn test_empty_tree_short_circuits() {
        let mut heap = Heap::create(BTH_TYPE, 8176).unwrap();
        let bth = Bth::create(&mut heap, factory(), 4).unwrap();
        let header = bth.header();
        assert_eq!(&heap.get(header).unwrap()[..4], &[0xB5, 4, 6, 0]);
        let mut bth = Bth::open(&heap, header, factory(), 4).unwrap();
        assert!(bth.is_empty());
        assert_eq!(bth.get(&mut heap, 1).unwrap(), None);
        assert_eq!(bth.delete(&mut heap, 1).unwrap(), None);
        assert!(!bth.update(&mut heap, record(1, 1)).unwrap());

        assert_eq!(
            Bth::open(&heap, header, RawRecordFactory::new(4, 8).unwrap(), 4).err(),
            Some(Error::InvalidFormat)
        );
        let bad = heap.allocate(&[0xB5, 3, 6, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(
            Bth::open(&heap, bad, factory(), 4).err(),
            Some(Error::NotSupported("BTH key width"))
        );
    }

    #[test]
    fn test_bth_operations_and_reopen() {
        let mut access = MemBlocks::new();
        let mut tree = DataTree::new(DataTreeLimits::default());
        let mut heap = Heap::create(BTH_TYPE, 8176).unwrap();
        let mut bth = Bth::create(&mut heap, factory(), 8)
            .unwrap()
            .with_limits(BthLimits { leaf: 4, index: 3 })
            .unwrap();
        heap.set_user_root(bth.header());
        for key in (0..60u64).rev() {
            bth.insert(&mut heap, record(key * 3, key as u8)).unwrap();
        }
        assert_eq!(
            bth.insert(&mut heap, record(3, 0)),
            Err(Error::DuplicateKey)
        );
        assert_eq!(
            bth.insert(&mut heap, RawRecord::new(2, 5, &[0; 6]).unwrap()),
            Err(Error::InvalidKeyLength(2))
        );
        assert_eq!(
            bth.insert(&mut heap, RawRecord::new(4, 5, &[0; 2]).unwrap()),
            Err(Error::InvalidArgument)
        );
        assert!(bth.update(&mut heap, record(30, 0xAA)).unwrap());
        assert_eq!(bth.delete(&mut heap, 0).unwrap(), Some(record(0, 0)));
        assert_eq!(bth.check(&mut heap).unwrap(), 59);
        // the header records the root.
        let header = heap.get(bth.header()).unwrap().to_vec();
        assert!(header[3] >= 2);
        assert_ne!(&header[4..8], &[0, 0, 0, 0]);

        heap.flush(&mut access, &mut tree).unwrap();
        let bid = tree.save(&mut access).unwrap();
        let tree = DataTree::open(&mut access, bid, DataTreeLimits::default()).unwrap();
        let mut heap = Heap::open(&mut access, &tree).unwrap();
        let mut bth = Bth::open(&heap, heap.user_root(), factory(), 8).unwrap();
        assert_eq!(bth.get(&mut heap, 30).unwrap(), Some(record(30, 0xAA)));
        assert_eq!(bth.get(&mut heap, 31).unwrap(), None);
        assert_eq!(bth.get(&mut heap, 0).unwrap(), None);
        let keys: Vec<u64> = bth.records(&mut heap).unwrap().iter().map(|r| r.key()).collect();
        assert_eq!(keys, (1..60u64).map(|k| k * 3).collect::<Vec<_>>());
    }

    #[test]
    fn test_leaf_cache_follows_relocation() {
        // small heap blocks force growing leaves to move.
        let mut heap = Heap::create(BTH_TYPE, 128).unwrap();
        heap.allocate(&[0u8; 50]).unwrap();
        let factory = RawRecordFactory::new(2, 2).unwrap();
        let mut bth = Bth::create(&mut heap, factory, 16).unwrap();
        let leaf_cap = bth.limits().leaf;
        for key in 0..leaf_cap as u64 {
            let rec = RawRecord::new(2, key, &[key as u8, 0]).unwrap();
            bth.insert(&mut heap, rec).unwrap();
            for k in 0..=key {
                let found = bth.get(&mut heap, k).unwrap().unwrap();
                assert_eq!(found.data(), &[k as u8, 0]);
            }
        }
        assert!(heap.page_count() > 1);
        assert!(bth.cached_leaves() >= 1);
        assert_eq!(bth.check(&mut heap).unwrap(), leaf_cap);
        bth.destroy(&mut heap).unwrap();
    }

    #[test]
    fn test_leaf_cache_drops_reused_ids() {
        let mut heap = Heap::create(BTH_TYPE, 128).unwrap();
        let factory = RawRecordFactory::new(2, 2).unwrap();
        let mut cache = PageCache::new(8);
        let leaf = |keys: std::ops::Range<u64>, val: u8| -> Page<u64, RawRecord, Hid> {
            Page::Leaf(
                keys.map(|k| (k, RawRecord::new(2, k, &[val, 0]).unwrap()))
                    .collect(),
            )
        };
        let keys_of = |page: Page<u64, RawRecord, Hid>| -> Vec<u64> {
            match page {
                Page::Leaf(entries) => entries.into_iter().map(|(k, _)| k).collect(),
                Page::Index { .. } => panic!("leaf expected"),
            }
        };
        let mut pages = HeapPages {
            heap: &mut heap,
            factory: &factory,
            cache: &mut cache,
            limits: BthLimits { leaf: 16, index: 16 },
        };
        let small = pages.store(None, &leaf(0..2, 1)).unwrap();
        pages.heap.allocate(&[0u8; 50]).unwrap();
        pages.heap.allocate(&[0u8; 30]).unwrap();

        // the grown leaf no longer fits its block and moves.
        let moved = pages.store(Some(small), &leaf(0..12, 1)).unwrap();
        assert_ne!(moved, small);
        let other = pages.encode(&leaf(100..102, 9)).unwrap();
        assert_eq!(pages.heap.allocate(&other).unwrap(), small);
        assert_eq!(keys_of(pages.load(small, 0).unwrap()), vec![100, 101]);
        assert_eq!(keys_of(pages.load(moved, 0).unwrap()), (0..12).collect::<Vec<_>>());

        // same for a freed leaf.
        let freed = pages.store(None, &leaf(200..202, 3)).unwrap();
        assert_eq!(keys_of(pages.load(freed, 0).unwrap()), vec![200, 201]);
        pages.free(freed, 0).unwrap();
        let other = pages.encode(&leaf(300..302, 4)).unwrap();
        assert_eq!(pages.heap.allocate(&other).unwrap(), freed);
        assert_eq!(keys_of(pages.load(freed, 0).unwrap()), vec![300, 301]);
    }

    proptest! {
        #[test]
        fn prop_bth_matches_model(
            ops in prop::collection::vec((0u64..200, any::<u8>(), any::<bool>()), 1..300),
        ) {
            let mut heap = Heap::create(BTH_TYPE, 8176).unwrap();
            let mut bth = Bth::create(&mut heap, RawRecordFactory::new(8, 1).unwrap(), 2)
                .unwrap()
                .with_limits(BthLimits { leaf: 3, index: 3 })
                .unwrap();
            let mut model = BTreeMap::new();
            for (key, val, insert) in ops {
                if insert {
                    let rec = RawRecord::new(8, key, &[val]).unwrap();
                    bth.upsert(&mut heap, rec).unwrap();
                    model.insert(key, val);
                } else {
                    let res = bth.delete(&mut heap, key).unwrap();
                    prop_assert_eq!(res.map(|r| r.data()[0]), model.remove(&key));
                }
            }
            prop_assert_eq!(bth.check(&mut heap).unwrap(), model.len());
            let records = bth.records(&mut heap).unwrap();
            let pairs: Vec<(u64, u8)> = records.iter().map(|r| (r.key(), r.data()[0])).collect();
            prop_assert_eq!(pairs, model.into_iter().collect::<Vec<_>>());
        }
    }
}
