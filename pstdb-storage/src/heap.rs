//! Heap-on-Node: variable-size items packed into the blocks of a data
//! tree and addressed by 32-bit heap ids.
//!
//! Every block starts with a header and ends with a page map listing
//! the start offset of every item:
//!
//! ```text
//! block 0:           ibHnpm(2) sig(1)=0xEC clientSig(1) hidUserRoot(4) fill(4)
//! block 8, 136, ...: ibHnpm(2) fill(64)
//! other blocks:      ibHnpm(2)
//!
//! page map:          cAlloc(2) cFree(2) ib(2) * (cAlloc + 1)
//! ```
//!
//! A freed item keeps its index with zero size, so the ids of other
//! items stay stable. Pages are decoded on open and written back to the
//! data tree by `flush`.
use crate::block::BlockAccess;
use crate::data_tree::DataTree;
use crate::error::{Error, Result};
use crate::ids::{Hid, HID_INDEX_MAX};
use crate::serde::Serde;
use log::trace;

pub const HEAP_SIG: u8 = 0xEC;
/// Largest item a heap stores.
pub const HEAP_MAX_ITEM_SIZE: usize = 3580;

const HN_HDR_SIZE: usize = 12;
const HN_PAGE_HDR_SIZE: usize = 2;
const HN_BITMAP_HDR_SIZE: usize = 66;
const HN_BITMAP_FIRST: usize = 8;
const HN_BITMAP_INTERVAL: usize = 128;
const PAGE_MAP_HDR_SIZE: usize = 4;
const MAX_HEAP_PAGES: usize = u16::MAX as usize + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageKind {
    First,
    Bitmap,
    Plain,
}

impl PageKind {
    #[inline]
    fn of(idx: usize) -> Self {
        if idx == 0 {
            PageKind::First
        } else if idx >= HN_BITMAP_FIRST && (idx - HN_BITMAP_FIRST) % HN_BITMAP_INTERVAL == 0 {
            PageKind::Bitmap
        } else {
            PageKind::Plain
        }
    }

    #[inline]
    fn header_size(self) -> usize {
        match self {
            PageKind::First => HN_HDR_SIZE,
            PageKind::Bitmap => HN_BITMAP_HDR_SIZE,
            PageKind::Plain => HN_PAGE_HDR_SIZE,
        }
    }
}

/// Page which records the fill level of given page.
#[inline]
fn fill_owner(idx: usize) -> usize {
    if idx < HN_BITMAP_FIRST {
        0
    } else {
        HN_BITMAP_FIRST + (idx - HN_BITMAP_FIRST) / HN_BITMAP_INTERVAL * HN_BITMAP_INTERVAL
    }
}

/// Coarse free space class of a block, 0 means empty and 15 full.
#[inline]
fn fill_level(free: usize) -> u8 {
    const BOUNDS: [usize; 15] = [
        3584, 2560, 2048, 1792, 1536, 1280, 1024, 768, 512, 256, 128, 64, 32, 16, 8,
    ];
    BOUNDS
        .iter()
        .position(|b| free >= *b)
        .map(|p| p as u8)
        .unwrap_or(15)
}

#[derive(Debug, Clone, Default)]
struct HeapPage {
    // indexed by item index - 1, `None` for freed items.
    items: Vec<Option<Vec<u8>>>,
    dirty: bool,
}

impl HeapPage {
    #[inline]
    fn data_bytes(&self) -> usize {
        self.items.iter().flatten().map(|i| i.len()).sum()
    }

    #[inline]
    fn free_slot(&self) -> Option<usize> {
        self.items.iter().position(|i| i.is_none())
    }

    /// Encoded size after adding `extra` item bytes and `slots` new
    /// map entries.
    #[inline]
    fn size_with(&self, header: usize, extra: isize, slots: usize) -> usize {
        let bytes = (header + self.data_bytes()) as isize + extra;
        (bytes as usize).next_multiple_of(2) + PAGE_MAP_HDR_SIZE + 2 * (self.items.len() + slots + 1)
    }

    #[inline]
    fn encoded_size(&self, header: usize) -> usize {
        self.size_with(header, 0, 0)
    }

    /// Slot which can take a new item of given size.
    #[inline]
    fn slot_for(&self, header: usize, block_size: usize, len: usize) -> Option<usize> {
        match self.free_slot() {
            Some(slot) => (self.size_with(header, len as isize, 0) <= block_size).then_some(slot),
            None => (self.items.len() < HID_INDEX_MAX as usize
                && self.size_with(header, len as isize, 1) <= block_size)
                .then_some(self.items.len()),
        }
    }

    fn decode(kind: PageKind, data: &[u8]) -> Result<(Self, u16)> {
        let (_, ib_hnpm) = data.deser_u16(0)?;
        let (idx, c_alloc) = data.deser_u16(ib_hnpm as usize)?;
        let (mut idx, _c_free) = data.deser_u16(idx)?;
        let mut offsets = Vec::with_capacity(c_alloc as usize + 1);
        for _ in 0..=c_alloc {
            let (i, ib) = data.deser_u16(idx)?;
            offsets.push(ib as usize);
            idx = i;
        }
        if offsets[0] < kind.header_size()
            || offsets.windows(2).any(|w| w[0] > w[1])
            || offsets[c_alloc as usize] > ib_hnpm as usize
        {
            return Err(Error::InvalidFormat);
        }
        let items = offsets
            .windows(2)
            .map(|w| (w[0] < w[1]).then(|| data[w[0]..w[1]].to_vec()))
            .collect();
        Ok((HeapPage { items, dirty: false }, ib_hnpm))
    }
}

/// Heap over the blocks of a data tree.
pub struct Heap {
    client_sig: u8,
    user_root: Hid,
    pages: Vec<HeapPage>,
    block_size: usize,
}

impl Heap {
    /// Create an empty heap with one page. Nothing is written until
    /// `flush`.
    pub fn create(client_sig: u8, block_size: usize) -> Result<Self> {
        if block_size < HN_BITMAP_HDR_SIZE + PAGE_MAP_HDR_SIZE + 8 {
            return Err(Error::InvalidArgument);
        }
        Ok(Heap {
            client_sig,
            user_root: Hid::default(),
            pages: vec![HeapPage {
                items: vec![],
                dirty: true,
            }],
            block_size,
        })
    }

    /// Decode the heap stored in given data tree.
    pub fn open<A: BlockAccess>(access: &mut A, tree: &DataTree) -> Result<Self> {
        if tree.block_count() == 0 {
            return Err(Error::InvalidFormat);
        }
        let mut pages = Vec::with_capacity(tree.block_count());
        let mut client_sig = 0;
        let mut user_root = Hid::default();
        for idx in 0..tree.block_count() {
            let data = tree.get_block(access, idx)?;
            let kind = PageKind::of(idx);
            if kind == PageKind::First {
                let (i, _) = data.deser_u16(0)?;
                let (i, sig) = data.deser_u8(i)?;
                let (i, csig) = data.deser_u8(i)?;
                let (_, root) = data.deser_u32(i)?;
                if sig != HEAP_SIG {
                    return Err(Error::InvalidFormat);
                }
                client_sig = csig;
                user_root = Hid(root);
            }
            let (page, _) = HeapPage::decode(kind, &data)?;
            pages.push(page);
        }
        trace!("open heap, pages={}, client_sig={:#04x}", pages.len(), client_sig);
        Ok(Heap {
            client_sig,
            user_root,
            pages,
            block_size: tree.limits().block_size,
        })
    }

    #[inline]
    pub fn client_sig(&self) -> u8 {
        self.client_sig
    }

    #[inline]
    pub fn user_root(&self) -> Hid {
        self.user_root
    }

    #[inline]
    pub fn set_user_root(&mut self, hid: Hid) {
        self.user_root = hid;
        self.pages[0].dirty = true;
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Whether any page differs from the stored data tree.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.pages.iter().any(|p| p.dirty)
    }

    /// Largest item this heap accepts.
    #[inline]
    pub fn max_item_size(&self) -> usize {
        let overhead = HN_BITMAP_HDR_SIZE + PAGE_MAP_HDR_SIZE + 2 * 2 + 1;
        HEAP_MAX_ITEM_SIZE.min(self.block_size - overhead)
    }

    #[inline]
    pub fn get(&self, hid: Hid) -> Result<&[u8]> {
        let (block, slot) = self.locate(hid)?;
        match &self.pages[block].items[slot] {
            Some(item) => Ok(item),
            None => Err(Error::InvalidHeapId(hid.0)),
        }
    }

    /// Store a new item. Items are never empty.
    pub fn allocate(&mut self, data: &[u8]) -> Result<Hid> {
        self.check_item(data)?;
        let found = self.pages.iter().enumerate().find_map(|(idx, page)| {
            page.slot_for(PageKind::of(idx).header_size(), self.block_size, data.len())
                .map(|slot| (idx, slot))
        });
        let (block, slot) = match found {
            Some(found) => found,
            None => {
                if self.pages.len() == MAX_HEAP_PAGES {
                    return Err(Error::DataTreeFull);
                }
                self.pages.push(HeapPage::default());
                trace!("heap grows to {} pages", self.pages.len());
                (self.pages.len() - 1, 0)
            }
        };
        let page = &mut self.pages[block];
        if slot == page.items.len() {
            page.items.push(Some(data.to_vec()));
        } else {
            page.items[slot] = Some(data.to_vec());
        }
        self.mark_dirty(block);
        Ok(Hid::new(block as u16, slot as u16 + 1))
    }

    /// Replace an item. The id is kept if the page can hold the new
    /// content, otherwise the item moves and its new id is returned.
    pub fn set(&mut self, hid: Hid, data: &[u8]) -> Result<Hid> {
        self.check_item(data)?;
        let (block, slot) = self.locate(hid)?;
        let page = &self.pages[block];
        let Some(old) = &page.items[slot] else {
            return Err(Error::InvalidHeapId(hid.0));
        };
        let grow = data.len() as isize - old.len() as isize;
        let header = PageKind::of(block).header_size();
        if page.size_with(header, grow, 0) <= self.block_size {
            self.pages[block].items[slot] = Some(data.to_vec());
            self.mark_dirty(block);
            return Ok(hid);
        }
        let moved = self.allocate(data)?;
        self.free(hid)?;
        Ok(moved)
    }

    pub fn free(&mut self, hid: Hid) -> Result<()> {
        let (block, slot) = self.locate(hid)?;
        if self.pages[block].items[slot].take().is_none() {
            return Err(Error::InvalidHeapId(hid.0));
        }
        self.mark_dirty(block);
        Ok(())
    }

    /// Write modified pages into the data tree. Pages other than the
    /// last one are padded to full blocks.
    pub fn flush<A: BlockAccess>(&mut self, access: &mut A, tree: &mut DataTree) -> Result<()> {
        if tree.limits().block_size != self.block_size || tree.block_count() > self.pages.len() {
            return Err(Error::InvalidArgument);
        }
        let last = self.pages.len() - 1;
        for idx in 0..self.pages.len() {
            if !self.pages[idx].dirty && idx < tree.block_count() {
                continue;
            }
            let mut data = self.encode_page(idx)?;
            if idx < last {
                data.resize(self.block_size, 0);
            }
            if idx < tree.block_count() {
                tree.update_block(idx, &data)?;
            } else {
                tree.append_block(access, &data)?;
            }
            self.pages[idx].dirty = false;
        }
        Ok(())
    }

    #[inline]
    fn check_item(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidArgument);
        }
        if data.len() > self.max_item_size() {
            return Err(Error::HeapItemTooLarge(data.len()));
        }
        Ok(())
    }

    #[inline]
    fn locate(&self, hid: Hid) -> Result<(usize, usize)> {
        if !hid.is_valid() {
            return Err(Error::InvalidHeapId(hid.0));
        }
        let block = hid.block() as usize;
        let slot = hid.index() as usize - 1;
        match self.pages.get(block) {
            Some(page) if slot < page.items.len() => Ok((block, slot)),
            _ => Err(Error::InvalidHeapId(hid.0)),
        }
    }

    #[inline]
    fn mark_dirty(&mut self, idx: usize) {
        self.pages[idx].dirty = true;
        // fill levels live in the owner page.
        self.pages[fill_owner(idx)].dirty = true;
    }

    fn fill_levels(&self, start: usize, count: usize) -> Vec<u8> {
        let mut res = vec![0u8; count / 2];
        for (i, idx) in (start..self.pages.len().min(start + count)).enumerate() {
            let header = PageKind::of(idx).header_size();
            let used = self.pages[idx].encoded_size(header);
            let level = fill_level(self.block_size.saturating_sub(used));
            res[i / 2] |= if i % 2 == 0 { level } else { level << 4 };
        }
        res
    }

    fn encode_page(&self, idx: usize) -> Result<Vec<u8>> {
        let kind = PageKind::of(idx);
        let page = &self.pages[idx];
        let size = page.encoded_size(kind.header_size());
        if size > self.block_size {
            return Err(Error::InvalidArgument);
        }
        let mut buf = vec![0u8; size];
        let mut offsets = Vec::with_capacity(page.items.len() + 1);
        let mut ib = kind.header_size();
        for item in &page.items {
            offsets.push(ib as u16);
            if let Some(item) = item {
                ib = buf.ser_byte_slice(ib, item);
            }
        }
        offsets.push(ib as u16);
        let ib_hnpm = ib.next_multiple_of(2);
        let hdr = buf.ser_u16(0, ib_hnpm as u16);
        match kind {
            PageKind::First => {
                let hdr = buf.ser_u8(hdr, HEAP_SIG);
                let hdr = buf.ser_u8(hdr, self.client_sig);
                let hdr = buf.ser_u32(hdr, self.user_root.0);
                buf.ser_byte_slice(hdr, &self.fill_levels(0, HN_BITMAP_FIRST));
            }
            PageKind::Bitmap => {
                buf.ser_byte_slice(hdr, &self.fill_levels(idx, HN_BITMAP_INTERVAL));
            }
            PageKind::Plain => (),
        }
        let c_free = page.items.iter().filter(|i| i.is_none()).count();
        let i = buf.ser_u16(ib_hnpm, page.items.len() as u16);
        let mut i = buf.ser_u16(i, c_free as u16);
        for off in offsets {
            i = buf.ser_u16(i, off);
        }
        Ok(buf)
    }
}
