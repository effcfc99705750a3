//! Allocation Map.
//!
//! The address space past the header is divided into regions of
//! 0x3E000 bytes. Each region starts with its allocation map page, a
//! bitmap with one bit per 64-byte slot of the region. Some regions
//! also carry legacy shadow pages right after the map page, which are
//! written once when the region is created and never read back.
use crate::bitmap::Bitmap;
use crate::block::{BlockFile, PageType, MAX_BLOCK_SIZE, PAGE_PAYLOAD_SIZE, PAGE_SIZE};
use crate::error::{Error, Result};
use crate::file::{Root, Storage};
use crate::ids::{BlockRef, Ib};
use log::debug;
use smallvec::SmallVec;

/// Offset of the first allocation map page.
pub const AMAP_FIRST_OFFSET: Ib = 0x4400;
/// Bytes covered by one bit.
pub const AMAP_SLOT_SIZE: usize = 64;
/// Slots covered by one map page.
pub const AMAP_SLOTS_PER_PAGE: usize = PAGE_PAYLOAD_SIZE * 8;
/// Bytes covered by one map page.
pub const AMAP_REGION_SIZE: u64 = (AMAP_SLOTS_PER_PAGE * AMAP_SLOT_SIZE) as u64;

const SLOTS_PER_PAGE_UNIT: usize = PAGE_SIZE / AMAP_SLOT_SIZE;
const PMAP_INTERVAL: usize = 8;
const FMAP_FIRST: usize = 128;
const FMAP_INTERVAL: usize = 496;
const FPMAP_FIRST: usize = 1024;
const FPMAP_INTERVAL: usize = 3968;

/// Offset of the region with given index.
#[inline]
pub fn region_offset(region: usize) -> Ib {
    AMAP_FIRST_OFFSET + region as u64 * AMAP_REGION_SIZE
}

/// Shadow pages following the map page of given region, in file order.
#[inline]
pub fn shadow_pages(region: usize) -> SmallVec<[PageType; 3]> {
    let mut res = SmallVec::new();
    if region % PMAP_INTERVAL == 0 {
        res.push(PageType::PMap);
    }
    if region == 0 || (region > FMAP_FIRST && (region - FMAP_FIRST) % FMAP_INTERVAL == 0) {
        res.push(PageType::FMap);
    }
    if region == 0 || (region > FPMAP_FIRST && (region - FPMAP_FIRST) % FPMAP_INTERVAL == 0) {
        res.push(PageType::FPMap);
    }
    res
}

/// Number of slots at the start of a region taken by map pages.
#[inline]
fn reserved_slots(region: usize) -> usize {
    (1 + shadow_pages(region).len()) * SLOTS_PER_PAGE_UNIT
}

struct MapPage {
    bits: Box<[u8; PAGE_PAYLOAD_SIZE]>,
    free_slots: usize,
    dirty: bool,
}

impl MapPage {
    #[inline]
    fn new(region: usize) -> Self {
        let mut bits = Box::new([0u8; PAGE_PAYLOAD_SIZE]);
        let reserved = reserved_slots(region);
        bits[..].bitmap_set_range(0, reserved);
        MapPage {
            bits,
            free_slots: AMAP_SLOTS_PER_PAGE - reserved,
            dirty: true,
        }
    }
}

/// Free-space allocator over the container file.
///
/// Frees are applied immediately, so the caller must not release an
/// extent before everything referencing it has been replaced.
pub struct AllocMap {
    pages: Vec<MapPage>,
    max_file_size: u64,
    // regions created this session whose shadow pages are not written yet.
    new_regions: Vec<usize>,
}

impl AllocMap {
    /// Create allocation map of a new container with a single region.
    #[inline]
    pub fn create(max_file_size: u64) -> Result<Self> {
        let mut amap = AllocMap {
            pages: vec![],
            max_file_size,
            new_regions: vec![],
        };
        amap.grow()?;
        Ok(amap)
    }

    /// Load all map pages described by the root.
    pub fn load<S: Storage>(
        file: &mut BlockFile<S>,
        root: &Root,
        max_file_size: u64,
    ) -> Result<Self> {
        let regions = region_count(root)?;
        let mut pages = Vec::with_capacity(regions);
        for region in 0..regions {
            let ib = region_offset(region);
            let bits = file.read_page(BlockRef::new(ib, ib), PageType::AMap)?;
            let reserved = reserved_slots(region);
            if !(0..reserved).all(|idx| bits[..].bitmap_get(idx)) {
                return Err(Error::InvalidFormat);
            }
            let free_slots = bits[..].bitmap_count_zeros();
            pages.push(MapPage {
                bits,
                free_slots,
                dirty: false,
            });
        }
        debug!("allocation map loaded, regions={}", regions);
        Ok(AllocMap {
            pages,
            max_file_size,
            new_regions: vec![],
        })
    }

    /// Rebuild the map from every extent in use. The regions are
    /// taken from the root, shadow pages are rewritten on next flush.
    pub fn rebuild<I>(root: &Root, max_file_size: u64, used: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Ib, usize)>,
    {
        let regions = region_count(root)?;
        let mut amap = AllocMap {
            pages: (0..regions).map(MapPage::new).collect(),
            max_file_size,
            new_regions: (0..regions).collect(),
        };
        let mut extents = 0usize;
        for (ib, len) in used {
            amap.mark(ib, len)?;
            extents += 1;
        }
        debug!(
            "allocation map rebuilt, regions={}, extents={}, free={}",
            regions,
            extents,
            amap.free_bytes()
        );
        Ok(amap)
    }

    /// Allocate `len` bytes. Page-aligned allocations start on a
    /// 512-byte boundary.
    pub fn allocate(&mut self, len: usize, page_aligned: bool) -> Result<Ib> {
        if len > MAX_BLOCK_SIZE {
            return Err(Error::AllocationTooLarge(len));
        }
        if len == 0 {
            return Err(Error::InvalidArgument);
        }
        let slots = len.div_ceil(AMAP_SLOT_SIZE);
        let align = if page_aligned { SLOTS_PER_PAGE_UNIT } else { 1 };
        for region in 0..self.pages.len() {
            if let Some(ib) = self.try_allocate_in(region, slots, align) {
                return Ok(ib);
            }
        }
        let region = self.grow()?;
        // a fresh region always holds the largest allocation.
        self.try_allocate_in(region, slots, align)
            .ok_or(Error::AllocationTooLarge(len))
    }

    #[inline]
    fn try_allocate_in(&mut self, region: usize, slots: usize, align: usize) -> Option<Ib> {
        let page = &mut self.pages[region];
        if page.free_slots < slots {
            return None;
        }
        let start = page.bits[..].bitmap_find_free_run(slots, align)?;
        page.bits[..].bitmap_set_range(start, slots);
        page.free_slots -= slots;
        page.dirty = true;
        Some(region_offset(region) + (start * AMAP_SLOT_SIZE) as u64)
    }

    /// Release an extent previously returned by `allocate`.
    pub fn free(&mut self, ib: Ib, len: usize) -> Result<()> {
        let (region, start, slots) = self.locate(ib, len).ok_or(Error::InvalidFree)?;
        let page = &mut self.pages[region];
        // check before modifying so a bad free leaves the map untouched.
        if !(start..start + slots).all(|idx| page.bits[..].bitmap_get(idx)) {
            return Err(Error::InvalidFree);
        }
        page.bits[..].bitmap_unset_range(start, slots);
        page.free_slots += slots;
        page.dirty = true;
        Ok(())
    }

    /// Returns whether the whole extent is allocated.
    #[inline]
    pub fn is_allocated(&self, ib: Ib, len: usize) -> bool {
        match self.locate(ib, len) {
            Some((region, start, slots)) => {
                let bits = &self.pages[region].bits[..];
                (start..start + slots).all(|idx| bits.bitmap_get(idx))
            }
            None => false,
        }
    }

    /// Mark an extent as used while rebuilding.
    #[inline]
    fn mark(&mut self, ib: Ib, len: usize) -> Result<()> {
        let (region, start, slots) = self.locate(ib, len).ok_or(Error::InvalidFormat)?;
        let page = &mut self.pages[region];
        if !page.bits[..].bitmap_range_free(start, slots) {
            // two structures claim the same bytes.
            return Err(Error::InvalidFormat);
        }
        page.bits[..].bitmap_set_range(start, slots);
        page.free_slots -= slots;
        Ok(())
    }

    /// Translate an extent to (region, first slot, slot count). Extents
    /// must be slot aligned, outside map pages and inside one region.
    #[inline]
    fn locate(&self, ib: Ib, len: usize) -> Option<(usize, usize, usize)> {
        if len == 0 || ib < AMAP_FIRST_OFFSET || (ib - AMAP_FIRST_OFFSET) % AMAP_SLOT_SIZE as u64 != 0
        {
            return None;
        }
        let region = ((ib - AMAP_FIRST_OFFSET) / AMAP_REGION_SIZE) as usize;
        if region >= self.pages.len() {
            return None;
        }
        let start = ((ib - region_offset(region)) / AMAP_SLOT_SIZE as u64) as usize;
        let slots = len.div_ceil(AMAP_SLOT_SIZE);
        if start < reserved_slots(region) || start + slots > AMAP_SLOTS_PER_PAGE {
            return None;
        }
        Some((region, start, slots))
    }

    /// Append a new region at end of file.
    fn grow(&mut self) -> Result<usize> {
        let region = self.pages.len();
        if region_offset(region + 1) > self.max_file_size {
            return Err(Error::FileFull);
        }
        self.pages.push(MapPage::new(region));
        self.new_regions.push(region);
        debug!(
            "allocation map grows, region={}, file_eof={:#x}",
            region,
            region_offset(region + 1)
        );
        Ok(region)
    }

    /// Total free bytes over all regions.
    #[inline]
    pub fn free_bytes(&self) -> u64 {
        self.pages
            .iter()
            .map(|p| (p.free_slots * AMAP_SLOT_SIZE) as u64)
            .sum()
    }

    /// Number of regions.
    #[inline]
    pub fn regions(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    pub fn file_eof(&self) -> Ib {
        region_offset(self.pages.len())
    }

    /// Offset of the last map page.
    #[inline]
    pub fn amap_last(&self) -> Ib {
        region_offset(self.pages.len().saturating_sub(1))
    }

    /// Record file extent and free space in the root.
    #[inline]
    pub fn update_root(&self, root: &mut Root) {
        root.file_eof = self.file_eof();
        root.amap_last = self.amap_last();
        root.amap_free = self.free_bytes();
        root.pmap_free = 0;
    }

    /// Write shadow pages of new regions and every modified map page.
    pub fn flush<S: Storage>(&mut self, file: &mut BlockFile<S>) -> Result<()> {
        for region in self.new_regions.drain(..) {
            let mut ib = region_offset(region) + PAGE_SIZE as u64;
            for ptype in shadow_pages(region) {
                // FMap pages carry no usable hint, the rest mark everything used.
                let fill = if ptype == PageType::FMap { 0 } else { 0xFF };
                let payload = [fill; PAGE_PAYLOAD_SIZE];
                file.write_page(BlockRef::new(ib, ib), ptype, &payload)?;
                ib += PAGE_SIZE as u64;
            }
        }
        for (region, page) in self.pages.iter_mut().enumerate() {
            if page.dirty {
                let ib = region_offset(region);
                file.write_page(BlockRef::new(ib, ib), PageType::AMap, &page.bits)?;
                page.dirty = false;
            }
        }
        // materialize the whole address space so every region is backed.
        let eof = self.file_eof();
        if file.storage_mut().len()? < eof {
            file.write_raw(eof - 1, &[0u8])?;
        }
        Ok(())
    }
}

#[inline]
fn region_count(root: &Root) -> Result<usize> {
    if root.file_eof <= AMAP_FIRST_OFFSET
        || (root.file_eof - AMAP_FIRST_OFFSET) % AMAP_REGION_SIZE != 0
    {
        return Err(Error::InvalidFormat);
    }
    let regions = ((root.file_eof - AMAP_FIRST_OFFSET) / AMAP_REGION_SIZE) as usize;
    if root.amap_last != region_offset(regions - 1) {
        return Err(Error::InvalidFormat);
    }
    Ok(regions)
}
