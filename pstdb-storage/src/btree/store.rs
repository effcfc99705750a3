use crate::amap::AllocMap;
use crate::block::{BlockFile, PAGE_SIZE};
use crate::btree::cache::PageCache;
use crate::btree::page::{decode_page, encode_page, CodecPage, Page, PageCodec};
use crate::btree::pending::{PagePlacer, PendingPage, PendingPages, Slot};
use crate::btree::PageStore;
use crate::error::{Error, Result};
use crate::file::{Header, Storage};
use crate::ids::BlockRef;
use log::trace;

/// Session state of one page-level tree: pending pages and decoded
/// page cache.
pub struct TreeBuffer<C: PageCodec> {
    pub pending: PendingPages<C::Key, C::Value, BlockRef>,
    pub cache: PageCache<BlockRef, PendingPage<C::Key, C::Value, BlockRef>>,
}

impl<C: PageCodec> TreeBuffer<C> {
    #[inline]
    pub fn new(cache_size: usize) -> Self {
        TreeBuffer {
            pending: PendingPages::new(),
            cache: PageCache::new(cache_size),
        }
    }
}

/// Page store reading stored pages from file and buffering every
/// modification as pending page.
pub struct FilePages<'a, S, C: PageCodec> {
    file: &'a mut BlockFile<S>,
    buffer: &'a mut TreeBuffer<C>,
}

impl<'a, S: Storage, C: PageCodec> FilePages<'a, S, C> {
    #[inline]
    pub fn new(file: &'a mut BlockFile<S>, buffer: &'a mut TreeBuffer<C>) -> Self {
        FilePages { file, buffer }
    }
}

impl<S: Storage, C: PageCodec> PageStore for FilePages<'_, S, C> {
    type Key = C::Key;
    type Value = C::Value;
    type Loc = Slot<BlockRef>;

    #[inline]
    fn max_entries(&self, level: u8) -> usize {
        C::max_entries(level)
    }

    fn load(&mut self, loc: Slot<BlockRef>, level: u8) -> Result<CodecPage<C, Slot<BlockRef>>> {
        let bref = match loc {
            Slot::Pending(id) => return self.buffer.pending.get(id).cloned(),
            Slot::Stored(bref) => bref,
        };
        if let Some(page) = self.buffer.cache.get(&bref) {
            return Ok(page.clone());
        }
        let payload = self.file.read_page(bref, C::PAGE_TYPE)?;
        let page = decode_page::<C>(&payload)?.map_loc(Slot::Stored);
        if page.level() != level {
            return Err(Error::InvalidFormat);
        }
        self.buffer.cache.insert(bref, page.clone());
        Ok(page)
    }

    #[inline]
    fn store(
        &mut self,
        prior: Option<Slot<BlockRef>>,
        page: &CodecPage<C, Slot<BlockRef>>,
    ) -> Result<Slot<BlockRef>> {
        if let Some(Slot::Stored(bref)) = prior {
            self.buffer.cache.remove(&bref);
        }
        Ok(self.buffer.pending.put(prior, page))
    }

    #[inline]
    fn free(&mut self, loc: Slot<BlockRef>, _level: u8) -> Result<()> {
        if let Slot::Stored(bref) = loc {
            self.buffer.cache.remove(&bref);
        }
        self.buffer.pending.discard(loc);
        Ok(())
    }
}

/// Places pending pages of a page-level tree into freshly allocated
/// file pages.
pub struct FilePlacer<'a, S, C: PageCodec> {
    file: &'a mut BlockFile<S>,
    amap: &'a mut AllocMap,
    header: &'a mut Header,
    buffer: &'a mut TreeBuffer<C>,
}

impl<'a, S: Storage, C: PageCodec> FilePlacer<'a, S, C> {
    #[inline]
    pub fn new(
        file: &'a mut BlockFile<S>,
        amap: &'a mut AllocMap,
        header: &'a mut Header,
        buffer: &'a mut TreeBuffer<C>,
    ) -> Self {
        FilePlacer {
            file,
            amap,
            header,
            buffer,
        }
    }
}

impl<S: Storage, C: PageCodec> PagePlacer for FilePlacer<'_, S, C> {
    type Key = C::Key;
    type Value = C::Value;
    type Handle = BlockRef;

    #[inline]
    fn take_pending(&mut self, id: u32) -> Result<CodecPage<C, Slot<BlockRef>>> {
        self.buffer.pending.take(id)
    }

    fn place(&mut self, page: Page<C::Key, C::Value, BlockRef>) -> Result<BlockRef> {
        let payload = encode_page::<C>(&page)?;
        let ib = self.amap.allocate(PAGE_SIZE, true)?;
        let bref = BlockRef::new(self.header.next_page_bid(), ib);
        self.file.write_page(bref, C::PAGE_TYPE, &payload)?;
        trace!("place {:?} page {:?}, level={}", C::PAGE_TYPE, bref, page.level());
        self.buffer.cache.insert(bref, page.map_loc(Slot::Stored));
        Ok(bref)
    }
}
