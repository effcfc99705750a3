//! Node database session.
//!
//! `Ndb` owns the container for the whole session: header, allocation
//! map, node tree and block tree. Page-level tree modifications are
//! buffered as pending pages, blocks are written immediately and
//! registered in the block tree. `save` places pending pages children
//! first, then frees superseded storage, writes the allocation map and
//! finally the header.
//!
//! The allocation-map-valid flag in the header is cleared on disk before
//! the first structural write of a session and set again at the end of
//! a successful save. A container opened with the flag cleared gets its
//! allocation map rebuilt from the two page-level trees.
use crate::amap::AllocMap;
use crate::bbt::{BbtCodec, BlockEntry, BlockTree};
use crate::block::{block_total_size, BlockAccess, BlockFile, PAGE_SIZE};
use crate::btree::store::{FilePages, FilePlacer, TreeBuffer};
use crate::btree::{decode_page, Page, PageCodec, Slot, TreeRoot};
use crate::conf::NdbConfig;
use crate::crypt::CryptMethod;
use crate::error::{Error, Result};
use crate::file::{AMapState, Header, Storage, HEADER_SIZE};
use crate::ids::{Bid, BlockRef, Ib, Nid, NidType};
use crate::nbt::{NbtCodec, NodeEntry, NodeTree};
use crate::node::{Node, NodeLimits};
use crate::serde::{Deser, Ser};
use log::{debug, trace, warn};

pub struct Ndb<S> {
    config: NdbConfig,
    file: BlockFile<S>,
    header: Header,
    amap: AllocMap,
    nbt: NodeTree,
    bbt: BlockTree,
    nbt_buf: TreeBuffer<NbtCodec>,
    bbt_buf: TreeBuffer<BbtCodec>,
    // extents of released blocks, freed once the save pass placed
    // everything which replaced them.
    released: Vec<(Ib, usize)>,
    // whether the valid flag is cleared on disk.
    amap_invalidated: bool,
    limits: NodeLimits,
}

impl<S: Storage> Ndb<S> {
    /// Create a new empty container on given storage.
    pub fn create(storage: S, config: NdbConfig) -> Result<Self> {
        let mut file = BlockFile::new(storage, config.crypt_method, config.verify_checksum);
        let mut header = Header::new(config.crypt_method);
        let mut amap = AllocMap::create(config.max_file_size.as_u64())?;
        amap.flush(&mut file)?;
        amap.update_root(&mut header.root);
        header.root.amap_state = AMapState::Valid2;
        file.write_raw(0, &header.ser_to_vec())?;
        file.sync()?;
        debug!(
            "create node database, crypt={:?}, file_eof={:#x}",
            config.crypt_method, header.root.file_eof
        );
        Ok(Ndb {
            nbt_buf: TreeBuffer::new(config.page_cache_size),
            bbt_buf: TreeBuffer::new(config.page_cache_size),
            config,
            file,
            header,
            amap,
            nbt: NodeTree::new(),
            bbt: BlockTree::new(),
            released: vec![],
            amap_invalidated: false,
            limits: NodeLimits::default(),
        })
    }

    /// Open an existing container.
    pub fn open(mut storage: S, config: NdbConfig) -> Result<Self> {
        if storage.len()? < HEADER_SIZE as u64 {
            return Err(Error::InvalidFormat);
        }
        let mut file = BlockFile::new(storage, CryptMethod::None, config.verify_checksum);
        let mut buf = [0u8; HEADER_SIZE];
        file.read_raw(0, &mut buf)?;
        let (_, header) = Header::deser(&buf[..], 0)?;
        file.set_crypt(header.crypt_method);
        let nbt = NodeTree::with_root(load_root::<S, NbtCodec>(&mut file, header.root.nbt)?);
        let bbt = BlockTree::with_root(load_root::<S, BbtCodec>(&mut file, header.root.bbt)?);
        let mut nbt_buf = TreeBuffer::new(config.page_cache_size);
        let mut bbt_buf = TreeBuffer::new(config.page_cache_size);
        let max_file_size = config.max_file_size.as_u64();
        let (amap, amap_invalidated) = if header.root.amap_state.is_valid() {
            (AllocMap::load(&mut file, &header.root, max_file_size)?, false)
        } else {
            warn!("allocation map is not valid, rebuild it from page-level trees");
            let used = used_extents(&mut file, &nbt, &bbt, &mut nbt_buf, &mut bbt_buf)?;
            (AllocMap::rebuild(&header.root, max_file_size, used)?, true)
        };
        debug!(
            "open node database, crypt={:?}, file_eof={:#x}, amap_valid={}",
            header.crypt_method,
            header.root.file_eof,
            !amap_invalidated
        );
        Ok(Ndb {
            config,
            file,
            header,
            amap,
            nbt,
            bbt,
            nbt_buf,
            bbt_buf,
            released: vec![],
            amap_invalidated,
            limits: NodeLimits::default(),
        })
    }

    #[inline]
    pub fn config(&self) -> &NdbConfig {
        &self.config
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn amap(&self) -> &AllocMap {
        &self.amap
    }

    /// Whether the session holds changes not saved yet.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.amap_invalidated
    }

    /// Persist every change of the session.
    pub fn save(&mut self) -> Result<()> {
        if !self.amap_invalidated {
            // nothing structural changed, only counters may differ.
            self.write_header()?;
            return self.file.sync();
        }
        let nbt_root = {
            let mut placer = FilePlacer::new(
                &mut self.file,
                &mut self.amap,
                &mut self.header,
                &mut self.nbt_buf,
            );
            self.nbt.flush(&mut placer)?
        };
        let bbt_root = {
            let mut placer = FilePlacer::new(
                &mut self.file,
                &mut self.amap,
                &mut self.header,
                &mut self.bbt_buf,
            );
            self.bbt.flush(&mut placer)?
        };
        self.header.root.nbt = nbt_root.map(|r| r.loc).unwrap_or_default();
        self.header.root.bbt = bbt_root.map(|r| r.loc).unwrap_or_default();

        let mut superseded = self.nbt_buf.pending.take_superseded();
        superseded.extend(self.bbt_buf.pending.take_superseded());
        for bref in &superseded {
            self.amap.free(bref.ib, PAGE_SIZE)?;
        }
        for (ib, len) in self.released.drain(..) {
            self.amap.free(ib, len)?;
        }
        self.amap.flush(&mut self.file)?;
        self.amap.update_root(&mut self.header.root);
        self.header.root.amap_state = AMapState::Valid2;
        self.write_header()?;
        self.file.sync()?;
        self.amap_invalidated = false;
        debug!(
            "node database saved, nbt={:?}, bbt={:?}, superseded pages={}, free={}",
            self.header.root.nbt,
            self.header.root.bbt,
            superseded.len(),
            self.amap.free_bytes()
        );
        Ok(())
    }

    /// Save and return the backing storage.
    pub fn close(mut self) -> Result<S> {
        self.save()?;
        debug!("close node database");
        Ok(self.file.into_storage())
    }

    /// Allocate a node id and register an empty node under given parent.
    pub fn create_node(&mut self, nid_type: NidType, parent: Nid) -> Result<Node> {
        self.invalidate_amap()?;
        let nid = self.header.next_nid(nid_type)?;
        let entry = NodeEntry {
            data: 0,
            sub: 0,
            parent,
        };
        let mut pages = FilePages::new(&mut self.file, &mut self.nbt_buf);
        self.nbt.insert(&mut pages, nid, entry)?;
        trace!("create node {:?}, parent={:?}", nid, parent);
        Ok(Node::new(nid, self.limits))
    }

    #[inline]
    pub fn node_entry(&mut self, nid: Nid) -> Result<Option<NodeEntry>> {
        let mut pages = FilePages::new(&mut self.file, &mut self.nbt_buf);
        self.nbt.get(&mut pages, nid)
    }

    /// Open a node, `None` if absent.
    pub fn open_node(&mut self, nid: Nid) -> Result<Option<Node>> {
        let Some(entry) = self.node_entry(nid)? else {
            return Ok(None);
        };
        let limits = self.limits;
        Node::open(self, nid, entry.data, entry.sub, limits).map(Some)
    }

    /// Save a node and record its roots in the node tree. The node must
    /// have been created or opened from the current entry of its id.
    pub fn save_node(&mut self, node: &mut Node) -> Result<()> {
        let Some(mut entry) = self.node_entry(node.nid())? else {
            return Err(Error::InvalidArgument);
        };
        if (entry.data, entry.sub) != node.stored_roots() {
            return Err(Error::DuplicateKey);
        }
        if !node.is_dirty() {
            return Ok(());
        }
        let (data, sub) = node.save(self)?;
        if (data, sub) != (entry.data, entry.sub) {
            entry.data = data;
            entry.sub = sub;
            let mut pages = FilePages::new(&mut self.file, &mut self.nbt_buf);
            self.nbt.update(&mut pages, node.nid(), entry)?;
        }
        Ok(())
    }

    /// Move a node under another parent. Returns false if not found.
    pub fn set_parent(&mut self, nid: Nid, parent: Nid) -> Result<bool> {
        let Some(mut entry) = self.node_entry(nid)? else {
            return Ok(false);
        };
        if entry.parent == parent {
            return Ok(true);
        }
        self.invalidate_amap()?;
        entry.parent = parent;
        let mut pages = FilePages::new(&mut self.file, &mut self.nbt_buf);
        self.nbt.update(&mut pages, nid, entry)
    }

    /// Delete a node and release its data, subnodes included.
    pub fn delete_node(&mut self, nid: Nid) -> Result<bool> {
        let Some(entry) = self.node_entry(nid)? else {
            return Ok(false);
        };
        self.invalidate_amap()?;
        let limits = self.limits;
        Node::open(self, nid, entry.data, entry.sub, limits)?.destroy(self)?;
        let mut pages = FilePages::new(&mut self.file, &mut self.nbt_buf);
        self.nbt.delete(&mut pages, nid)?;
        trace!("delete node {:?}", nid);
        Ok(true)
    }

    /// All nodes in id order.
    #[inline]
    pub fn node_entries(&mut self) -> Result<Vec<(Nid, NodeEntry)>> {
        let mut pages = FilePages::new(&mut self.file, &mut self.nbt_buf);
        self.nbt.entries(&mut pages)
    }

    #[inline]
    pub fn block_entry(&mut self, bid: Bid) -> Result<Option<BlockEntry>> {
        let mut pages = FilePages::new(&mut self.file, &mut self.bbt_buf);
        self.bbt.get(&mut pages, bid)
    }

    /// All blocks in id order.
    #[inline]
    pub fn block_entries(&mut self) -> Result<Vec<(Bid, BlockEntry)>> {
        let mut pages = FilePages::new(&mut self.file, &mut self.bbt_buf);
        self.bbt.entries(&mut pages)
    }

    /// Add a reference to a block shared by another structure.
    pub fn add_block_ref(&mut self, bid: Bid) -> Result<()> {
        let Some(mut entry) = self.block_entry(bid)? else {
            return Err(Error::InvalidArgument);
        };
        entry.cref = entry.cref.checked_add(1).ok_or(Error::InvalidArgument)?;
        self.invalidate_amap()?;
        let mut pages = FilePages::new(&mut self.file, &mut self.bbt_buf);
        self.bbt.update(&mut pages, bid, entry)?;
        Ok(())
    }

    /// Verify both page-level trees, returns number of nodes and blocks.
    pub fn check(&mut self) -> Result<(usize, usize)> {
        let mut pages = FilePages::new(&mut self.file, &mut self.nbt_buf);
        let nodes = self.nbt.check(&mut pages)?;
        let mut pages = FilePages::new(&mut self.file, &mut self.bbt_buf);
        let blocks = self.bbt.check(&mut pages)?;
        Ok((nodes, blocks))
    }

    #[inline]
    fn write_header(&mut self) -> Result<()> {
        self.file.write_raw(0, &self.header.ser_to_vec())
    }

    /// Clear the valid flag on disk before the first structural write.
    fn invalidate_amap(&mut self) -> Result<()> {
        if self.amap_invalidated {
            return Ok(());
        }
        self.header.root.amap_state = AMapState::Invalid;
        self.write_header()?;
        self.file.sync()?;
        self.amap_invalidated = true;
        debug!("allocation map marked invalid");
        Ok(())
    }
}

impl<S: Storage> BlockAccess for Ndb<S> {
    fn read_block(&mut self, bid: Bid) -> Result<Vec<u8>> {
        let Some(entry) = self.block_entry(bid)? else {
            return Err(Error::InvalidFormat);
        };
        self.file
            .read_block(BlockRef::new(bid, entry.ib), entry.cb as usize)
    }

    fn write_block(&mut self, data: &[u8], internal: bool) -> Result<Bid> {
        self.invalidate_amap()?;
        let size = block_total_size(data.len());
        let ib = self.amap.allocate(size, false)?;
        let bid = self.header.next_block_bid(internal);
        self.file.write_block(BlockRef::new(bid, ib), data)?;
        let entry = BlockEntry {
            ib,
            cb: data.len() as u16,
            cref: 1,
        };
        let mut pages = FilePages::new(&mut self.file, &mut self.bbt_buf);
        self.bbt.insert(&mut pages, bid, entry)?;
        Ok(bid)
    }

    fn release_block(&mut self, bid: Bid) -> Result<()> {
        let Some(mut entry) = self.block_entry(bid)? else {
            return Err(Error::InvalidFree);
        };
        self.invalidate_amap()?;
        let mut pages = FilePages::new(&mut self.file, &mut self.bbt_buf);
        if entry.cref > 1 {
            entry.cref -= 1;
            self.bbt.update(&mut pages, bid, entry)?;
        } else {
            self.bbt.delete(&mut pages, bid)?;
            self.released
                .push((entry.ib, block_total_size(entry.cb as usize)));
        }
        Ok(())
    }
}

/// Root of a stored page-level tree, its level read from the root page.
fn load_root<S: Storage, C: PageCodec>(
    file: &mut BlockFile<S>,
    bref: BlockRef,
) -> Result<Option<TreeRoot<Slot<BlockRef>>>> {
    if bref.is_null() {
        return Ok(None);
    }
    let payload = file.read_page(bref, C::PAGE_TYPE)?;
    let page = decode_page::<C>(&payload)?;
    Ok(Some(TreeRoot {
        loc: Slot::Stored(bref),
        level: page.level(),
    }))
}

/// Every extent referenced by the page-level trees: their pages and
/// all blocks listed in the block tree.
fn used_extents<S: Storage>(
    file: &mut BlockFile<S>,
    nbt: &NodeTree,
    bbt: &BlockTree,
    nbt_buf: &mut TreeBuffer<NbtCodec>,
    bbt_buf: &mut TreeBuffer<BbtCodec>,
) -> Result<Vec<(Ib, usize)>> {
    let mut used = vec![];
    let mut pages = FilePages::new(&mut *file, nbt_buf);
    nbt.walk(&mut pages, |loc, _| {
        if let Slot::Stored(bref) = loc {
            used.push((bref.ib, PAGE_SIZE));
        }
        Ok(())
    })?;
    let mut pages = FilePages::new(file, bbt_buf);
    bbt.walk(&mut pages, |loc, page| {
        if let Slot::Stored(bref) = loc {
            used.push((bref.ib, PAGE_SIZE));
        }
        if let Page::Leaf(entries) = page {
            used.extend(
                entries
                    .iter()
                    .map(|(_, e)| (e.ib, block_total_size(e.cb as usize))),
            );
        }
        Ok(())
    })?;
    Ok(used)
}
