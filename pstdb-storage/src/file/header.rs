use crate::crc::compute_crc;
use crate::crypt::CryptMethod;
use crate::error::{Error, Result};
use crate::ids::{
    Bid, BlockRef, Ib, Nid, NidType, BID_INCREMENT, NID_INDEX_MAX, NID_TYPE_COUNT,
};
use crate::serde::{Deser, Ser, Serde};

pub const HEADER_MAGIC: [u8; 4] = *b"!BDN";
pub const HEADER_MAGIC_CLIENT: [u8; 2] = *b"SM";
/// Unicode layout version written by this crate.
pub const HEADER_VERSION: u16 = 23;
/// Oldest version using 64-bit ids.
pub const HEADER_VERSION_UNICODE_MIN: u16 = 23;
pub const HEADER_VERSION_CLIENT: u16 = 19;
pub const HEADER_SENTINEL: u8 = 0x80;
pub const HEADER_SIZE: usize = 564;
pub const ROOT_SIZE: usize = 72;

const PARTIAL_CRC_START: usize = 8;
const PARTIAL_CRC_LEN: usize = 471;
const FULL_CRC_LEN: usize = 516;
const ROOT_OFFSET: usize = 180;
const SENTINEL_OFFSET: usize = 512;
const FULL_CRC_OFFSET: usize = 524;

/// First index handed out by each nid type counter.
pub const NID_INDEX_START: u32 = 0x400;

/// Allocation map state recorded in the root.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AMapState {
    Invalid = 0,
    Valid1 = 1,
    Valid2 = 2,
}

impl AMapState {
    #[inline]
    pub fn is_valid(self) -> bool {
        self != AMapState::Invalid
    }
}

impl From<u8> for AMapState {
    #[inline]
    fn from(value: u8) -> Self {
        match value {
            1 => AMapState::Valid1,
            2 => AMapState::Valid2,
            _ => AMapState::Invalid,
        }
    }
}

/// Root of the container: file extent, allocation map summary and
/// the roots of the two page-level trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Root {
    pub file_eof: Ib,
    pub amap_last: Ib,
    pub amap_free: u64,
    pub pmap_free: u64,
    pub nbt: BlockRef,
    pub bbt: BlockRef,
    pub amap_state: AMapState,
}

impl Ser for Root {
    #[inline]
    fn ser_len(&self) -> usize {
        ROOT_SIZE
    }

    #[inline]
    fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize {
        let idx = out.ser_u32(start_idx, 0);
        let idx = out.ser_u64(idx, self.file_eof);
        let idx = out.ser_u64(idx, self.amap_last);
        let idx = out.ser_u64(idx, self.amap_free);
        let idx = out.ser_u64(idx, self.pmap_free);
        let idx = self.nbt.ser(out, idx);
        let idx = self.bbt.ser(out, idx);
        let idx = out.ser_u8(idx, self.amap_state as u8);
        let idx = out.ser_u8(idx, 0);
        out.ser_u16(idx, 0)
    }
}

impl Deser for Root {
    #[inline]
    fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)> {
        let (idx, _) = input.deser_u32(start_idx)?;
        let (idx, file_eof) = input.deser_u64(idx)?;
        let (idx, amap_last) = input.deser_u64(idx)?;
        let (idx, amap_free) = input.deser_u64(idx)?;
        let (idx, pmap_free) = input.deser_u64(idx)?;
        let (idx, nbt) = BlockRef::deser(input, idx)?;
        let (idx, bbt) = BlockRef::deser(input, idx)?;
        let (idx, amap_state) = input.deser_u8(idx)?;
        let (idx, _) = input.deser_u8(idx)?;
        let (idx, _) = input.deser_u16(idx)?;
        Ok((
            idx,
            Root {
                file_eof,
                amap_last,
                amap_free,
                pmap_free,
                nbt,
                bbt,
                amap_state: AMapState::from(amap_state),
            },
        ))
    }
}

/// Container header: the fixed structure at offset zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub version_client: u16,
    pub bid_next_p: Bid,
    pub unique: u32,
    pub nid_counters: [u32; NID_TYPE_COUNT],
    pub root: Root,
    pub crypt_method: CryptMethod,
    pub bid_next_b: Bid,
}

impl Header {
    /// Header of a new empty container. The root is filled by the
    /// allocation map once the first region exists.
    #[inline]
    pub fn new(crypt_method: CryptMethod) -> Self {
        Header {
            version: HEADER_VERSION,
            version_client: HEADER_VERSION_CLIENT,
            bid_next_p: BID_INCREMENT,
            unique: 0,
            nid_counters: [NID_INDEX_START; NID_TYPE_COUNT],
            root: Root {
                file_eof: 0,
                amap_last: 0,
                amap_free: 0,
                pmap_free: 0,
                nbt: BlockRef::default(),
                bbt: BlockRef::default(),
                amap_state: AMapState::Invalid,
            },
            crypt_method,
            bid_next_b: BID_INCREMENT,
        }
    }

    /// Allocate id for a new page.
    #[inline]
    pub fn next_page_bid(&mut self) -> Bid {
        let bid = self.bid_next_p;
        self.bid_next_p += BID_INCREMENT;
        bid
    }

    /// Allocate id for a new block. Internal blocks carry the internal bit.
    #[inline]
    pub fn next_block_bid(&mut self, internal: bool) -> Bid {
        let bid = self.bid_next_b;
        self.bid_next_b += BID_INCREMENT;
        if internal {
            bid | crate::ids::BID_INTERNAL_MASK
        } else {
            bid
        }
    }

    /// Allocate a new node id of given type.
    #[inline]
    pub fn next_nid(&mut self, nid_type: NidType) -> Result<Nid> {
        let counter = &mut self.nid_counters[nid_type as usize];
        if *counter > NID_INDEX_MAX {
            return Err(Error::NidExhausted(nid_type as u8));
        }
        let nid = Nid::new(nid_type, *counter);
        *counter += 1;
        self.unique = self.unique.wrapping_add(1);
        Ok(nid)
    }
}

impl Ser for Header {
    #[inline]
    fn ser_len(&self) -> usize {
        HEADER_SIZE
    }

    #[inline]
    fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize {
        let mut buf = [0u8; HEADER_SIZE];
        let idx = buf.ser_byte_slice(0, &HEADER_MAGIC);
        let idx = idx + 4; // partial crc
        let idx = buf.ser_byte_slice(idx, &HEADER_MAGIC_CLIENT);
        let idx = buf.ser_u16(idx, self.version);
        let idx = buf.ser_u16(idx, self.version_client);
        let idx = buf.ser_u8(idx, 0x01); // platform create
        let idx = buf.ser_u8(idx, 0x01); // platform access
        let idx = buf.ser_zeros(idx, 8 + 8); // reserved and unused bid
        let idx = buf.ser_u64(idx, self.bid_next_p);
        let mut idx = buf.ser_u32(idx, self.unique);
        for counter in &self.nid_counters {
            idx = buf.ser_u32(idx, *counter);
        }
        let idx = buf.ser_zeros(idx, 8);
        debug_assert_eq!(idx, ROOT_OFFSET);
        let idx = self.root.ser(&mut buf[..], idx);
        let idx = buf.ser_zeros(idx, 4 + 128 + 128);
        debug_assert_eq!(idx, SENTINEL_OFFSET);
        let idx = buf.ser_u8(idx, HEADER_SENTINEL);
        let idx = buf.ser_u8(idx, self.crypt_method as u8);
        let idx = buf.ser_zeros(idx, 2);
        let idx = buf.ser_u64(idx, self.bid_next_b);
        debug_assert_eq!(idx, FULL_CRC_OFFSET);

        let partial = compute_crc(&buf[PARTIAL_CRC_START..PARTIAL_CRC_START + PARTIAL_CRC_LEN]);
        buf.ser_u32(4, partial);
        let full = compute_crc(&buf[PARTIAL_CRC_START..PARTIAL_CRC_START + FULL_CRC_LEN]);
        buf.ser_u32(FULL_CRC_OFFSET, full);
        out.ser_byte_slice(start_idx, &buf)
    }
}

impl Deser for Header {
    #[inline]
    fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)> {
        let (end_idx, buf) = input.deser_byte_slice(start_idx, HEADER_SIZE)?;
        if buf[..4] != HEADER_MAGIC || buf[8..10] != HEADER_MAGIC_CLIENT {
            return Err(Error::InvalidFormat);
        }
        let (_, version) = buf.deser_u16(10)?;
        if version < HEADER_VERSION_UNICODE_MIN {
            return Err(Error::NotSupported("32-bit file layout"));
        }
        let (_, partial) = buf.deser_u32(4)?;
        if partial != compute_crc(&buf[PARTIAL_CRC_START..PARTIAL_CRC_START + PARTIAL_CRC_LEN]) {
            return Err(Error::ChecksumMismatch);
        }
        let (_, full) = buf.deser_u32(FULL_CRC_OFFSET)?;
        if full != compute_crc(&buf[PARTIAL_CRC_START..PARTIAL_CRC_START + FULL_CRC_LEN]) {
            return Err(Error::ChecksumMismatch);
        }
        let (_, version_client) = buf.deser_u16(12)?;
        let (_, bid_next_p) = buf.deser_u64(32)?;
        let (mut idx, unique) = buf.deser_u32(40)?;
        let mut nid_counters = [0u32; NID_TYPE_COUNT];
        for counter in &mut nid_counters {
            let (next, v) = buf.deser_u32(idx)?;
            *counter = v;
            idx = next;
        }
        let (_, root) = Root::deser(buf, ROOT_OFFSET)?;
        let (idx, sentinel) = buf.deser_u8(SENTINEL_OFFSET)?;
        if sentinel != HEADER_SENTINEL {
            return Err(Error::InvalidFormat);
        }
        let (idx, crypt_method) = buf.deser_u8(idx)?;
        let (_, bid_next_b) = buf.deser_u64(idx + 2)?;
        Ok((
            end_idx,
            Header {
                version,
                version_client,
                bid_next_p,
                unique,
                nid_counters,
                root,
                crypt_method: CryptMethod::try_from(crypt_method)?,
                bid_next_b,
            },
        ))
    }
}
