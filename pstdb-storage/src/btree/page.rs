use crate::block::{PagePayload, PageType, PAGE_PAYLOAD_SIZE};
use crate::error::{Error, Result};
use crate::ids::BlockRef;
use crate::serde::{Deser, Ser, Serde};
use std::fmt;

/// Decoded tree page.
///
/// Leaf entries map keys to values, index entries map the minimum key
/// of a child to the child's location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page<K, V, L> {
    Leaf(Vec<(K, V)>),
    Index { level: u8, entries: Vec<(K, L)> },
}

impl<K: Copy, V, L> Page<K, V, L> {
    #[inline]
    pub fn level(&self) -> u8 {
        match self {
            Page::Leaf(_) => 0,
            Page::Index { level, .. } => *level,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Page::Leaf(entries) => entries.len(),
            Page::Index { entries, .. } => entries.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn first_key(&self) -> Option<K> {
        match self {
            Page::Leaf(entries) => entries.first().map(|e| e.0),
            Page::Index { entries, .. } => entries.first().map(|e| e.0),
        }
    }

    /// Move entries starting from `at` into a new page of same level.
    #[inline]
    pub fn split_off(&mut self, at: usize) -> Self {
        match self {
            Page::Leaf(entries) => Page::Leaf(entries.split_off(at)),
            Page::Index { level, entries } => Page::Index {
                level: *level,
                entries: entries.split_off(at),
            },
        }
    }

    /// Convert child locations of an index page.
    #[inline]
    pub fn map_loc<M, F: FnMut(L) -> M>(self, mut f: F) -> Page<K, V, M> {
        match self {
            Page::Leaf(entries) => Page::Leaf(entries),
            Page::Index { level, entries } => Page::Index {
                level,
                entries: entries.into_iter().map(|(k, l)| (k, f(l))).collect(),
            },
        }
    }
}

/// Bytes of a page-level tree page available for entries.
pub const BT_ENTRY_BYTES: usize = 488;
pub const BT_INDEX_ENTRY_SIZE: usize = 24;
const BT_TRAILER_OFFSET: usize = BT_ENTRY_BYTES;

/// Entry encoding of a page-level tree stored in file pages.
/// Index pages share one layout: {key u64, child block reference}.
pub trait PageCodec {
    type Key: Copy + Ord + fmt::Debug;
    type Value: Clone + fmt::Debug + Ser + Deser;

    const PAGE_TYPE: PageType;
    const LEAF_ENTRY_SIZE: usize;

    fn key_to_u64(key: Self::Key) -> u64;

    fn key_from_u64(raw: u64) -> Result<Self::Key>;

    #[inline]
    fn max_entries(level: u8) -> usize {
        if level == 0 {
            BT_ENTRY_BYTES / Self::LEAF_ENTRY_SIZE
        } else {
            BT_ENTRY_BYTES / BT_INDEX_ENTRY_SIZE
        }
    }
}

pub type CodecPage<C, L> = Page<<C as PageCodec>::Key, <C as PageCodec>::Value, L>;

/// Encode a page into page payload.
pub fn encode_page<C: PageCodec>(page: &CodecPage<C, BlockRef>) -> Result<Box<PagePayload>> {
    let level = page.level();
    let max = C::max_entries(level);
    if page.len() > max {
        return Err(Error::InvalidArgument);
    }
    let mut buf = Box::new([0u8; PAGE_PAYLOAD_SIZE]);
    let entry_size = match page {
        Page::Leaf(entries) => {
            for (i, (key, value)) in entries.iter().enumerate() {
                let idx = buf.ser_u64(i * C::LEAF_ENTRY_SIZE, C::key_to_u64(*key));
                value.ser(&mut buf[..], idx);
            }
            C::LEAF_ENTRY_SIZE
        }
        Page::Index { entries, .. } => {
            for (i, (key, child)) in entries.iter().enumerate() {
                let idx = buf.ser_u64(i * BT_INDEX_ENTRY_SIZE, C::key_to_u64(*key));
                child.ser(&mut buf[..], idx);
            }
            BT_INDEX_ENTRY_SIZE
        }
    };
    let idx = buf.ser_u8(BT_TRAILER_OFFSET, page.len() as u8);
    let idx = buf.ser_u8(idx, max as u8);
    let idx = buf.ser_u8(idx, entry_size as u8);
    buf.ser_u8(idx, level);
    Ok(buf)
}

/// Decode page payload, validating the entry counts and sizes.
pub fn decode_page<C: PageCodec>(payload: &PagePayload) -> Result<CodecPage<C, BlockRef>> {
    let buf = &payload[..];
    let (idx, count) = buf.deser_u8(BT_TRAILER_OFFSET)?;
    let (idx, max) = buf.deser_u8(idx)?;
    let (idx, entry_size) = buf.deser_u8(idx)?;
    let (_, level) = buf.deser_u8(idx)?;
    let expected_size = if level == 0 {
        C::LEAF_ENTRY_SIZE
    } else {
        BT_INDEX_ENTRY_SIZE
    };
    if entry_size as usize != expected_size
        || max as usize != C::max_entries(level)
        || count > max
    {
        return Err(Error::InvalidFormat);
    }
    let count = count as usize;
    if level == 0 {
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let (idx, key) = buf.deser_u64(i * expected_size)?;
            let (_, value) = C::Value::deser(buf, idx)?;
            entries.push((C::key_from_u64(key)?, value));
        }
        Ok(Page::Leaf(entries))
    } else {
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let (idx, key) = buf.deser_u64(i * expected_size)?;
            let (_, child) = BlockRef::deser(buf, idx)?;
            entries.push((C::key_from_u64(key)?, child));
        }
        Ok(Page::Index { level, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_split_and_map() {
        let mut page: Page<u32, (), u8> = Page::Index {
            level: 2,
            entries: vec![(1, 10), (4, 40), (9, 90)],
        };
        let right = page.split_off(1);
        assert_eq!(page.len(), 1);
        assert_eq!(right.first_key(), Some(4));
        assert_eq!(right.level(), 2);
        let mapped = right.map_loc(|l| l as u64 * 2);
        assert_eq!(
            mapped,
            Page::Index {
                level: 2,
                entries: vec![(4, 80u64), (9, 180)]
            }
        );
        let leaf: Page<u32, (), u8> = Page::Leaf(vec![]);
        assert!(leaf.is_empty());
        assert_eq!(leaf.first_key(), None);
    }
}
