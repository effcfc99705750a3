use crate::error::{Error, Result};
use std::mem;

pub trait Serde {
    /// Serialize a u64 value to a byte slice.
    fn ser_u64(&mut self, idx: usize, val: u64) -> usize;

    /// Serialize a u32 value to a byte slice.
    fn ser_u32(&mut self, idx: usize, val: u32) -> usize;

    /// Serialize a u16 value to a byte slice.
    fn ser_u16(&mut self, idx: usize, val: u16) -> usize;

    /// Serialize a u8 value to a byte slice.
    fn ser_u8(&mut self, idx: usize, val: u8) -> usize;

    /// Serialize byte slice.
    fn ser_byte_slice(&mut self, idx: usize, val: &[u8]) -> usize;

    /// Fill given range with zeros.
    fn ser_zeros(&mut self, idx: usize, len: usize) -> usize;

    /// Deserialize a u64 value from a byte slice.
    fn deser_u64(&self, idx: usize) -> Result<(usize, u64)>;

    /// Deserialize a u32 value from a byte slice.
    fn deser_u32(&self, idx: usize) -> Result<(usize, u32)>;

    /// Deserialize a u16 value from a byte slice.
    fn deser_u16(&self, idx: usize) -> Result<(usize, u16)>;

    /// Deserialize a u8 value from a byte slice.
    fn deser_u8(&self, idx: usize) -> Result<(usize, u8)>;

    /// Deserialize fixed size byte array.
    fn deser_byte_array<const N: usize>(&self, idx: usize) -> Result<(usize, [u8; N])>;

    /// Returns a byte slice to caller for deserialization.
    fn deser_byte_slice(&self, idx: usize, len: usize) -> Result<(usize, &[u8])>;
}

impl Serde for [u8] {
    #[inline]
    fn ser_u64(&mut self, idx: usize, val: u64) -> usize {
        debug_assert!(idx + mem::size_of::<u64>() <= self.len());
        self[idx..idx + mem::size_of::<u64>()].copy_from_slice(&val.to_le_bytes());
        idx + mem::size_of::<u64>()
    }

    #[inline]
    fn ser_u32(&mut self, idx: usize, val: u32) -> usize {
        debug_assert!(idx + mem::size_of::<u32>() <= self.len());
        self[idx..idx + mem::size_of::<u32>()].copy_from_slice(&val.to_le_bytes());
        idx + mem::size_of::<u32>()
    }

    #[inline]
    fn ser_u16(&mut self, idx: usize, val: u16) -> usize {
        debug_assert!(idx + mem::size_of::<u16>() <= self.len());
        self[idx..idx + mem::size_of::<u16>()].copy_from_slice(&val.to_le_bytes());
        idx + mem::size_of::<u16>()
    }

    #[inline]
    fn ser_u8(&mut self, idx: usize, val: u8) -> usize {
        debug_assert!(idx < self.len());
        self[idx] = val;
        idx + mem::size_of::<u8>()
    }

    #[inline]
    fn ser_byte_slice(&mut self, idx: usize, val: &[u8]) -> usize {
        debug_assert!(idx + val.len() <= self.len());
        self[idx..idx + val.len()].copy_from_slice(val);
        idx + val.len()
    }

    #[inline]
    fn ser_zeros(&mut self, idx: usize, len: usize) -> usize {
        debug_assert!(idx + len <= self.len());
        self[idx..idx + len].fill(0);
        idx + len
    }

    #[inline]
    fn deser_u64(&self, idx: usize) -> Result<(usize, u64)> {
        let (idx, bytes) = self.deser_byte_array::<8>(idx)?;
        Ok((idx, u64::from_le_bytes(bytes)))
    }

    #[inline]
    fn deser_u32(&self, idx: usize) -> Result<(usize, u32)> {
        let (idx, bytes) = self.deser_byte_array::<4>(idx)?;
        Ok((idx, u32::from_le_bytes(bytes)))
    }

    #[inline]
    fn deser_u16(&self, idx: usize) -> Result<(usize, u16)> {
        let (idx, bytes) = self.deser_byte_array::<2>(idx)?;
        Ok((idx, u16::from_le_bytes(bytes)))
    }

    #[inline]
    fn deser_u8(&self, idx: usize) -> Result<(usize, u8)> {
        match self.get(idx) {
            Some(v) => Ok((idx + 1, *v)),
            None => Err(Error::InvalidFormat),
        }
    }

    #[inline]
    fn deser_byte_array<const N: usize>(&self, idx: usize) -> Result<(usize, [u8; N])> {
        let (idx, bytes) = self.deser_byte_slice(idx, N)?;
        Ok((idx, bytes.try_into()?))
    }

    #[inline]
    fn deser_byte_slice(&self, idx: usize, len: usize) -> Result<(usize, &[u8])> {
        let end = idx.checked_add(len).ok_or(Error::InvalidFormat)?;
        match self.get(idx..end) {
            Some(res) => Ok((end, res)),
            None => Err(Error::InvalidFormat),
        }
    }
}

/// Defines how to serialize self to bytes.
///
/// This trait is designed to write a serialized object with a known
/// size to a fixed-sized buffer.
pub trait Ser {
    /// length of serialized bytes.
    fn ser_len(&self) -> usize;

    /// Serialize object into fix-sized byte slice.
    /// The buffer is guaranteed to be big enough.
    fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize;

    /// Serialize object into a new buffer.
    #[inline]
    fn ser_to_vec(&self) -> Vec<u8> {
        let mut res = vec![0u8; self.ser_len()];
        let idx = self.ser(&mut res[..], 0);
        debug_assert_eq!(idx, res.len());
        res
    }
}

/// Defines how to deserialize objects from bytes.
pub trait Deser: Sized {
    /// Deserialize objects from input.
    fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_primitives() {
        let mut buf = vec![0u8; 15];
        let idx = buf.ser_u64(0, 0x0102_0304_0506_0708);
        let idx = buf.ser_u32(idx, 0xAABB_CCDD);
        let idx = buf.ser_u16(idx, 0x1122);
        let idx = buf.ser_u8(idx, 0x7F);
        assert_eq!(idx, 15);
        assert_eq!(&buf[..2], &[0x08, 0x07]);

        let (idx, v) = buf.deser_u64(0).unwrap();
        assert_eq!(v, 0x0102_0304_0506_0708);
        let (idx, v) = buf.deser_u32(idx).unwrap();
        assert_eq!(v, 0xAABB_CCDD);
        let (idx, v) = buf.deser_u16(idx).unwrap();
        assert_eq!(v, 0x1122);
        let (idx, v) = buf.deser_u8(idx).unwrap();
        assert_eq!(v, 0x7F);
        assert_eq!(idx, 15);
    }

    #[test]
    fn test_deser_out_of_bound() {
        let buf = [0u8; 6];
        assert_eq!(buf.deser_u64(0), Err(Error::InvalidFormat));
        assert_eq!(buf.deser_u32(4), Err(Error::InvalidFormat));
        assert_eq!(buf.deser_u8(6), Err(Error::InvalidFormat));
        assert!(buf.deser_byte_slice(usize::MAX, 2).is_err());
        assert!(buf.deser_u16(4).is_ok());
    }
}
