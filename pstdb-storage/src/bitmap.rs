/// Trait to extend byte slice with bitmap functionalities.
/// To avoid naming conflicts, all methods are prefixed with "bitmap_".
///
/// Bits are ordered most significant bit first inside each byte,
/// which is how allocation map pages lay out their granules:
/// bit 0 is `0x80` of byte 0.
pub trait Bitmap {
    /// Returns bool value at given bit.
    fn bitmap_get(&self, idx: usize) -> bool;

    /// Returns number of bits.
    fn bitmap_len(&self) -> usize;

    /// Set bit to true at given position.
    fn bitmap_set(&mut self, idx: usize) -> bool;

    /// Unset given bit to be false.
    fn bitmap_unset(&mut self, idx: usize) -> bool;

    /// Set all bits within given range.
    #[inline]
    fn bitmap_set_range(&mut self, start: usize, len: usize) {
        for idx in start..start + len {
            self.bitmap_set(idx);
        }
    }

    /// Unset all bits within given range.
    /// Returns false if any of them was not set.
    #[inline]
    fn bitmap_unset_range(&mut self, start: usize, len: usize) -> bool {
        let mut res = true;
        for idx in start..start + len {
            res &= self.bitmap_unset(idx);
        }
        res
    }

    /// Returns whether all bits in given range are zero.
    #[inline]
    fn bitmap_range_free(&self, start: usize, len: usize) -> bool {
        (start..start + len).all(|idx| !self.bitmap_get(idx))
    }

    /// Returns number of zero bits.
    #[inline]
    fn bitmap_count_zeros(&self) -> usize {
        (0..self.bitmap_len()).filter(|idx| !self.bitmap_get(*idx)).count()
    }

    /// Find the first run of `len` zero bits whose start is a multiple
    /// of `align`. Returns start index of the run.
    #[inline]
    fn bitmap_find_free_run(&self, len: usize, align: usize) -> Option<usize> {
        debug_assert!(len > 0 && align > 0);
        let total = self.bitmap_len();
        let mut start = 0;
        while start + len <= total {
            // extend current candidate until a set bit breaks it.
            match (start..start + len).find(|idx| self.bitmap_get(*idx)) {
                None => return Some(start),
                Some(used) => {
                    let next = used + 1;
                    start = next.div_ceil(align) * align;
                }
            }
        }
        None
    }
}

impl Bitmap for [u8] {
    #[inline]
    fn bitmap_get(&self, idx: usize) -> bool {
        let mask = 0x80u8 >> (idx % 8);
        self[idx / 8] & mask != 0
    }

    #[inline]
    fn bitmap_len(&self) -> usize {
        self.len() * 8
    }

    #[inline]
    fn bitmap_set(&mut self, idx: usize) -> bool {
        let mask = 0x80u8 >> (idx % 8);
        let unit = &mut self[idx / 8];
        if *unit & mask != 0 {
            return false;
        }
        *unit |= mask;
        true
    }

    #[inline]
    fn bitmap_unset(&mut self, idx: usize) -> bool {
        let mask = 0x80u8 >> (idx % 8);
        let unit = &mut self[idx / 8];
        if *unit & mask == 0 {
            return false;
        }
        *unit &= !mask;
        true
    }

    #[inline]
    fn bitmap_count_zeros(&self) -> usize {
        self.iter().map(|b| b.count_zeros() as usize).sum()
    }
}
