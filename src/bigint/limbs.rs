use std::cmp::Ordering;

/// One digit of a big integer (half a native word).
pub type Limb = u32;
/// Accumulator wide enough for `limb * limb + limb + carry`.
pub type DoubleLimb = u64;

pub const LIMB_BITS: usize = 32;
pub const LIMB_BYTES: usize = 4;
pub const RADIX: DoubleLimb = 1 << LIMB_BITS;
pub const LIMB_MASK: DoubleLimb = RADIX - 1;

/// Reference count marking a value that never goes back to the pool.
pub(crate) const PERMANENT: u32 = u32::MAX;

/// Backing storage of a pooled value, least-significant limb first.
///
/// `limbs.len()` is the physical capacity; `len` is the number of limbs
/// in use. Everything above `len` is scratch.
#[derive(Debug, Default)]
pub(crate) struct LimbBuffer {
    pub(crate) limbs: Vec<Limb>,
    pub(crate) len: usize,
    pub(crate) refs: u32,
}

impl LimbBuffer {
    /// A shell with `capacity` zeroed limbs and no limbs in use.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        LimbBuffer {
            limbs: vec![0; capacity.max(1)],
            len: 0,
            refs: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.limbs.len()
    }

    /// The limbs in use.
    pub(crate) fn digits(&self) -> &[Limb] {
        &self.limbs[..self.len]
    }

    pub(crate) fn digits_mut(&mut self) -> &mut [Limb] {
        &mut self.limbs[..self.len]
    }

    /// Limb `i`, or zero past the end.
    #[inline]
    pub(crate) fn get(&self, i: usize) -> Limb {
        if i < self.len {
            self.limbs[i]
        } else {
            0
        }
    }

    /// Set the logical length to `n`, growing storage when needed.
    ///
    /// Limbs exposed above the old length are zeroed unless `skip_zero_fill`
    /// is set, in which case the caller must overwrite them.
    pub(crate) fn resize(&mut self, n: usize, skip_zero_fill: bool) {
        if n > self.capacity() {
            let grown = n.max(self.capacity() * 2);
            self.limbs.resize(grown, 0);
        }
        if !skip_zero_fill && n > self.len {
            let old = self.len;
            self.limbs[old..n].fill(0);
        }
        self.len = n;
    }

    /// Drop leading zero limbs, keeping at least one.
    pub(crate) fn trim(&mut self) {
        while self.len > 1 && self.limbs[self.len - 1] == 0 {
            self.len -= 1;
        }
        if self.len == 0 {
            self.limbs[0] = 0;
            self.len = 1;
        }
    }

    /// Length the value would have once trimmed.
    pub(crate) fn significant_len(&self) -> usize {
        let mut n = self.len;
        while n > 1 && self.limbs[n - 1] == 0 {
            n -= 1;
        }
        n.max(1)
    }

    /// Canonical zero: one limb, value 0.
    pub(crate) fn set_zero(&mut self) {
        self.limbs[0] = 0;
        self.len = 1;
    }

    pub(crate) fn is_zero(&self) -> bool {
        self.digits().iter().all(|&l| l == 0)
    }

    pub(crate) fn bit_is_set(&self, bit: usize) -> bool {
        let limb = bit / LIMB_BITS;
        (self.get(limb) >> (bit % LIMB_BITS)) & 1 == 1
    }

    /// 1-based index of the highest set bit; 0 for zero.
    pub(crate) fn bit_count(&self) -> usize {
        for i in (0..self.len).rev() {
            let limb = self.limbs[i];
            if limb != 0 {
                return i * LIMB_BITS + (LIMB_BITS - limb.leading_zeros() as usize);
            }
        }
        0
    }

    /// Compare two trimmed buffers: length first, then limbs from the top.
    pub(crate) fn compare(&self, other: &LimbBuffer) -> Ordering {
        if self.len != other.len {
            return self.len.cmp(&other.len);
        }
        for i in (0..self.len).rev() {
            match self.limbs[i].cmp(&other.limbs[i]) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }

    /// Multiply by `radix^n`.
    pub(crate) fn left_shift(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let old = self.len;
        self.resize(old + n, true);
        self.limbs.copy_within(0..old, n);
        self.limbs[..n].fill(0);
    }

    /// Divide by `radix^n`, collapsing to zero when nothing is left.
    pub(crate) fn right_shift(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        if n >= self.len {
            self.set_zero();
            return;
        }
        let old = self.len;
        self.limbs.copy_within(n..old, 0);
        self.len = old - n;
    }

    /// Keep only the low `n` limbs (`value mod radix^n`), trimmed.
    pub(crate) fn truncate(&mut self, n: usize) {
        if self.len > n {
            self.len = n.max(1);
            if n == 0 {
                self.limbs[0] = 0;
            }
        }
        self.trim();
    }

    /// Overwrite this buffer with the limbs of `src`.
    pub(crate) fn copy_from(&mut self, src: &LimbBuffer) {
        self.resize(src.len, true);
        self.limbs[..src.len].copy_from_slice(src.digits());
    }
}
