use crate::bigint::context::{BigInt, BigIntCtx};
use crate::bigint::limbs::{DoubleLimb, Limb, LIMB_BITS};
use crate::error::{Error, Result};

/// Two's complement of a limb run, in place.
fn negate(limbs: &mut [Limb]) {
    let mut carry: DoubleLimb = 1;
    for limb in limbs {
        let t = (!*limb) as DoubleLimb + carry;
        *limb = t as Limb;
        carry = t >> LIMB_BITS;
    }
}

impl BigIntCtx {
    /// `a + b`, consuming `b`. The result reuses the storage of `a`.
    pub fn add(&mut self, a: BigInt, b: BigInt) -> Result<BigInt> {
        self.check(&b)?;
        let a = self.make_unique(a)?;
        self.with_pair(&a, &b, |dst, src| {
            let n = dst.len.max(src.len);
            dst.resize(n + 1, false);
            let mut carry: DoubleLimb = 0;
            for i in 0..n {
                let sum = dst.limbs[i] as DoubleLimb + src.get(i) as DoubleLimb + carry;
                dst.limbs[i] = sum as Limb;
                carry = sum >> LIMB_BITS;
            }
            dst.limbs[n] = carry as Limb;
            dst.trim();
        });
        self.release(b)?;
        Ok(a)
    }

    /// `|a - b|` and whether `a < b`, consuming `b`.
    ///
    /// The sign is only reported; interpreting it is up to the caller.
    pub fn subtract(&mut self, a: BigInt, b: BigInt) -> Result<(BigInt, bool)> {
        self.check(&b)?;
        let a = self.make_unique(a)?;
        let negative = self.with_pair(&a, &b, |dst, src| {
            let n = dst.len.max(src.len);
            dst.resize(n, false);
            let mut borrow: DoubleLimb = 0;
            for i in 0..n {
                let diff = (dst.limbs[i] as DoubleLimb)
                    .wrapping_sub(src.get(i) as DoubleLimb)
                    .wrapping_sub(borrow);
                dst.limbs[i] = diff as Limb;
                borrow = (diff >> LIMB_BITS) & 1;
            }
            // a borrow out of the top leaves radix^n - |a - b|
            if borrow != 0 {
                negate(dst.digits_mut());
            }
            dst.trim();
            borrow != 0
        });
        self.release(b)?;
        Ok((a, negative))
    }

    /// Multiply by `radix^n`.
    pub fn left_shift(&mut self, v: BigInt, n: usize) -> Result<BigInt> {
        let v = self.make_unique(v)?;
        self.buf_mut(&v).left_shift(n);
        Ok(v)
    }

    /// Divide by `radix^n`, discarding the low limbs.
    pub fn right_shift(&mut self, v: BigInt, n: usize) -> Result<BigInt> {
        let v = self.make_unique(v)?;
        self.buf_mut(&v).right_shift(n);
        Ok(v)
    }

    /// `v mod radix^n`.
    pub fn truncate(&mut self, v: BigInt, n: usize) -> Result<BigInt> {
        let v = self.make_unique(v)?;
        self.buf_mut(&v).truncate(n);
        Ok(v)
    }

    /// Multiply by a single limb.
    pub fn int_multiply(&mut self, a: BigInt, m: Limb) -> Result<BigInt> {
        let a = self.make_unique(a)?;
        let buf = self.buf_mut(&a);
        let n = buf.len;
        buf.resize(n + 1, false);
        let mut carry: DoubleLimb = 0;
        for limb in &mut buf.limbs[..n] {
            let t = *limb as DoubleLimb * m as DoubleLimb + carry;
            *limb = t as Limb;
            carry = t >> LIMB_BITS;
        }
        buf.limbs[n] = carry as Limb;
        buf.trim();
        Ok(a)
    }

    /// Divide by a single limb, returning the quotient and the remainder.
    pub fn int_div_rem(&mut self, a: BigInt, d: Limb) -> Result<(BigInt, Limb)> {
        if d == 0 {
            self.release(a)?;
            return Err(Error::DivisionByZero);
        }
        let a = self.make_unique(a)?;
        let buf = self.buf_mut(&a);
        let d = d as DoubleLimb;
        let mut rem: DoubleLimb = 0;
        for limb in buf.digits_mut().iter_mut().rev() {
            let acc = (rem << LIMB_BITS) | *limb as DoubleLimb;
            *limb = (acc / d) as Limb;
            rem = acc % d;
        }
        buf.trim();
        Ok((a, rem as Limb))
    }

    /// Divide by a single limb, discarding the remainder.
    pub fn int_divide(&mut self, a: BigInt, d: Limb) -> Result<BigInt> {
        self.int_div_rem(a, d).map(|(q, _)| q)
    }

    /// Full product `a * b`, consuming both.
    pub fn multiply(&mut self, a: BigInt, b: BigInt) -> Result<BigInt> {
        self.multiply_partial(a, b, None, None)
    }

    /// `v * v`.
    pub fn square(&mut self, v: BigInt) -> Result<BigInt> {
        let w = self.copy(&v)?;
        self.multiply(v, w)
    }

    /// Schoolbook product that can skip columns the caller will throw away.
    ///
    /// `inner_limit` stops each row at that column, so only the product
    /// modulo `radix^inner_limit` is meaningful. `outer_start` begins each
    /// row at column `outer_start - 1` when that falls inside the row; the
    /// low columns (and their carries) are left out, which yields a lower
    /// bound on the top half of the product.
    pub fn multiply_partial(
        &mut self,
        a: BigInt,
        b: BigInt,
        inner_limit: Option<usize>,
        outer_start: Option<usize>,
    ) -> Result<BigInt> {
        self.check(&a)?;
        self.check(&b)?;
        let n = self.buf(&a).len;
        let t = self.buf(&b).len;
        let r = self.alloc(n + t, false)?;

        let mut out = self.take(&r);
        {
            let sa = self.buf(&a).digits();
            let sb = self.buf(&b).digits();
            let sr = &mut out.limbs;
            for i in 0..t {
                let mut carry: DoubleLimb = 0;
                let mut r_index = i;
                let mut j = 0;

                if let Some(start) = outer_start {
                    if start > i && start < n {
                        r_index = start - 1;
                        j = start - i - 1;
                    }
                }

                while j < n {
                    if matches!(inner_limit, Some(limit) if r_index >= limit) {
                        break;
                    }
                    let tmp = sr[r_index] as DoubleLimb
                        + sa[j] as DoubleLimb * sb[i] as DoubleLimb
                        + carry;
                    sr[r_index] = tmp as Limb;
                    r_index += 1;
                    carry = tmp >> LIMB_BITS;
                    j += 1;
                }
                sr[r_index] = carry as Limb;
            }
        }
        out.trim();
        self.restore(&r, out);

        self.release(a)?;
        self.release(b)?;
        Ok(r)
    }
}
