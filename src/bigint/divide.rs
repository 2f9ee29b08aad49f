use std::cmp::Ordering;

use log::trace;

use crate::bigint::context::{BigInt, BigIntCtx};
use crate::bigint::limbs::{DoubleLimb, Limb, LIMB_BITS, LIMB_MASK, RADIX};
use crate::error::{Error, Result};

/// Multiply a limb run by `d` in place, returning the carry out of the top.
fn scale(limbs: &mut [Limb], d: Limb) -> Limb {
    let mut carry: DoubleLimb = 0;
    for limb in limbs {
        let t = *limb as DoubleLimb * d as DoubleLimb + carry;
        *limb = t as Limb;
        carry = t >> LIMB_BITS;
    }
    carry as Limb
}

/// Core of Algorithm D on normalized operands.
///
/// `un` holds `m + n + 1` limbs of the scaled dividend, `vn` the `n >= 2`
/// limbs of the scaled divisor (top bit set), `q` receives `m + 1` digits.
/// On return the low `n` limbs of `un` hold the scaled remainder.
fn knuth_divide(un: &mut [Limb], vn: &[Limb], q: &mut [Limb]) {
    let n = vn.len();
    let m = un.len() - n - 1;
    let v1 = vn[n - 1] as DoubleLimb;
    let v2 = vn[n - 2] as DoubleLimb;

    for j in (0..=m).rev() {
        // 1) estimate the digit from the top of the current slice
        let u0 = un[j + n] as DoubleLimb;
        let u1 = un[j + n - 1] as DoubleLimb;
        let u2 = un[j + n - 2] as DoubleLimb;
        let num = (u0 << LIMB_BITS) | u1;

        let (mut qhat, mut rhat) = if u0 == v1 {
            (RADIX - 1, num - (RADIX - 1) * v1)
        } else {
            (num / v1, num % v1)
        };

        // 2) second-limb check, at most two corrections
        while rhat < RADIX && qhat * v2 > ((rhat << LIMB_BITS) | u2) {
            qhat -= 1;
            rhat += v1;
        }

        // 3) multiply and subtract
        let mut carry: DoubleLimb = 0;
        let mut borrow: DoubleLimb = 0;
        for i in 0..n {
            let p = qhat * vn[i] as DoubleLimb + carry;
            carry = p >> LIMB_BITS;
            let t = (un[i + j] as DoubleLimb)
                .wrapping_sub(p & LIMB_MASK)
                .wrapping_sub(borrow);
            un[i + j] = t as Limb;
            borrow = (t >> LIMB_BITS) & 1;
        }
        let t = (un[j + n] as DoubleLimb)
            .wrapping_sub(carry)
            .wrapping_sub(borrow);
        un[j + n] = t as Limb;

        // 4) the estimate was one too high: add the divisor back
        if (t >> LIMB_BITS) & 1 == 1 {
            qhat -= 1;
            let mut carry: DoubleLimb = 0;
            for i in 0..n {
                let s = un[i + j] as DoubleLimb + vn[i] as DoubleLimb + carry;
                un[i + j] = s as Limb;
                carry = s >> LIMB_BITS;
            }
            un[j + n] = un[j + n].wrapping_add(carry as Limb);
        }

        q[j] = qhat as Limb;
    }
}

impl BigIntCtx {
    /// `u / v`, or `u mod v` when `want_mod` is set. Consumes both.
    ///
    /// When `v` is the modulus of the selected slot the cached normalized
    /// divisor is used instead of scaling `v` again.
    pub fn divide(&mut self, u: BigInt, v: BigInt, want_mod: bool) -> Result<BigInt> {
        self.check(&u)?;
        self.check(&v)?;
        if self.buf(&v).is_zero() {
            self.release(u)?;
            self.release(v)?;
            return Err(Error::DivisionByZero);
        }

        let u = self.trim(u)?;
        let v = self.trim(v)?;
        if self.buf(&u).compare(self.buf(&v)) == Ordering::Less {
            self.release(v)?;
            if want_mod {
                return Ok(u);
            }
            self.release(u)?;
            return self.allocate(1);
        }

        let n = self.buf(&v).len;
        if n == 1 {
            let d = self.buf(&v).digits()[0];
            self.release(v)?;
            let (q, rem) = self.int_div_rem(u, d)?;
            if want_mod {
                self.release(q)?;
                return self.allocate_from(rem);
            }
            return Ok(q);
        }

        let m = self.buf(&u).len - n;
        let top = self.buf(&v).digits()[n - 1] as DoubleLimb;
        let d = (RADIX / (top + 1)) as Limb;

        let vn = match self.cached_normalized(&v) {
            Some(vn) => {
                trace!("dividing by cached normalized modulus ({} limbs)", n);
                self.release(v)?;
                vn
            }
            None => self.int_multiply(v, d)?,
        };

        // scaled dividend gets one extra top limb
        let u = self.make_unique(u)?;
        {
            let buf = self.buf_mut(&u);
            let len = buf.len;
            buf.resize(len + 1, false);
            let carry = scale(&mut buf.limbs[..len], d);
            buf.limbs[len] = carry;
        }

        let q = self.allocate(m + 1)?;
        let mut un = self.take(&u);
        let mut qb = self.take(&q);
        knuth_divide(&mut un.limbs[..m + n + 1], self.buf(&vn).digits(), &mut qb.limbs[..m + 1]);
        self.restore(&u, un);
        self.restore(&q, qb);
        self.release(vn)?;

        if want_mod {
            self.release(q)?;
            let buf = self.buf_mut(&u);
            buf.len = n;
            buf.trim();
            self.int_divide(u, d)
        } else {
            self.release(u)?;
            self.buf_mut(&q).trim();
            Ok(q)
        }
    }
}
