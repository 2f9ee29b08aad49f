use std::cmp::Ordering;

use log::{debug, trace};

use crate::bigint::context::{BigInt, BigIntCtx};
use crate::bigint::limbs::{DoubleLimb, Limb, PERMANENT, RADIX};
use crate::error::{Error, Result};

/// Which cached modulus a reduction runs against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModSlot {
    /// The full modulus.
    Modulus,
    /// First CRT prime.
    P,
    /// Second CRT prime.
    Q,
}

impl ModSlot {
    pub const ALL: [ModSlot; 3] = [ModSlot::Modulus, ModSlot::P, ModSlot::Q];

    pub(crate) fn index(self) -> usize {
        match self {
            ModSlot::Modulus => 0,
            ModSlot::P => 1,
            ModSlot::Q => 2,
        }
    }
}

/// Permanent constants derived from one modulus of `k` limbs.
#[derive(Debug)]
pub(crate) struct ModulusCache {
    pub(crate) modulus: BigInt,
    /// The modulus scaled so its top limb is at least `radix / 2`.
    pub(crate) normalized: BigInt,
    /// `floor(radix^(2k) / modulus)`.
    pub(crate) mu: BigInt,
    /// `radix^(k+1)`.
    pub(crate) radix_k1: BigInt,
    pub(crate) k: usize,
}

impl BigIntCtx {
    /// Handle to a permanent value. Permanent values carry no per-handle
    /// reference, so such handles need no bookkeeping.
    pub(crate) fn permanent_handle(&self, v: &BigInt) -> BigInt {
        debug_assert_eq!(self.buf(v).refs, PERMANENT);
        BigInt {
            index: v.index,
            ctx: v.ctx,
        }
    }

    /// The normalized divisor cached for `v`, if `v` is the selected modulus.
    pub(crate) fn cached_normalized(&self, v: &BigInt) -> Option<BigInt> {
        match &self.moduli[self.current.index()] {
            Some(cache) if cache.modulus.index == v.index && cache.modulus.ctx == v.ctx => {
                Some(self.permanent_handle(&cache.normalized))
            }
            _ => None,
        }
    }

    /// Prime the Barrett constants for `modulus` in `slot`, consuming it.
    ///
    /// A slot that is already set is reset first. The selection is left
    /// as it is; see [`select_modulo`](Self::select_modulo).
    pub fn set_modulo(&mut self, modulus: BigInt, slot: ModSlot) -> Result<()> {
        self.check(&modulus)?;
        if self.buf(&modulus).is_zero() {
            self.release(modulus)?;
            return Err(Error::DivisionByZero);
        }
        if self.moduli[slot.index()].is_some() {
            self.reset_modulo(slot)?;
        }

        let modulus = self.make_unique(modulus)?;
        let modulus = self.trim(modulus)?;
        self.set_permanent(&modulus)?;
        let k = self.buf(&modulus).len;

        let top = self.buf(&modulus).digits()[k - 1] as DoubleLimb;
        let d = (RADIX / (top + 1)) as Limb;
        let normalized = self.duplicate(&modulus)?;
        let normalized = self.int_multiply(normalized, d)?;
        self.set_permanent(&normalized)?;

        let radix = self.permanent_handle(&self.radix);
        let wide = self.left_shift(radix, 2 * k - 1)?;
        let divisor = self.permanent_handle(&modulus);
        let mu = self.divide(wide, divisor, false)?;
        self.set_permanent(&mu)?;

        let radix = self.permanent_handle(&self.radix);
        let radix_k1 = self.left_shift(radix, k)?;
        self.set_permanent(&radix_k1)?;

        debug!(
            "modulus {:?} set: {} limbs, {} bits, normalization factor {}",
            slot,
            k,
            self.buf(&modulus).bit_count(),
            d
        );
        self.moduli[slot.index()] = Some(ModulusCache {
            modulus,
            normalized,
            mu,
            radix_k1,
            k,
        });
        Ok(())
    }

    /// Release the constants cached for `slot`.
    pub fn reset_modulo(&mut self, slot: ModSlot) -> Result<()> {
        let cache = self.moduli[slot.index()]
            .take()
            .ok_or(Error::NoModulus(slot))?;
        for v in [cache.modulus, cache.normalized, cache.mu, cache.radix_k1] {
            self.reset_permanent_and_release(v)?;
        }
        debug!("modulus {:?} reset", slot);
        Ok(())
    }

    /// Pick the slot later reductions use.
    pub fn select_modulo(&mut self, slot: ModSlot) {
        self.current = slot;
    }

    pub fn current_modulo(&self) -> ModSlot {
        self.current
    }

    /// Handle to the modulus cached in `slot`.
    ///
    /// The handle refers to a permanent value; releasing it is a no-op and
    /// it must not outlive [`reset_modulo`](Self::reset_modulo).
    pub fn modulus(&self, slot: ModSlot) -> Result<BigInt> {
        self.moduli[slot.index()]
            .as_ref()
            .map(|cache| self.permanent_handle(&cache.modulus))
            .ok_or(Error::NoModulus(slot))
    }

    /// Limb length of the modulus cached in `slot`.
    pub fn modulus_len(&self, slot: ModSlot) -> Result<usize> {
        self.moduli[slot.index()]
            .as_ref()
            .map(|cache| cache.k)
            .ok_or(Error::NoModulus(slot))
    }

    /// Run `f` with `slots` temporarily empty.
    ///
    /// Moduli already primed in those slots are set aside untouched and put
    /// back afterwards, together with the selection. Whatever `f` leaves in
    /// the slots is reset, on the error path too.
    pub fn with_moduli<R>(
        &mut self,
        slots: &[ModSlot],
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let previous = self.current;
        let stashed: Vec<(ModSlot, Option<ModulusCache>)> = slots
            .iter()
            .map(|&slot| (slot, self.moduli[slot.index()].take()))
            .collect();

        let out = f(self);

        let mut cleanup = Ok(());
        // reverse order so a slot listed twice gets its original back
        for (slot, cache) in stashed.into_iter().rev() {
            if self.moduli[slot.index()].is_some() {
                let reset = self.reset_modulo(slot);
                if cleanup.is_ok() {
                    cleanup = reset;
                }
            }
            self.moduli[slot.index()] = cache;
        }
        self.current = previous;

        let value = out?;
        cleanup.map(|_| value)
    }

    /// `x mod m` for the selected modulus `m`, consuming `x`.
    ///
    /// Operands longer than `2k` limbs fall back to exact division.
    pub fn barrett(&mut self, x: BigInt) -> Result<BigInt> {
        self.check(&x)?;
        let slot = self.current;
        let cached = self.moduli[slot.index()].as_ref().map(|cache| {
            (
                cache.k,
                self.permanent_handle(&cache.modulus),
                self.permanent_handle(&cache.mu),
                self.permanent_handle(&cache.radix_k1),
            )
        });
        let Some((k, m, mu, radix_k1)) = cached else {
            self.release(x)?;
            return Err(Error::NoModulus(slot));
        };

        let len = self.buf(&x).significant_len();
        if len > 2 * k {
            trace!("{} limb operand exceeds 2k = {}, dividing exactly", len, 2 * k);
            return self.divide(x, m, true);
        }

        // q1 = floor(x / radix^(k-1)), q3 = floor(q1 * mu / radix^(k+1))
        let x_copy = self.copy(&x)?;
        let q1 = self.right_shift(x_copy, k - 1)?;
        let q2 = self.multiply_partial(q1, mu, None, Some(k - 1))?;
        let q3 = self.right_shift(q2, k + 1)?;

        // r = (x - q3 * m) mod radix^(k+1)
        let r1 = self.truncate(x, k + 1)?;
        let m_copy = self.permanent_handle(&m);
        let r2 = self.multiply_partial(q3, m_copy, Some(k + 1), None)?;
        let r2 = self.truncate(r2, k + 1)?;
        let r1 = if self.buf(&r1).compare(self.buf(&r2)) == Ordering::Less {
            self.add(r1, radix_k1)?
        } else {
            r1
        };
        let (mut r, _) = self.subtract(r1, r2)?;

        while self.buf(&r).compare(self.buf(&m)) != Ordering::Less {
            let m_copy = self.permanent_handle(&m);
            r = self.subtract(r, m_copy)?.0;
        }
        Ok(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_limb_modulus() {
        let mut ctx = BigIntCtx::new();
        let m = ctx.allocate_from(0xffff_fffb).unwrap();
        ctx.set_modulo(m, ModSlot::Modulus).unwrap();
        let b = ctx.from_hex("0100000000").unwrap();
        let r = ctx.barrett(b).unwrap();
        assert_eq!(ctx.limbs(&r).unwrap(), &[5]);
        ctx.release(r).unwrap();
        ctx.finish().unwrap();
    }

    #[test]
    fn constants_are_permanent_until_reset() {
        let mut ctx = BigIntCtx::new();
        let base = ctx.stats().permanent;
        let m = ctx.from_hex("c3f1a2b4d5e6f7081920a1b2").unwrap();
        ctx.set_modulo(m, ModSlot::P).unwrap();
        assert_eq!(ctx.stats().permanent, base + 4);
        assert_eq!(ctx.modulus_len(ModSlot::P).unwrap(), 3);

        let mu = ctx.moduli[ModSlot::P.index()].as_ref().map(|c| ctx.to_hex(&c.mu).unwrap());
        // floor(2^192 / m)
        assert_eq!(mu.as_deref(), Some("000000014e768d8bc4f5c720f10c2dff"));

        ctx.reset_modulo(ModSlot::P).unwrap();
        assert_eq!(ctx.stats().permanent, base);
        assert!(matches!(ctx.reset_modulo(ModSlot::P), Err(Error::NoModulus(ModSlot::P))));
        ctx.finish().unwrap();
    }

    #[test]
    fn barrett_without_modulus_fails() {
        let mut ctx = BigIntCtx::new();
        let x = ctx.allocate_from(3).unwrap();
        assert!(matches!(ctx.barrett(x), Err(Error::NoModulus(ModSlot::Modulus))));
        ctx.finish().unwrap();
    }

    #[test]
    fn zero_modulus_is_rejected() {
        let mut ctx = BigIntCtx::new();
        let z = ctx.allocate(2).unwrap();
        assert!(matches!(ctx.set_modulo(z, ModSlot::Modulus), Err(Error::DivisionByZero)));
        ctx.finish().unwrap();
    }

    #[test]
    fn matches_exact_division() {
        let mut ctx = BigIntCtx::new();
        let modulus = "ca2468d07c941c8cf7d3b75cb67cff07c7ccb043cb8a5b3dc4d84f98120424ae\
                       8230cfb38c86c2add733373a44f41805c802acbe485b57f2e4177c7ef1c91ba3";
        let m = ctx.from_hex(modulus).unwrap();
        ctx.set_modulo(m, ModSlot::Modulus).unwrap();

        let samples = [
            "01",
            "ca2468d07c941c8cf7d3b75cb67cff07c7ccb043cb8a5b3dc4d84f98120424ae\
             8230cfb38c86c2add733373a44f41805c802acbe485b57f2e4177c7ef1c91ba3",
            "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff\
             ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff\
             ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff\
             ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
            "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef\
             0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef\
             fedcba9876543210fedcba9876543210",
        ];
        for s in samples {
            let x = ctx.from_hex(s).unwrap();
            let y = ctx.from_hex(s).unwrap();
            let fast = ctx.barrett(x).unwrap();
            let m = ctx.modulus(ModSlot::Modulus).unwrap();
            let exact = ctx.divide(y, m, true).unwrap();
            assert_eq!(ctx.to_hex(&fast).unwrap(), ctx.to_hex(&exact).unwrap(), "{}", s);
            ctx.release(fast).unwrap();
            ctx.release(exact).unwrap();
        }
        ctx.finish().unwrap();
    }

    #[test]
    fn oversized_operand_falls_back() {
        let mut ctx = BigIntCtx::new();
        let m = ctx.from_hex("fffffffb").unwrap();
        ctx.set_modulo(m, ModSlot::Modulus).unwrap();
        // five limbs > 2k
        let x = ctx.from_hex("0100000000000000000000000000000000").unwrap();
        let r = ctx.barrett(x).unwrap();
        // 2^128 mod (2^32 - 5) = 5^4
        assert_eq!(ctx.limbs(&r).unwrap(), &[625]);
        ctx.release(r).unwrap();
        ctx.finish().unwrap();
    }

    #[test]
    fn slots_are_independent() {
        let mut ctx = BigIntCtx::new();
        let p = ctx.allocate_from(61).unwrap();
        let q = ctx.allocate_from(53).unwrap();
        ctx.set_modulo(p, ModSlot::P).unwrap();
        ctx.set_modulo(q, ModSlot::Q).unwrap();

        ctx.select_modulo(ModSlot::P);
        let x = ctx.allocate_from(1000).unwrap();
        let r = ctx.barrett(x).unwrap();
        assert_eq!(ctx.limbs(&r).unwrap(), &[1000 % 61]);
        ctx.release(r).unwrap();

        ctx.select_modulo(ModSlot::Q);
        assert_eq!(ctx.current_modulo(), ModSlot::Q);
        let x = ctx.allocate_from(1000).unwrap();
        let r = ctx.barrett(x).unwrap();
        assert_eq!(ctx.limbs(&r).unwrap(), &[1000 % 53]);
        ctx.release(r).unwrap();
        ctx.finish().unwrap();
    }
}
