//! Modular exponentiation on top of Barrett reduction.

use log::trace;

use crate::bigint::barrett::ModSlot;
use crate::bigint::context::{BigInt, BigIntCtx};
use crate::error::Result;

/// Private-exponent pieces for CRT exponentiation. The primes themselves
/// live in the context's [`ModSlot::P`] and [`ModSlot::Q`] slots.
#[derive(Debug)]
pub struct CrtKey {
    /// `d mod (p - 1)`
    pub dp: BigInt,
    /// `d mod (q - 1)`
    pub dq: BigInt,
    /// `q^-1 mod p`
    pub qinv: BigInt,
}

impl CrtKey {
    /// Import the three big-endian components. Nothing stays allocated on failure.
    pub fn load(ctx: &mut BigIntCtx, dp: &[u8], dq: &[u8], qinv: &[u8]) -> Result<Self> {
        let dp = ctx.load(dp)?;
        let dq = match ctx.load(dq) {
            Ok(dq) => dq,
            Err(e) => {
                ctx.release(dp)?;
                return Err(e);
            }
        };
        let qinv = match ctx.load(qinv) {
            Ok(qinv) => qinv,
            Err(e) => {
                ctx.release(dp)?;
                ctx.release(dq)?;
                return Err(e);
            }
        };
        Ok(CrtKey { dp, dq, qinv })
    }

    pub fn release(self, ctx: &mut BigIntCtx) -> Result<()> {
        ctx.release(self.dp)?;
        ctx.release(self.dq)?;
        ctx.release(self.qinv)
    }
}

/// Sliding window width for an exponent of `bits` bits.
fn window_size(bits: usize, max_window: usize) -> usize {
    let mut window = 1;
    let mut j = bits;
    while j > 32 {
        window += 1;
        j /= 5;
    }
    window.clamp(1, max_window.max(1))
}

impl BigIntCtx {
    /// `base^exp mod m` for the selected modulus, consuming `base`.
    pub fn mod_power(&mut self, base: BigInt, exp: &BigInt) -> Result<BigInt> {
        self.check(exp)?;
        let bits = self.buf(exp).bit_count();
        let window = window_size(bits, self.config.max_window);
        trace!("mod_power: {} bit exponent, window {}", bits, window);

        let mut table = Vec::with_capacity(1 << (window - 1));
        let r = self.sliding_window(base, exp, window, &mut table);
        // the odd powers go back to the pool on every path
        for g in table {
            self.release(g)?;
        }
        r
    }

    /// Fill `table[i] = base^(2i + 1)` for `i < 2^(window - 1)`.
    fn odd_powers(&mut self, base: BigInt, window: usize, table: &mut Vec<BigInt>) -> Result<()> {
        let base = self.barrett(base)?;
        table.push(base);
        if window == 1 {
            return Ok(());
        }

        let first = self.copy(&table[0])?;
        let sq = self.square(first)?;
        let sq = self.barrett(sq)?;
        let filled = (1..(1 << (window - 1))).try_for_each(|i| -> Result<()> {
            let prev = self.copy(&table[i - 1])?;
            let step = self.copy(&sq)?;
            let next = self.multiply(prev, step)?;
            table.push(self.barrett(next)?);
            Ok(())
        });
        self.release(sq)?;
        filled
    }

    fn sliding_window(
        &mut self,
        base: BigInt,
        exp: &BigInt,
        window: usize,
        table: &mut Vec<BigInt>,
    ) -> Result<BigInt> {
        self.odd_powers(base, window, table)?;

        let one = self.allocate_from(1)?;
        let mut r = self.barrett(one)?;
        let mut i = self.buf(exp).bit_count() as isize - 1;
        while i >= 0 {
            if !self.buf(exp).bit_is_set(i as usize) {
                let sq = self.square(r)?;
                r = self.barrett(sq)?;
                i -= 1;
                continue;
            }

            // longest window ending in a set bit
            let mut low = (i - window as isize + 1).max(0);
            while !self.buf(exp).bit_is_set(low as usize) {
                low += 1;
            }
            let mut digit = 0usize;
            for b in (low..=i).rev() {
                digit = (digit << 1) | self.buf(exp).bit_is_set(b as usize) as usize;
                let sq = self.square(r)?;
                r = self.barrett(sq)?;
            }
            let g = self.copy(&table[(digit - 1) / 2])?;
            let prod = self.multiply(r, g)?;
            r = self.barrett(prod)?;
            i = low - 1;
        }
        Ok(r)
    }

    /// `x^d mod pq` through the CRT, consuming `x`.
    ///
    /// Requires the primes in slots `P` and `Q`. The selected slot is
    /// restored afterwards.
    pub fn crt(&mut self, x: BigInt, key: &CrtKey) -> Result<BigInt> {
        let previous = self.current_modulo();
        let p = self.modulus(ModSlot::P)?;
        let q = self.modulus(ModSlot::Q)?;

        self.select_modulo(ModSlot::Q);
        let xq = self.copy(&x)?;
        let m2 = self.mod_power(xq, &key.dq)?;

        self.select_modulo(ModSlot::P);
        let m1 = self.mod_power(x, &key.dp)?;

        // h = qinv * (m1 - m2) mod p
        let m2_copy = self.copy(&m2)?;
        let (diff, negative) = self.subtract(m1, m2_copy)?;
        let mut diff = self.barrett(diff)?;
        if negative && !self.is_zero(&diff) {
            let p_copy = self.permanent_handle(&p);
            diff = self.subtract(p_copy, diff)?.0;
        }
        let qinv = self.copy(&key.qinv)?;
        let h = self.multiply(qinv, diff)?;
        let h = self.barrett(h)?;

        // m2 + q * h
        let qh = self.multiply(q, h)?;
        let result = self.add(m2, qh)?;

        self.select_modulo(previous);
        Ok(result)
    }
}
