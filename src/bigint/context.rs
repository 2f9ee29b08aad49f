use std::cmp::Ordering;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

use log::{debug, trace, warn};

use crate::bigint::barrett::{ModSlot, ModulusCache};
use crate::bigint::limbs::{Limb, LimbBuffer, LIMB_BYTES, PERMANENT};
use crate::config::CtxConfig;
use crate::error::{Error, Result};

static NEXT_CTX_ID: AtomicU32 = AtomicU32::new(1);

/// Handle to a value stored in a [`BigIntCtx`].
///
/// Handles are move-only. Passing one by value hands ownership to the
/// callee; use [`BigIntCtx::copy`] or [`BigIntCtx::duplicate`] to keep a
/// value alive across a consuming call.
#[derive(Debug)]
#[must_use = "values must be released back to their context"]
pub struct BigInt {
    pub(crate) index: usize,
    pub(crate) ctx: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Values currently owned by someone, permanent ones included.
    pub active: usize,
    /// Shells parked on the free list.
    pub free: usize,
    /// Values exempt from pooling.
    pub permanent: usize,
}

/// Owner of every value, the free list and the per-modulus constants.
///
/// A context is single-threaded: give each independent computation its
/// own instance.
pub struct BigIntCtx {
    id: u32,
    pub(crate) config: CtxConfig,
    pub(crate) slots: Vec<LimbBuffer>,
    free: Vec<usize>,
    active: usize,
    permanent: usize,
    /// `radix^1`, a permanent two-limb value.
    pub(crate) radix: BigInt,
    pub(crate) moduli: [Option<ModulusCache>; 3],
    pub(crate) current: ModSlot,
}

impl BigIntCtx {
    pub fn new() -> Self {
        Self::with_config(CtxConfig::default())
    }

    pub fn with_config(config: CtxConfig) -> Self {
        let id = NEXT_CTX_ID.fetch_add(1, AtomicOrdering::Relaxed);

        let mut radix = LimbBuffer::with_capacity(2);
        radix.resize(2, false);
        radix.limbs[1] = 1;
        radix.refs = PERMANENT;

        let mut slots = vec![radix];
        let mut free = Vec::with_capacity(config.prealloc_shells);
        for _ in 0..config.prealloc_shells {
            free.push(slots.len());
            slots.push(LimbBuffer::with_capacity(config.prealloc_limbs));
        }

        debug!(
            "bigint context {} created ({} preallocated shells of {} limbs)",
            id, config.prealloc_shells, config.prealloc_limbs
        );

        BigIntCtx {
            id,
            config,
            slots,
            free,
            active: 1,
            permanent: 1,
            radix: BigInt { index: 0, ctx: id },
            moduli: [None, None, None],
            current: ModSlot::Modulus,
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.active,
            free: self.free.len(),
            permanent: self.permanent,
        }
    }

    /// Ensure `v` is a live value of this context.
    pub(crate) fn check(&self, v: &BigInt) -> Result<()> {
        if v.ctx != self.id {
            return Err(Error::ForeignValue {
                expected: self.id,
                found: v.ctx,
            });
        }
        let refs = self.slots.get(v.index).map_or(0, |b| b.refs);
        if refs == 0 {
            return Err(Error::PoolCorruption { index: v.index, refs });
        }
        Ok(())
    }

    /// Storage of a value already accepted by [`check`](Self::check).
    pub(crate) fn buf(&self, v: &BigInt) -> &LimbBuffer {
        debug_assert_eq!(v.ctx, self.id);
        &self.slots[v.index]
    }

    pub(crate) fn buf_mut(&mut self, v: &BigInt) -> &mut LimbBuffer {
        debug_assert_eq!(v.ctx, self.id);
        &mut self.slots[v.index]
    }

    /// Move the storage of `v` out so it can be written while other slots are read.
    pub(crate) fn take(&mut self, v: &BigInt) -> LimbBuffer {
        mem::take(&mut self.slots[v.index])
    }

    pub(crate) fn restore(&mut self, v: &BigInt, buf: LimbBuffer) {
        self.slots[v.index] = buf;
    }

    /// Run `f` with `dst` writable and `src` readable. The two must not alias.
    pub(crate) fn with_pair<R>(
        &mut self,
        dst: &BigInt,
        src: &BigInt,
        f: impl FnOnce(&mut LimbBuffer, &LimbBuffer) -> R,
    ) -> R {
        debug_assert_ne!(dst.index, src.index);
        let mut out = self.take(dst);
        let r = f(&mut out, &self.slots[src.index]);
        self.restore(dst, out);
        r
    }

    pub(crate) fn alloc(&mut self, n: usize, skip_zero_fill: bool) -> Result<BigInt> {
        let n = n.max(1);
        let index = match self.free.pop() {
            Some(index) => {
                let shell = &mut self.slots[index];
                if shell.refs != 0 {
                    return Err(Error::PoolCorruption {
                        index,
                        refs: shell.refs,
                    });
                }
                trace!("reusing shell {} (capacity {}) for {} limbs", index, shell.capacity(), n);
                shell.len = 0;
                shell.resize(n, skip_zero_fill);
                index
            }
            None => {
                let mut shell = LimbBuffer::with_capacity(n * self.config.capacity_factor.max(1));
                // fresh storage is already zeroed
                shell.resize(n, true);
                self.slots.push(shell);
                self.slots.len() - 1
            }
        };
        self.slots[index].refs = 1;
        self.active += 1;
        Ok(BigInt { index, ctx: self.id })
    }

    /// A zeroed value of `n` limbs.
    pub fn allocate(&mut self, n: usize) -> Result<BigInt> {
        self.alloc(n, false)
    }

    /// A single-limb value.
    pub fn allocate_from(&mut self, limb: Limb) -> Result<BigInt> {
        let v = self.alloc(1, true)?;
        self.buf_mut(&v).limbs[0] = limb;
        Ok(v)
    }

    /// Drop one reference; the shell returns to the free list at zero.
    /// Permanent values are left alone.
    pub fn release(&mut self, v: BigInt) -> Result<()> {
        self.check(&v)?;
        let shell = &mut self.slots[v.index];
        if shell.refs == PERMANENT {
            return Ok(());
        }
        shell.refs -= 1;
        if shell.refs == 0 {
            self.free.push(v.index);
            self.active -= 1;
        }
        Ok(())
    }

    /// Share the buffer of `v` under a second handle.
    pub fn copy(&mut self, v: &BigInt) -> Result<BigInt> {
        self.check(v)?;
        let shell = &mut self.slots[v.index];
        if shell.refs != PERMANENT {
            shell.refs += 1;
        }
        Ok(BigInt {
            index: v.index,
            ctx: v.ctx,
        })
    }

    /// Deep copy of `v` into fresh storage.
    pub fn duplicate(&mut self, v: &BigInt) -> Result<BigInt> {
        self.check(v)?;
        let n = self.buf(v).len;
        let r = self.alloc(n, true)?;
        self.with_pair(&r, v, |dst, src| dst.copy_from(src));
        Ok(r)
    }

    /// Guarantee exclusive ownership of `v` before it is mutated.
    ///
    /// Shared and permanent buffers are detached into a private duplicate.
    pub(crate) fn make_unique(&mut self, v: BigInt) -> Result<BigInt> {
        self.check(&v)?;
        if self.slots[v.index].refs == 1 {
            return Ok(v);
        }
        let dup = self.duplicate(&v)?;
        self.release(v)?;
        Ok(dup)
    }

    /// Exempt `v` from pooling. `v` must have exactly one owner.
    ///
    /// Handles copied from a permanent value do not hold a reference of
    /// their own and become invalid once it is reset.
    pub fn set_permanent(&mut self, v: &BigInt) -> Result<()> {
        self.check(v)?;
        let shell = &mut self.slots[v.index];
        if shell.refs != 1 {
            return Err(Error::AlreadyShared { refs: shell.refs });
        }
        shell.refs = PERMANENT;
        self.permanent += 1;
        Ok(())
    }

    /// Return a permanent value to ordinary reference counting with one owner.
    pub fn reset_permanent(&mut self, v: &BigInt) -> Result<()> {
        self.check(v)?;
        let shell = &mut self.slots[v.index];
        if shell.refs != PERMANENT {
            return Err(Error::NotPermanent { refs: shell.refs });
        }
        shell.refs = 1;
        self.permanent -= 1;
        Ok(())
    }

    pub fn reset_permanent_and_release(&mut self, v: BigInt) -> Result<()> {
        self.reset_permanent(&v)?;
        self.release(v)
    }

    /// Checked read access for the public accessors.
    fn read(&self, v: &BigInt) -> Result<&LimbBuffer> {
        self.check(v)?;
        Ok(&self.slots[v.index])
    }

    pub fn is_permanent(&self, v: &BigInt) -> Result<bool> {
        Ok(self.read(v)?.refs == PERMANENT)
    }

    /// True when every limb is zero. Handles this context does not know
    /// read as zero.
    pub fn is_zero(&self, v: &BigInt) -> bool {
        if v.ctx != self.id {
            return true;
        }
        self.slots.get(v.index).map_or(true, |b| b.is_zero())
    }

    pub fn bit_is_set(&self, v: &BigInt, bit: usize) -> Result<bool> {
        Ok(self.read(v)?.bit_is_set(bit))
    }

    pub fn bit_count(&self, v: &BigInt) -> Result<usize> {
        Ok(self.read(v)?.bit_count())
    }

    /// Compare two trimmed values.
    pub fn compare(&self, a: &BigInt, b: &BigInt) -> Result<Ordering> {
        Ok(self.read(a)?.compare(self.read(b)?))
    }

    /// Number of limbs in use.
    pub fn len(&self, v: &BigInt) -> Result<usize> {
        Ok(self.read(v)?.len)
    }

    /// The limbs in use, least significant first.
    pub fn limbs(&self, v: &BigInt) -> Result<&[Limb]> {
        Ok(self.read(v)?.digits())
    }

    /// Drop leading zero limbs of `v`.
    pub fn trim(&mut self, v: BigInt) -> Result<BigInt> {
        self.check(&v)?;
        let buf = self.buf(&v);
        if buf.significant_len() == buf.len {
            return Ok(v);
        }
        let v = self.make_unique(v)?;
        self.buf_mut(&v).trim();
        Ok(v)
    }

    /// Import big-endian bytes. An empty slice loads as zero.
    pub fn load(&mut self, bytes: &[u8]) -> Result<BigInt> {
        let n = (bytes.len() + LIMB_BYTES - 1) / LIMB_BYTES;
        let v = self.alloc(n, false)?;
        let buf = self.buf_mut(&v);
        for (i, &byte) in bytes.iter().rev().enumerate() {
            buf.limbs[i / LIMB_BYTES] |= (byte as Limb) << (8 * (i % LIMB_BYTES));
        }
        buf.trim();
        Ok(v)
    }

    /// Write `v` big-endian into `out`, zero-padded on the left.
    pub fn save(&self, v: &BigInt, out: &mut [u8]) -> Result<()> {
        self.check(v)?;
        let buf = self.buf(v);
        let needed = (buf.bit_count() + 7) / 8;
        if needed > out.len() {
            return Err(Error::BufferTooSmall {
                needed,
                available: out.len(),
            });
        }
        out.fill(0);
        let width = out.len();
        for i in 0..needed {
            out[width - 1 - i] = (buf.limbs[i / LIMB_BYTES] >> (8 * (i % LIMB_BYTES))) as u8;
        }
        Ok(())
    }

    /// Save `v` into a fresh `len`-byte buffer and release it.
    pub fn export(&mut self, v: BigInt, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        let saved = self.save(&v, &mut out);
        self.release(v)?;
        saved.map(|_| out)
    }

    /// Hex dump of the limbs in use, most significant byte first.
    pub fn to_hex(&self, v: &BigInt) -> Result<String> {
        let bytes: Vec<u8> = self
            .read(v)?
            .digits()
            .iter()
            .rev()
            .flat_map(|limb| limb.to_be_bytes())
            .collect();
        Ok(hex::encode(bytes))
    }

    /// Import a big-endian hex string; an odd digit count is padded with a leading zero.
    pub fn from_hex(&mut self, s: &str) -> Result<BigInt> {
        let s = s.trim();
        let bytes = if s.len() % 2 == 1 {
            hex::decode(format!("0{}", s))?
        } else {
            hex::decode(s)?
        };
        self.load(&bytes)
    }

    fn leaked(&self) -> usize {
        self.active - self.permanent
    }

    /// Tear down the context, reporting values that were never released.
    pub fn finish(mut self) -> Result<PoolStats> {
        for slot in ModSlot::ALL {
            if self.moduli[slot.index()].is_some() {
                self.reset_modulo(slot)?;
            }
        }
        match self.leaked() {
            0 => Ok(self.stats()),
            active => Err(Error::Leaked { active }),
        }
    }
}

impl Default for BigIntCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BigIntCtx {
    fn drop(&mut self) {
        let leaked = self.leaked();
        if leaked > 0 {
            warn!("bigint context {} dropped with {} live values", self.id, leaked);
        } else {
            debug!(
                "bigint context {} dropped ({} shells, {} free)",
                self.id,
                self.slots.len(),
                self.free.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_save_roundtrip() {
        let mut ctx = BigIntCtx::new();
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05];
        let v = ctx.load(&bytes).unwrap();
        assert_eq!(ctx.limbs(&v).unwrap(), &[0x02030405, 0x01]);
        let mut out = [0xffu8; 8];
        ctx.save(&v, &mut out).unwrap();
        assert_eq!(out, [0, 0, 0, 0x01, 0x02, 0x03, 0x04, 0x05]);
        ctx.release(v).unwrap();
    }

    #[test]
    fn load_empty_and_leading_zeros() {
        let mut ctx = BigIntCtx::new();
        let z = ctx.load(&[]).unwrap();
        assert!(ctx.is_zero(&z));
        assert_eq!(ctx.len(&z).unwrap(), 1);
        let v = ctx.load(&[0, 0, 0, 0, 0, 0, 0, 7]).unwrap();
        assert_eq!(ctx.limbs(&v).unwrap(), &[7]);
        ctx.release(z).unwrap();
        ctx.release(v).unwrap();
    }

    #[test]
    fn save_rejects_short_buffer() {
        let mut ctx = BigIntCtx::new();
        let v = ctx.load(&[1, 0, 0]).unwrap();
        let mut out = [0u8; 2];
        assert!(matches!(
            ctx.save(&v, &mut out),
            Err(Error::BufferTooSmall { needed: 3, available: 2 })
        ));
        ctx.release(v).unwrap();
    }

    #[test]
    fn released_shells_are_reused() {
        let mut ctx = BigIntCtx::new();
        let a = ctx.allocate(8).unwrap();
        let index = a.index;
        ctx.release(a).unwrap();
        assert_eq!(ctx.stats().free, 1);
        let b = ctx.allocate(4).unwrap();
        assert_eq!(b.index, index);
        assert_eq!(ctx.limbs(&b).unwrap(), &[0, 0, 0, 0]);
        assert_eq!(ctx.stats().free, 0);
        ctx.release(b).unwrap();
    }

    #[test]
    fn copy_shares_and_duplicate_detaches() {
        let mut ctx = BigIntCtx::new();
        let a = ctx.allocate_from(5).unwrap();
        let shared = ctx.copy(&a).unwrap();
        assert_eq!(shared.index, a.index);
        let deep = ctx.duplicate(&a).unwrap();
        assert_ne!(deep.index, a.index);

        ctx.release(a).unwrap();
        assert_eq!(ctx.limbs(&shared).unwrap(), &[5]);
        assert_eq!(ctx.stats().free, 0);
        ctx.release(shared).unwrap();
        assert_eq!(ctx.stats().free, 1);
        ctx.release(deep).unwrap();

        ctx.finish().unwrap();
    }

    #[test]
    fn permanent_contract() {
        let mut ctx = BigIntCtx::new();
        let a = ctx.allocate_from(9).unwrap();
        let extra = ctx.copy(&a).unwrap();
        assert!(matches!(ctx.set_permanent(&a), Err(Error::AlreadyShared { refs: 2 })));
        ctx.release(extra).unwrap();

        assert!(matches!(ctx.reset_permanent(&a), Err(Error::NotPermanent { refs: 1 })));
        ctx.set_permanent(&a).unwrap();
        assert!(ctx.is_permanent(&a).unwrap());

        let again = ctx.copy(&a).unwrap();
        ctx.release(again).unwrap();
        assert_eq!(ctx.stats().free, 0);
        assert_eq!(ctx.limbs(&a).unwrap(), &[9]);

        ctx.reset_permanent_and_release(a).unwrap();
        assert_eq!(ctx.stats().free, 1);
        ctx.finish().unwrap();
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let mut one = BigIntCtx::new();
        let mut two = BigIntCtx::new();
        let v = one.allocate_from(1).unwrap();
        let stranger = BigInt { index: v.index, ctx: v.ctx };
        assert!(two.is_zero(&stranger));
        assert!(matches!(two.compare(&stranger, &stranger), Err(Error::ForeignValue { .. })));
        assert!(matches!(two.limbs(&stranger), Err(Error::ForeignValue { .. })));
        assert!(matches!(two.len(&stranger), Err(Error::ForeignValue { .. })));
        assert!(matches!(two.bit_count(&stranger), Err(Error::ForeignValue { .. })));
        assert!(matches!(two.bit_is_set(&stranger, 0), Err(Error::ForeignValue { .. })));
        assert!(matches!(two.to_hex(&stranger), Err(Error::ForeignValue { .. })));
        assert!(matches!(two.is_permanent(&stranger), Err(Error::ForeignValue { .. })));
        assert!(matches!(two.release(stranger), Err(Error::ForeignValue { .. })));
        one.release(v).unwrap();

        // right context, slot that was never handed out
        let unknown = BigInt { index: 500, ctx: two.id };
        assert!(matches!(two.limbs(&unknown), Err(Error::PoolCorruption { index: 500, refs: 0 })));
    }

    #[test]
    fn reusing_a_referenced_shell_is_corruption() {
        let mut ctx = BigIntCtx::new();
        let a = ctx.allocate(2).unwrap();
        let index = a.index;
        ctx.release(a).unwrap();

        ctx.slots[index].refs = 3;
        assert!(matches!(ctx.allocate(2), Err(Error::PoolCorruption { refs: 3, .. })));
        ctx.slots[index].refs = 0;
    }

    #[test]
    fn hex_export_and_import() {
        let mut ctx = BigIntCtx::new();
        let v = ctx.from_hex("1deadbeef").unwrap();
        assert_eq!(ctx.limbs(&v).unwrap(), &[0xdeadbeef, 1]);
        assert_eq!(ctx.to_hex(&v).unwrap(), "00000001deadbeef");
        assert!(matches!(ctx.from_hex("zz"), Err(Error::Hex(_))));
        ctx.release(v).unwrap();
    }

    #[test]
    fn finish_reports_leaks() {
        let mut ctx = BigIntCtx::new();
        let _kept = ctx.allocate(2).unwrap();
        assert!(matches!(ctx.finish(), Err(Error::Leaked { active: 1 })));
    }

    #[test]
    fn preallocated_shells_sit_on_the_free_list() {
        let ctx = BigIntCtx::with_config(CtxConfig {
            prealloc_shells: 3,
            prealloc_limbs: 16,
            ..CtxConfig::default()
        });
        assert_eq!(ctx.stats().free, 3);
        assert_eq!(ctx.stats().active, 1);
    }
}
