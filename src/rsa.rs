//! Raw RSA primitives (no padding) driven through a [`BigIntCtx`].

use std::cmp::Ordering;

use crate::bigint::barrett::ModSlot;
use crate::bigint::context::BigIntCtx;
use crate::error::{Error, Result};
use crate::modpow::CrtKey;

fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

/// Reject inputs that are not smaller than `n`.
fn check_input(ctx: &mut BigIntCtx, n: &[u8], input: &[u8]) -> Result<()> {
    let modulus = ctx.load(n)?;
    let x = ctx.load(input)?;
    let order = ctx.compare(&x, &modulus);
    ctx.release(modulus)?;
    ctx.release(x)?;
    match order? {
        Ordering::Less => Ok(()),
        _ => Err(Error::InputTooLarge),
    }
}

/// `input^exp mod n` as a `n.len()`-byte buffer.
///
/// Runs in a borrowed [`ModSlot::Modulus`] slot; a modulus the caller
/// primed there is left in place.
fn raw_op(ctx: &mut BigIntCtx, n: &[u8], exp: &[u8], input: &[u8]) -> Result<Vec<u8>> {
    check_input(ctx, n, input)?;
    ctx.with_moduli(&[ModSlot::Modulus], |ctx| {
        let modulus = ctx.load(n)?;
        ctx.set_modulo(modulus, ModSlot::Modulus)?;
        ctx.select_modulo(ModSlot::Modulus);

        let e = ctx.load(exp)?;
        let r = ctx.load(input).and_then(|x| ctx.mod_power(x, &e));
        ctx.release(e)?;
        ctx.export(r?, n.len())
    })
}

/// RSA public key (n, e)
pub struct RsaPublicKey {
    pub n: Vec<u8>,
    pub e: Vec<u8>,
}

impl RsaPublicKey {
    pub fn new(n: &[u8], e: &[u8]) -> Self {
        Self {
            n: strip_leading_zeros(n),
            e: e.to_vec(),
        }
    }

    /// Modulus length in bytes; every output has exactly this length.
    pub fn size(&self) -> usize {
        self.n.len()
    }

    /// `m^e mod n`.
    pub fn public_op(&self, ctx: &mut BigIntCtx, msg: &[u8]) -> Result<Vec<u8>> {
        raw_op(ctx, &self.n, &self.e, msg)
    }
}

/// CRT form of the private exponent, all big-endian.
pub struct RsaCrtParams {
    pub p: Vec<u8>,
    pub q: Vec<u8>,
    pub dp: Vec<u8>,
    pub dq: Vec<u8>,
    pub qinv: Vec<u8>,
}

/// RSA private key (n, d), optionally with CRT parameters
pub struct RsaPrivateKey {
    pub n: Vec<u8>,
    pub d: Vec<u8>,
    pub crt: Option<RsaCrtParams>,
}

impl RsaPrivateKey {
    pub fn new(n: &[u8], d: &[u8]) -> Self {
        Self {
            n: strip_leading_zeros(n),
            d: d.to_vec(),
            crt: None,
        }
    }

    pub fn with_crt(mut self, crt: RsaCrtParams) -> Self {
        self.crt = Some(crt);
        self
    }

    pub fn size(&self) -> usize {
        self.n.len()
    }

    /// `c^d mod n`, through the CRT when its parameters are present.
    pub fn private_op(&self, ctx: &mut BigIntCtx, ct: &[u8]) -> Result<Vec<u8>> {
        let Some(crt) = &self.crt else {
            return raw_op(ctx, &self.n, &self.d, ct);
        };
        check_input(ctx, &self.n, ct)?;

        let size = self.size();
        ctx.with_moduli(&[ModSlot::P, ModSlot::Q], |ctx| {
            let p = ctx.load(&crt.p)?;
            ctx.set_modulo(p, ModSlot::P)?;
            let q = ctx.load(&crt.q)?;
            ctx.set_modulo(q, ModSlot::Q)?;

            let key = CrtKey::load(ctx, &crt.dp, &crt.dq, &crt.qinv)?;
            let r = ctx.load(ct).and_then(|x| ctx.crt(x, &key));
            key.release(ctx)?;
            ctx.export(r?, size)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: &str = "ca2468d07c941c8cf7d3b75cb67cff07c7ccb043cb8a5b3dc4d84f98120424ae8230cfb38c86c2add733373a44f41805c802acbe485b57f2e4177c7ef1c91ba3";
    const D: &str = "0eece74c55967e112e8f545fa51dcf9adc76d1a0ffdb6467482c8c9bf6e09570a7868f5856cba3eb333d0bcd24e1661b61e478b0d2afbf2bee55aba59c576551";

    fn bytes(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    #[test]
    fn raw_roundtrip() {
        let mut ctx = BigIntCtx::new();
        let pubkey = RsaPublicKey::new(&bytes(N), &[0x01, 0x00, 0x01]);
        let privkey = RsaPrivateKey::new(&bytes(N), &bytes(D));

        let msg = b"hello world".to_vec();
        let ct = pubkey.public_op(&mut ctx, &msg).unwrap();
        assert_eq!(ct.len(), 64);
        assert_eq!(
            hex::encode(&ct),
            "5a37bd9424b1a14263fb0135ea3aec35fc7c60aa945b9d82780afad6c4969853\
             527d3fb06bd9a489390176ba733b202e37edd7fded636c76fe1e412f36db7480"
        );

        let dec = privkey.private_op(&mut ctx, &ct).unwrap();
        assert_eq!(&dec[dec.len() - msg.len()..], &msg[..]);
        assert!(dec[..dec.len() - msg.len()].iter().all(|&b| b == 0));
        ctx.finish().unwrap();
    }

    #[test]
    fn input_too_large() {
        let mut ctx = BigIntCtx::new();
        let pubkey = RsaPublicKey::new(&bytes(N), &[0x01, 0x00, 0x01]);
        let msg = vec![0xffu8; pubkey.size()];
        assert!(matches!(pubkey.public_op(&mut ctx, &msg), Err(Error::InputTooLarge)));
        ctx.finish().unwrap();
    }

    fn textbook_crt(p: &[u8]) -> RsaPrivateKey {
        // n = 61 * 53, d = 2753
        RsaPrivateKey::new(&[0x0c, 0xa1], &[0x0a, 0xc1]).with_crt(RsaCrtParams {
            p: p.to_vec(),
            q: vec![53],
            dp: vec![53],
            dq: vec![49],
            qinv: vec![38],
        })
    }

    #[test]
    fn caller_moduli_survive() {
        let mut ctx = BigIntCtx::new();
        let m = ctx.allocate_from(101).unwrap();
        ctx.set_modulo(m, ModSlot::Modulus).unwrap();
        let p = ctx.allocate_from(97).unwrap();
        ctx.set_modulo(p, ModSlot::P).unwrap();
        ctx.select_modulo(ModSlot::P);
        let before = ctx.stats();

        let pubkey = RsaPublicKey::new(&[0x0d], &[3]);
        assert_eq!(pubkey.public_op(&mut ctx, &[2]).unwrap(), vec![8]);
        let dec = textbook_crt(&[61]).private_op(&mut ctx, &[0x0a, 0xe6]).unwrap();
        assert_eq!(dec, vec![0, 65]);

        assert_eq!(ctx.stats().active, before.active);
        assert_eq!(ctx.stats().permanent, before.permanent);
        assert_eq!(ctx.current_modulo(), ModSlot::P);
        assert!(matches!(ctx.modulus_len(ModSlot::Q), Err(Error::NoModulus(ModSlot::Q))));

        let x = ctx.allocate_from(1000).unwrap();
        let r = ctx.barrett(x).unwrap();
        assert_eq!(ctx.limbs(&r).unwrap(), &[1000 % 97]);
        ctx.release(r).unwrap();

        ctx.select_modulo(ModSlot::Modulus);
        let x = ctx.allocate_from(1000).unwrap();
        let r = ctx.barrett(x).unwrap();
        assert_eq!(ctx.limbs(&r).unwrap(), &[1000 % 101]);
        ctx.release(r).unwrap();
        ctx.finish().unwrap();
    }

    #[test]
    fn failed_crt_setup_leaves_nothing_behind() {
        let mut ctx = BigIntCtx::new();
        let key = textbook_crt(&[]);
        assert!(matches!(
            key.private_op(&mut ctx, &[0x0a, 0xe6]),
            Err(Error::DivisionByZero)
        ));
        assert!(ctx.modulus(ModSlot::P).is_err());
        ctx.finish().unwrap();
    }
}
