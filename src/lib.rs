//! Arbitrary-precision unsigned integers tuned for RSA-sized modular
//! arithmetic: pooled limb buffers, Knuth long division and Barrett
//! reduction with per-modulus cached constants.

pub mod bigint;
pub mod config;
pub mod error;
pub mod modpow;
pub mod rsa;

pub use bigint::barrett::ModSlot;
pub use bigint::context::{BigInt, BigIntCtx, PoolStats};
pub use bigint::limbs::{DoubleLimb, Limb, LIMB_BITS, LIMB_BYTES};
pub use config::CtxConfig;
pub use error::{Error, Result};
pub use modpow::CrtKey;
