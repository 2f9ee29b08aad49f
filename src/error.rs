use thiserror::Error;

use crate::bigint::barrett::ModSlot;

/// Contract violations raised by the engine.
///
/// None of these are expected at runtime: each one means a caller broke
/// the ownership or permanence rules, so the operation in progress is
/// abandoned rather than retried.
#[derive(Debug, Error)]
pub enum Error {
    #[error("value belongs to context {found}, not context {expected}")]
    ForeignValue { expected: u32, found: u32 },

    #[error("pool entry {index} has reference count {refs}")]
    PoolCorruption { index: usize, refs: u32 },

    #[error("cannot make a value with {refs} owners permanent")]
    AlreadyShared { refs: u32 },

    #[error("value is not permanent (reference count {refs})")]
    NotPermanent { refs: u32 },

    #[error("division by zero")]
    DivisionByZero,

    #[error("value needs {needed} bytes but the buffer holds {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("no modulus set for slot {0:?}")]
    NoModulus(ModSlot),

    #[error("{active} values still active at teardown")]
    Leaked { active: usize },

    #[error("input is not smaller than the modulus")]
    InputTooLarge,

    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

pub type Result<T> = std::result::Result<T, Error>;
