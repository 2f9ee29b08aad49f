pub mod arith;
pub mod barrett;
pub mod context;
pub mod divide;
pub mod limbs;
