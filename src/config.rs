/// Tuning knobs for a [`BigIntCtx`](crate::BigIntCtx).
#[derive(Clone, Debug)]
pub struct CtxConfig {
    /// A fresh shell is created with this many times the requested limbs.
    pub capacity_factor: usize,
    /// Shells created up front and parked on the free list.
    pub prealloc_shells: usize,
    /// Limb capacity of each preallocated shell.
    pub prealloc_limbs: usize,
    /// Widest sliding window `mod_power` will use.
    pub max_window: usize,
}

impl Default for CtxConfig {
    fn default() -> Self {
        CtxConfig {
            capacity_factor: 2,
            prealloc_shells: 0,
            prealloc_limbs: 0,
            max_window: 5,
        }
    }
}
