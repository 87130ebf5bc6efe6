use berth_core::{Result, StateStore};
use std::sync::Arc;

pub(crate) const COUNTER_KEY: &str = "sandboxes:count";

/// Grants and releases capacity slots against the shared counter.
///
/// The counter is only ever touched through the store's two atomic
/// primitives; no component reads it and writes it back. The contract is that
/// it never exceeds the cap and never goes negative.
pub struct AdmissionController {
    store: Arc<dyn StateStore>,
    max: i64,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn StateStore>, max: i64) -> Self {
        Self { store, max }
    }

    /// Attempts to reserve one capacity slot.
    ///
    /// A single atomic check-and-increment: two callers racing on the last
    /// slot cannot both succeed. Returns `false` at capacity, without
    /// mutation.
    pub async fn reserve(&self) -> Result<bool> {
        self.store.incr_below(COUNTER_KEY, self.max).await
    }

    /// Releases one slot.
    ///
    /// Clamped at zero, so a release that was never matched by a successful
    /// reserve (a retried delete, say) is tolerated rather than corrupting
    /// the capacity accounting downward.
    pub async fn release(&self) -> Result<()> {
        self.store.decr_clamped(COUNTER_KEY).await
    }
}
