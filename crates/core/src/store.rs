use crate::error::Result;
use async_trait::async_trait;

/// Key-value store shared by every component that tracks session state.
///
/// Each method must be a single atomic operation with respect to all
/// concurrent callers. The admission counter in particular depends on
/// [`incr_below`](StateStore::incr_below) and
/// [`decr_clamped`](StateStore::decr_clamped) never being decomposed into a
/// read followed by a write: two callers racing on the last slot below the
/// cap must not both observe room and both increment.
///
/// Every operation fails with [`Error::StoreUnavailable`](crate::Error) when
/// the store is unreachable or has been closed.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;

    /// Adds `member` to the set at `key`. Returns `false` if it was already
    /// present.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool>;

    /// Removes `member` from the set at `key`. Returns `false` if it was not
    /// a member.
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// Fetches all `keys` in one batched round-trip, preserving order.
    /// Missing keys yield `None` in their position.
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Atomically increments the counter at `key` if it is currently below
    /// `cap`. Returns whether the increment was applied; at the cap the
    /// counter is left untouched.
    async fn incr_below(&self, key: &str, cap: i64) -> Result<bool>;

    /// Atomically decrements the counter at `key`, clamping at zero.
    async fn decr_clamped(&self, key: &str) -> Result<()>;

    /// Releases the underlying connection. Further calls fail.
    async fn close(&self) -> Result<()>;
}
