pub mod in_memory;
pub mod redis_backend;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{error::LimiterResult, policy::IdentityKey};

/// Trailing interval over which accesses are counted.
pub const ACCESS_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct AccessOutcome {
    pub admitted: bool,
    /// Open accesses in the current window, including this one if admitted.
    pub count: u64,
}

/// Persistence boundary for all limiter state. The decision engine keeps
/// nothing between requests; every counter and block lives behind this
/// trait, whether in process memory or in a store shared across instances.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Discards the identity's timestamps older than [`ACCESS_WINDOW`],
    /// counts what remains, and admits the access (appending "now") iff the
    /// count is below `max_requests`. Denied calls leave the record as-is.
    ///
    /// Concurrent calls for one identity must observe this as a serialized
    /// operation: two simultaneous callers must never both slip past the
    /// limit through a lost update.
    async fn record_access(
        &self,
        key: &IdentityKey,
        max_requests: u32,
    ) -> LimiterResult<AccessOutcome>;

    /// Returns the identity's block expiry, or `None` when no block exists
    /// or the stored expiry has already passed. An expired entry may be
    /// deleted opportunistically; readers never see it either way.
    async fn get_block(&self, key: &IdentityKey) -> LimiterResult<Option<DateTime<Utc>>>;

    /// Unconditionally overwrites the identity's block with now + `duration`
    /// and returns the new expiry, visible to every subsequent reader.
    async fn set_block(
        &self,
        key: &IdentityKey,
        duration: Duration,
    ) -> LimiterResult<DateTime<Utc>>;
}
