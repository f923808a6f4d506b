use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    error::LimiterResult,
    policy::{IdentityKey, RatePolicy},
    storage::StorageAdapter,
};

/// Terminal outcome of the admission state machine. A denial carries the
/// block expiry for informational use; it is never required for
/// correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { count: u64 },
    Denied { blocked_until: DateTime<Utc> },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// The admission decision engine. Holds no per-request state of its own;
/// every counter and block crosses the adapter boundary by value.
#[derive(Clone)]
pub struct RateLimiter {
    adapter: Arc<dyn StorageAdapter>,
}

impl RateLimiter {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self { adapter }
    }

    /// Runs the per-request state machine: an outstanding block wins, then
    /// the access counter, then a fresh block on violation. While blocked,
    /// the access counter is deliberately left untouched so a cooldown does
    /// not keep the window growing.
    pub async fn check(
        &self,
        key: &IdentityKey,
        policy: &RatePolicy,
    ) -> LimiterResult<Decision> {
        if key.is_anonymous() {
            return Ok(Decision::Allowed { count: 0 });
        }

        if let Some(blocked_until) = self.adapter.get_block(key).await? {
            return Ok(Decision::Denied { blocked_until });
        }

        let outcome = self
            .adapter
            .record_access(key, policy.max_requests_per_second)
            .await?;

        if outcome.admitted {
            tracing::debug!(identity = %key, count = outcome.count, "access recorded");
            return Ok(Decision::Allowed {
                count: outcome.count,
            });
        }

        let blocked_until = self.adapter.set_block(key, policy.block_time).await?;
        tracing::warn!(
            identity = %key,
            block_ms = policy.block_time.as_millis() as u64,
            "rate limit exceeded; blocking"
        );

        Ok(Decision::Denied { blocked_until })
    }
}
