use std::{future::Future, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use tokio::time::timeout;
use uuid::Uuid;

use crate::{
    error::{LimiterError, LimiterResult},
    policy::IdentityKey,
    storage::{ACCESS_WINDOW, AccessOutcome, StorageAdapter},
};

/// Shared-store backend over Redis. Accesses are a sorted set scored by unix
/// microseconds; blocks are plain values holding the expiry as unix
/// nanoseconds. Both key families carry an expiry (window length and block
/// duration respectively) so stale state self-cleans without a sweeper.
///
/// No in-process lock is held: the prune+count step is one MULTI/EXEC
/// pipeline, and the admit decision compares against that count in the
/// caller. The append is a second round trip, so extreme concurrent load on
/// one identity can overshoot the limit by at most the requests in flight.
pub struct RedisAdapter {
    manager: ConnectionManager,
    op_timeout: Duration,
}

impl RedisAdapter {
    pub async fn new(url: &str, op_timeout: Duration) -> LimiterResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = match timeout(op_timeout, client.get_connection_manager()).await {
            Ok(manager) => manager?,
            Err(_) => {
                return Err(LimiterError::StorageUnavailable(
                    "timed out connecting to redis".to_string(),
                ));
            }
        };

        let adapter = Self {
            manager,
            op_timeout,
        };

        let mut conn = adapter.manager.clone();
        let _: String = adapter
            .deadline(redis::cmd("PING").query_async(&mut conn))
            .await?;
        tracing::info!(url, "connected to redis");

        Ok(adapter)
    }

    /// Bounds every backend round trip. A stalled connection surfaces as a
    /// storage failure instead of hanging the request.
    async fn deadline<T>(
        &self,
        operation: impl Future<Output = Result<T, redis::RedisError>>,
    ) -> LimiterResult<T> {
        match timeout(self.op_timeout, operation).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(LimiterError::StorageUnavailable(
                "redis operation timed out".to_string(),
            )),
        }
    }
}

#[async_trait]
impl StorageAdapter for RedisAdapter {
    async fn record_access(
        &self,
        key: &IdentityKey,
        max_requests: u32,
    ) -> LimiterResult<AccessOutcome> {
        let mut conn = self.manager.clone();
        let access_key = storage_key("access", key);

        let now = Utc::now();
        let clear_before = (now - ACCESS_WINDOW).timestamp_micros();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .zrembyscore(&access_key, 0, clear_before)
            .zcard(&access_key);
        let (_removed, count): (i64, u64) = self.deadline(pipe.query_async(&mut conn)).await?;

        if count >= u64::from(max_requests) {
            return Ok(AccessOutcome {
                admitted: false,
                count,
            });
        }

        // Second round trip; the uuid suffix keeps same-microsecond members
        // from collapsing into one set entry.
        let member = format!("{}:{}", now.timestamp_micros(), Uuid::new_v4());
        let mut pipe = redis::pipe();
        pipe.atomic()
            .zadd(&access_key, member, now.timestamp_micros())
            .ignore()
            .expire(&access_key, ACCESS_WINDOW.as_secs() as i64)
            .ignore();
        let _: () = self.deadline(pipe.query_async(&mut conn)).await?;

        Ok(AccessOutcome {
            admitted: true,
            count: count + 1,
        })
    }

    async fn get_block(&self, key: &IdentityKey) -> LimiterResult<Option<DateTime<Utc>>> {
        let mut conn = self.manager.clone();
        let block_key = storage_key("block", key);

        let raw: Option<String> = self
            .deadline(redis::cmd("GET").arg(&block_key).query_async(&mut conn))
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let nanos = raw.parse::<i64>().map_err(|_| {
            LimiterError::MalformedState(format!(
                "block value for {block_key} is not a timestamp: {raw:?}"
            ))
        })?;

        let blocked_until = DateTime::from_timestamp_nanos(nanos);
        if blocked_until > Utc::now() {
            Ok(Some(blocked_until))
        } else {
            // The key's own PX expiry clears it; a stale value only lingers
            // for the clock skew between us and the server.
            Ok(None)
        }
    }

    async fn set_block(
        &self,
        key: &IdentityKey,
        duration: Duration,
    ) -> LimiterResult<DateTime<Utc>> {
        let mut conn = self.manager.clone();
        let block_key = storage_key("block", key);

        let blocked_until = Utc::now() + duration;
        let nanos = blocked_until.timestamp_nanos_opt().ok_or_else(|| {
            LimiterError::Internal("block expiry exceeds the timestamp range".to_string())
        })?;

        let _: () = self
            .deadline(
                redis::cmd("SET")
                    .arg(&block_key)
                    .arg(nanos)
                    .arg("PX")
                    .arg(duration.as_millis() as u64)
                    .query_async(&mut conn),
            )
            .await?;

        Ok(blocked_until)
    }
}

/// `{family}:{key_type}:{key_value}`, lower-cased, with `-` normalized to
/// `_` in the key-type segment to keep the layout backend-safe.
fn storage_key(family: &str, key: &IdentityKey) -> String {
    format!(
        "{}:{}:{}",
        family.to_lowercase(),
        key.kind.as_str().to_lowercase().replace('-', "_"),
        key.value.to_lowercase(),
    )
}

#[cfg(test)]
mod tests {
    use super::storage_key;
    use crate::policy::{IdentityKey, KeyKind};

    #[test]
    fn key_layout_is_lower_cased_and_family_scoped() {
        let key = IdentityKey::new(KeyKind::Token, "ABC");
        assert_eq!(storage_key("access", &key), "access:token:abc");

        let key = IdentityKey::new(KeyKind::Ip, "192.168.0.7");
        assert_eq!(storage_key("block", &key), "block:ip:192.168.0.7");
    }
}
