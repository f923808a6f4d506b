use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{
    error::LimiterResult,
    policy::IdentityKey,
    storage::{ACCESS_WINDOW, AccessOutcome, StorageAdapter},
};

/// Single-process backend. Accesses and blocks live in independent maps so
/// block checks never contend with access recording. The prune-count-append
/// sequence for one identity runs entirely under that identity's mutex,
/// which makes `record_access` linearizable per key while leaving other
/// identities free to proceed.
#[derive(Default)]
pub struct InMemoryAdapter {
    accesses: DashMap<IdentityKey, Arc<Mutex<VecDeque<DateTime<Utc>>>>>,
    blocks: DashMap<IdentityKey, DateTime<Utc>>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn window_for(&self, key: &IdentityKey) -> Arc<Mutex<VecDeque<DateTime<Utc>>>> {
        self.accesses.entry(key.clone()).or_default().clone()
    }
}

#[async_trait]
impl StorageAdapter for InMemoryAdapter {
    async fn record_access(
        &self,
        key: &IdentityKey,
        max_requests: u32,
    ) -> LimiterResult<AccessOutcome> {
        let window = self.window_for(key);
        let mut stamps = window.lock().await;

        let now = Utc::now();
        let cutoff = now - ACCESS_WINDOW;
        while let Some(oldest) = stamps.front() {
            if *oldest <= cutoff {
                stamps.pop_front();
            } else {
                break;
            }
        }

        let count = stamps.len() as u64;
        if count >= u64::from(max_requests) {
            return Ok(AccessOutcome {
                admitted: false,
                count,
            });
        }

        stamps.push_back(now);
        Ok(AccessOutcome {
            admitted: true,
            count: count + 1,
        })
    }

    async fn get_block(&self, key: &IdentityKey) -> LimiterResult<Option<DateTime<Utc>>> {
        let Some(blocked_until) = self.blocks.get(key).map(|entry| *entry.value()) else {
            return Ok(None);
        };

        if blocked_until > Utc::now() {
            return Ok(Some(blocked_until));
        }

        // Lazy cleanup; the guard keeps a concurrently refreshed block alive.
        self.blocks
            .remove_if(key, |_, blocked_until| *blocked_until <= Utc::now());
        Ok(None)
    }

    async fn set_block(
        &self,
        key: &IdentityKey,
        duration: Duration,
    ) -> LimiterResult<DateTime<Utc>> {
        let blocked_until = Utc::now() + duration;
        self.blocks.insert(key.clone(), blocked_until);
        Ok(blocked_until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::KeyKind;

    fn ip(value: &str) -> IdentityKey {
        IdentityKey::new(KeyKind::Ip, value)
    }

    #[tokio::test]
    async fn admits_up_to_the_limit_with_increasing_counts() {
        let adapter = InMemoryAdapter::new();
        let key = ip("10.0.0.1");

        for expected in 1..=5u64 {
            let outcome = adapter.record_access(&key, 5).await.unwrap();
            assert!(outcome.admitted);
            assert_eq!(outcome.count, expected);
        }

        let outcome = adapter.record_access(&key, 5).await.unwrap();
        assert!(!outcome.admitted);
        assert_eq!(outcome.count, 5);
    }

    #[tokio::test]
    async fn denied_access_does_not_grow_the_window() {
        let adapter = InMemoryAdapter::new();
        let key = ip("10.0.0.2");

        for _ in 0..3 {
            adapter.record_access(&key, 3).await.unwrap();
        }

        for _ in 0..10 {
            let outcome = adapter.record_access(&key, 3).await.unwrap();
            assert!(!outcome.admitted);
            assert_eq!(outcome.count, 3);
        }
    }

    #[tokio::test]
    async fn window_drains_after_one_second() {
        let adapter = InMemoryAdapter::new();
        let key = ip("10.0.0.3");

        for _ in 0..2 {
            assert!(adapter.record_access(&key, 2).await.unwrap().admitted);
        }
        assert!(!adapter.record_access(&key, 2).await.unwrap().admitted);

        tokio::time::sleep(Duration::from_millis(1_050)).await;

        let outcome = adapter.record_access(&key, 2).await.unwrap();
        assert!(outcome.admitted);
        assert_eq!(outcome.count, 1);
    }

    #[tokio::test]
    async fn same_value_under_different_kinds_is_independent() {
        let adapter = InMemoryAdapter::new();
        let ip_key = IdentityKey::new(KeyKind::Ip, "abc");
        let token_key = IdentityKey::new(KeyKind::Token, "abc");

        assert!(adapter.record_access(&ip_key, 1).await.unwrap().admitted);
        assert!(!adapter.record_access(&ip_key, 1).await.unwrap().admitted);
        assert!(adapter.record_access(&token_key, 1).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn block_round_trip_and_expiry() {
        let adapter = InMemoryAdapter::new();
        let key = ip("10.0.0.4");

        assert_eq!(adapter.get_block(&key).await.unwrap(), None);

        let blocked_until = adapter
            .set_block(&key, Duration::from_millis(80))
            .await
            .unwrap();
        let remaining = blocked_until - Utc::now();
        assert!(remaining.num_milliseconds() <= 80);
        assert!(remaining.num_milliseconds() > 0);

        assert_eq!(adapter.get_block(&key).await.unwrap(), Some(blocked_until));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(adapter.get_block(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_block_overwrites_rather_than_extends() {
        let adapter = InMemoryAdapter::new();
        let key = ip("10.0.0.5");

        let first = adapter.set_block(&key, Duration::from_secs(60)).await.unwrap();
        let second = adapter
            .set_block(&key, Duration::from_millis(50))
            .await
            .unwrap();

        assert!(second < first);
        assert_eq!(adapter.get_block(&key).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn concurrent_recording_never_overshoots_the_limit() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let key = ip("10.0.0.6");

        let mut handles = Vec::new();
        for _ in 0..50 {
            let adapter = Arc::clone(&adapter);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                adapter.record_access(&key, 10).await.unwrap().admitted
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 10);
    }
}
