//! Shared counter/set store seam.
//!
//! The rate-limit counters, the token revocation set, and the folder-path
//! cache are the only cross-request shared mutable state in the gateway.
//! All of them reduce to single atomic primitives against a key-value
//! collaborator: increment-with-expiry, set-insert-with-expiry, membership
//! check, small-JSON get/put. The collaborator itself (an external shared
//! store in production) stays behind the [`KvStore`] trait; [`MemoryKv`]
//! is the in-process implementation.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;

/// Errors from the shared counter/set store.
#[derive(Debug, Error)]
pub enum KvError {
    /// The store is unreachable or refused the operation.
    #[error("kv store unavailable: {0}")]
    Unavailable(String),
}

/// Result of an increment-with-expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Counter value after the increment.
    pub count: u64,
    /// Time left until the counter's window expires.
    pub ttl_remaining: Duration,
}

/// Atomic counter/set/blob operations against the shared store.
///
/// Every method is one atomic primitive; there are no multi-step
/// transactions, so implementations need no locking beyond what their own
/// storage provides.
pub trait KvStore: Send + Sync + 'static {
    /// Atomically increments `key`, starting a `ttl` window on first touch.
    fn incr_with_ttl(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<Counter, KvError>> + Send;

    /// Inserts `member` into the set `key` with its own time-to-live.
    fn set_add_with_ttl(
        &self,
        key: &str,
        member: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<(), KvError>> + Send;

    /// Checks membership of `member` in the set `key`.
    fn set_contains(
        &self,
        key: &str,
        member: &str,
    ) -> impl std::future::Future<Output = Result<bool, KvError>> + Send;

    /// Stores a small JSON blob under `key` with a time-to-live.
    fn put_json(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<(), KvError>> + Send;

    /// Fetches a small JSON blob, `None` if absent or expired.
    fn get_json(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<serde_json::Value>, KvError>> + Send;

    /// Removes a blob key, if present.
    fn del(&self, key: &str) -> impl std::future::Future<Output = Result<(), KvError>> + Send;
}

/// In-process [`KvStore`] over concurrent maps with lazy expiry.
///
/// Entries are dropped when read after their deadline; nothing sweeps in the
/// background, so an abandoned key lives until its next touch. That matches
/// the bounded-growth contract: every insert carries a TTL.
#[derive(Debug, Default)]
pub struct MemoryKv {
    counters: DashMap<String, (u64, Instant)>,
    sets: DashMap<String, DashMap<String, Instant>>,
    blobs: DashMap<String, (serde_json::Value, Instant)>,
}

impl MemoryKv {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<Counter, KvError> {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| (0, now + ttl));

        let (count, deadline) = entry.value_mut();
        if *deadline <= now {
            // Window elapsed, start a fresh one.
            *count = 0;
            *deadline = now + ttl;
        }
        *count += 1;

        Ok(Counter {
            count: *count,
            ttl_remaining: deadline.saturating_duration_since(now),
        })
    }

    async fn set_add_with_ttl(&self, key: &str, member: &str, ttl: Duration) -> Result<(), KvError> {
        let set = self.sets.entry(key.to_string()).or_default();
        set.insert(member.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let now = Instant::now();
        let mut live = false;
        let mut stale = false;
        if let Some(set) = self.sets.get(key) {
            match set.get(member) {
                Some(deadline) if *deadline > now => live = true,
                Some(_) => stale = true,
                None => {}
            }
        }
        if stale {
            if let Some(set) = self.sets.get(key) {
                set.remove(member);
            }
        }
        Ok(live)
    }

    async fn put_json(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), KvError> {
        self.blobs
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>, KvError> {
        let now = Instant::now();
        let expired = match self.blobs.get(key) {
            Some(entry) => {
                let (value, deadline) = entry.value();
                if *deadline > now {
                    return Ok(Some(value.clone()));
                }
                true
            }
            None => false,
        };
        if expired {
            self.blobs.remove(key);
        }
        Ok(None)
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.blobs.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn incr_counts_within_window() {
        let kv = MemoryKv::new();
        let ttl = Duration::from_secs(60);

        for expected in 1..=5 {
            let counter = kv.incr_with_ttl("rl:download:alice", ttl).await.unwrap();
            assert_eq!(counter.count, expected);
            assert!(counter.ttl_remaining <= ttl);
        }

        // A different key counts independently.
        let counter = kv.incr_with_ttl("rl:download:bob", ttl).await.unwrap();
        assert_eq!(counter.count, 1);
    }

    #[tokio::test]
    async fn incr_resets_after_window() {
        let kv = MemoryKv::new();
        let counter = kv
            .incr_with_ttl("k", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(counter.count, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let counter = kv
            .incr_with_ttl("k", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(counter.count, 1);
    }

    #[tokio::test]
    async fn set_membership_with_ttl() {
        let kv = MemoryKv::new();
        kv.set_add_with_ttl("revoked", "jti-1", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(kv.set_contains("revoked", "jti-1").await.unwrap());
        assert!(!kv.set_contains("revoked", "jti-2").await.unwrap());
        assert!(!kv.set_contains("other", "jti-1").await.unwrap());
    }

    #[tokio::test]
    async fn set_member_expires() {
        let kv = MemoryKv::new();
        kv.set_add_with_ttl("revoked", "jti-1", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!kv.set_contains("revoked", "jti-1").await.unwrap());
    }

    #[tokio::test]
    async fn json_round_trip_and_expiry() {
        let kv = MemoryKv::new();
        kv.put_json("path:a/b", json!({"id": "folder-1"}), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            kv.get_json("path:a/b").await.unwrap(),
            Some(json!({"id": "folder-1"}))
        );

        kv.put_json("gone", json!(1), Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(kv.get_json("gone").await.unwrap(), None);
    }
}
