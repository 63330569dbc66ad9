//! Per-user usage counters and the daily chat quota built on them.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RedisConfig;
use crate::services::error::ServiceError;

/// Windowed counters keyed by string.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Add one to `key` and return the new count. The counter expires
    /// `window` after its first increment.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, ServiceError>;

    async fn current(&self, key: &str) -> Result<u64, ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;
}

/// Increments between sweeps of expired counters.
const SWEEP_EVERY: u64 = 256;

/// Process-local counters. Keys are dated, so yesterday's entries are never
/// touched again; a sweep every [`SWEEP_EVERY`] increments drops them.
#[derive(Default)]
pub struct InMemoryUsageStore {
    counters: DashMap<String, (u64, Instant)>,
    increments: AtomicU64,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every counter whose window has passed. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, (_, expires_at)| *expires_at > now);
        let purged = before.saturating_sub(self.counters.len());
        if purged > 0 {
            tracing::debug!(purged, "Purged expired usage counters");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, ServiceError> {
        // Sweep before taking the entry lock; retain locks every shard.
        if self.increments.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.purge_expired();
        }

        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert((0, now + window));

        if entry.1 <= now {
            *entry = (0, now + window);
        }
        entry.0 += 1;
        Ok(entry.0)
    }

    async fn current(&self, key: &str) -> Result<u64, ServiceError> {
        Ok(self
            .counters
            .get(key)
            .filter(|entry| entry.1 > Instant::now())
            .map(|entry| entry.0)
            .unwrap_or(0))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisUsageStore {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisUsageStore {
    pub async fn new(config: &RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl UsageStore for RedisUsageStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, ServiceError> {
        let mut conn = self.manager.clone();

        let count: u64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(window.as_secs().max(1))
                .query_async::<_, ()>(&mut conn)
                .await?;
        }
        Ok(count)
    }

    async fn current(&self, key: &str) -> Result<u64, ServiceError> {
        let mut conn = self.manager.clone();
        let count: Option<u64> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(count.unwrap_or(0))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(ServiceError::from)
    }
}

/// Usage reported back to the caller after a counted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    pub used: u64,
    /// `None` when the quota is disabled.
    pub remaining: Option<u64>,
}

/// Daily per-user chat allowance; the day rolls over at UTC midnight.
#[derive(Clone)]
pub struct ChatQuota {
    store: Arc<dyn UsageStore>,
    daily_limit: u64,
}

impl ChatQuota {
    pub fn new(store: Arc<dyn UsageStore>, daily_limit: u64) -> Self {
        Self { store, daily_limit }
    }

    pub fn daily_limit(&self) -> u64 {
        self.daily_limit
    }

    /// Count one request for `user_id`, failing once the day's limit is used.
    pub async fn consume(&self, user_id: i64) -> Result<QuotaUsage, ServiceError> {
        self.consume_at(user_id, Utc::now()).await
    }

    pub(crate) async fn consume_at(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<QuotaUsage, ServiceError> {
        let reset_in = seconds_until_midnight(now);
        let key = format!("usage:chat:{}:{}", user_id, now.format("%Y-%m-%d"));
        let used = self
            .store
            .increment(&key, Duration::from_secs(reset_in))
            .await?;

        if self.daily_limit == 0 {
            return Ok(QuotaUsage {
                used,
                remaining: None,
            });
        }

        if used > self.daily_limit {
            metrics::counter!("chat_quota_rejections_total").increment(1);
            tracing::info!(user_id, used, limit = self.daily_limit, "Chat quota exhausted");
            return Err(ServiceError::QuotaExceeded {
                limit: self.daily_limit,
                retry_after: reset_in,
            });
        }

        Ok(QuotaUsage {
            used,
            remaining: Some(self.daily_limit - used),
        })
    }
}

fn seconds_until_midnight(now: DateTime<Utc>) -> u64 {
    let tomorrow = now.date_naive() + ChronoDuration::days(1);
    let midnight = tomorrow
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now + ChronoDuration::days(1));
    (midnight - now).num_seconds().max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_in_memory_counter_windows() {
        let store = InMemoryUsageStore::new();
        assert_eq!(store.increment("k", Duration::from_secs(60)).await.ok(), Some(1));
        assert_eq!(store.increment("k", Duration::from_secs(60)).await.ok(), Some(2));
        assert_eq!(store.current("k").await.ok(), Some(2));
        assert_eq!(store.current("other").await.ok(), Some(0));
    }

    #[tokio::test]
    async fn test_in_memory_counter_expires() {
        let store = InMemoryUsageStore::new();
        store.increment("k", Duration::from_millis(20)).await.expect("incr");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.current("k").await.ok(), Some(0));
        assert_eq!(store.increment("k", Duration::from_millis(20)).await.ok(), Some(1));
    }

    #[tokio::test]
    async fn test_expired_counters_are_reclaimed() {
        let store = InMemoryUsageStore::new();
        for user in 0..10 {
            store
                .increment(&format!("usage:chat:{user}:2024-07-30"), Duration::from_millis(10))
                .await
                .expect("incr");
        }
        assert_eq!(store.len(), 10);
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Enough traffic on a fresh key to trigger a sweep.
        for _ in 0..SWEEP_EVERY {
            store
                .increment("usage:chat:1:2024-07-31", Duration::from_secs(60))
                .await
                .expect("incr");
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.current("usage:chat:1:2024-07-31").await.ok(), Some(SWEEP_EVERY));
    }

    #[tokio::test]
    async fn test_purge_keeps_live_counters() {
        let store = InMemoryUsageStore::new();
        store.increment("old", Duration::from_millis(10)).await.expect("incr");
        store.increment("live", Duration::from_secs(60)).await.expect("incr");
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.current("live").await.ok(), Some(1));
        assert!(!store.is_empty());
    }

    #[tokio::test]
    async fn test_quota_rejects_request_past_limit() {
        let quota = ChatQuota::new(Arc::new(InMemoryUsageStore::new()), 3);
        let now = Utc.with_ymd_and_hms(2024, 7, 30, 23, 0, 0).unwrap();

        for expected_remaining in [2, 1, 0] {
            let usage = quota.consume_at(9, now).await.expect("within quota");
            assert_eq!(usage.remaining, Some(expected_remaining));
        }

        match quota.consume_at(9, now).await {
            Err(ServiceError::QuotaExceeded { limit, retry_after }) => {
                assert_eq!(limit, 3);
                assert_eq!(retry_after, 3600);
            }
            other => panic!("expected quota error, got {other:?}"),
        }

        // Other users and the next day are unaffected.
        assert!(quota.consume_at(10, now).await.is_ok());
        let tomorrow = Utc.with_ymd_and_hms(2024, 7, 31, 0, 0, 1).unwrap();
        assert!(quota.consume_at(9, tomorrow).await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_limit_disables_quota() {
        let quota = ChatQuota::new(Arc::new(InMemoryUsageStore::new()), 0);
        for _ in 0..10 {
            let usage = quota.consume(1).await.expect("unlimited");
            assert_eq!(usage.remaining, None);
        }
    }
}
