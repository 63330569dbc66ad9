//! Bounded connection pool.
//!
//! The pool hands out connections produced by a [`ManageConnection`]
//! implementation and takes them back when the [`PooledConnection`] guard is
//! dropped. The number of live connections (idle + checked out) never exceeds
//! `max_connections`; both the idle set and the live count sit behind a single
//! mutex so that admission and reclamation are atomic with respect to each
//! other.

mod stats;

pub use stats::{PoolStats, PoolStatus};

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

use crate::error::AppError;

/// Creates and checks the connections held by a [`Pool`].
#[async_trait]
pub trait ManageConnection: Send + Sync + 'static {
    type Connection: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a brand new connection.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Liveness probe run on a reused connection before it is handed out.
    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error>;
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Connection pool exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Failed to open connection: {0}")]
    Connect(anyhow::Error),

    #[error("Connection pool is closed")]
    Closed,
}

impl From<PoolError> for AppError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { .. } | PoolError::Closed => AppError::ServiceUnavailable,
            PoolError::Connect(e) => AppError::DatabaseError(e),
        }
    }
}

/// Pool sizing and acquisition policy.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on live connections.
    pub max_connections: u32,
    /// Waits allowed when the pool is at capacity before giving up.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Run the liveness probe on reused connections.
    pub test_on_acquire: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_retries: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            test_on_acquire: true,
        }
    }
}

impl PoolConfig {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.25)
            .with_max_elapsed_time(None)
            .build()
    }
}

struct PoolState<C> {
    idle: VecDeque<C>,
    /// Idle plus checked-out connections.
    live: u32,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    retry_attempts: AtomicU64,
    total_created: AtomicU64,
    liveness_failures: AtomicU64,
}

struct PoolInner<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Connection>>,
    released: Notify,
    counters: Counters,
}

enum Slot<C> {
    Idle(C),
    Reserved,
    Full,
}

/// A bounded, cloneable handle to a set of reusable connections.
pub struct Pool<M: ManageConnection> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ManageConnection> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ManageConnection> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<M: ManageConnection> Pool<M> {
    /// Build a pool. No connection is opened until the first `acquire`.
    pub fn new(manager: M, config: PoolConfig) -> Self {
        let config = PoolConfig {
            max_connections: config.max_connections.max(1),
            ..config
        };

        Self {
            inner: Arc::new(PoolInner {
                manager,
                state: Mutex::new(PoolState {
                    idle: VecDeque::with_capacity(config.max_connections as usize),
                    live: 0,
                    closed: false,
                }),
                config,
                released: Notify::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Check out a connection, waiting with backoff while the pool is full.
    pub async fn acquire(&self) -> Result<PooledConnection<M>, PoolError> {
        let counters = &self.inner.counters;
        counters.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut backoff = self.inner.config.backoff();
        let mut waits = 0u32;

        loop {
            match self.take_slot()? {
                Slot::Idle(conn) => return self.checkout_idle(conn).await,
                Slot::Reserved => return self.checkout_new().await,
                Slot::Full => {
                    if waits >= self.inner.config.max_retries {
                        counters.failed_requests.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!("db_pool_acquire_failures_total").increment(1);
                        tracing::warn!(
                            attempts = waits + 1,
                            max = self.inner.config.max_connections,
                            "Connection pool exhausted"
                        );
                        return Err(PoolError::Exhausted { attempts: waits + 1 });
                    }

                    waits += 1;
                    counters.retry_attempts.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("db_pool_retries_total").increment(1);

                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(self.inner.config.max_backoff);
                    tracing::debug!(
                        attempt = waits,
                        delay_ms = delay.as_millis() as u64,
                        "Pool at capacity, waiting for a release"
                    );
                    let _ = tokio::time::timeout(delay, self.inner.released.notified()).await;
                }
            }
        }
    }

    /// Return a connection to the idle set. Equivalent to dropping the guard.
    pub fn release(&self, conn: PooledConnection<M>) {
        drop(conn);
    }

    /// Point-in-time usage plus cumulative counters.
    pub fn stats(&self) -> PoolStats {
        let (live, idle) = {
            let state = self.inner.state.lock();
            (state.live, state.idle.len() as u32)
        };
        let counters = &self.inner.counters;

        PoolStats::new(
            live.saturating_sub(idle),
            idle,
            self.inner.config.max_connections,
            counters.total_requests.load(Ordering::Relaxed),
            counters.failed_requests.load(Ordering::Relaxed),
            counters.retry_attempts.load(Ordering::Relaxed),
            counters.total_created.load(Ordering::Relaxed),
            counters.liveness_failures.load(Ordering::Relaxed),
        )
    }

    /// Drop idle connections and refuse further checkouts. Connections still
    /// checked out are discarded when their guards drop.
    pub fn close(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.live -= drained.len() as u32;
            drained
        };
        tracing::info!(closed_idle = drained.len(), "Connection pool closed");
        drop(drained);
        self.inner.released.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    fn take_slot(&self) -> Result<Slot<M::Connection>, PoolError> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        if let Some(conn) = state.idle.pop_back() {
            return Ok(Slot::Idle(conn));
        }
        if state.live < self.inner.config.max_connections {
            state.live += 1;
            return Ok(Slot::Reserved);
        }
        Ok(Slot::Full)
    }

    async fn checkout_idle(
        &self,
        mut conn: M::Connection,
    ) -> Result<PooledConnection<M>, PoolError> {
        if !self.inner.config.test_on_acquire {
            return Ok(self.wrap(conn));
        }

        // Dropping this future mid-check drops `conn` and the slot with it.
        let slot = SlotGuard::new(self);

        match self.inner.manager.is_valid(&mut conn).await {
            Ok(()) => {
                slot.disarm();
                Ok(self.wrap(conn))
            }
            Err(e) => {
                self.inner
                    .counters
                    .liveness_failures
                    .fetch_add(1, Ordering::Relaxed);
                metrics::counter!("db_pool_liveness_failures_total").increment(1);
                tracing::warn!(error = %e, "Pooled connection failed liveness probe, replacing");
                drop(conn);

                match self.inner.manager.connect().await {
                    Ok(fresh) => {
                        slot.disarm();
                        self.inner
                            .counters
                            .total_created
                            .fetch_add(1, Ordering::Relaxed);
                        Ok(self.wrap(fresh))
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to replace stale connection");
                        drop(slot);
                        self.inner
                            .counters
                            .failed_requests
                            .fetch_add(1, Ordering::Relaxed);
                        Err(PoolError::Exhausted { attempts: 1 })
                    }
                }
            }
        }
    }

    async fn checkout_new(&self) -> Result<PooledConnection<M>, PoolError> {
        let slot = SlotGuard::new(self);

        match self.inner.manager.connect().await {
            Ok(conn) => {
                slot.disarm();
                let created = self
                    .inner
                    .counters
                    .total_created
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                tracing::debug!(total_created = created, "Opened new pooled connection");
                Ok(self.wrap(conn))
            }
            Err(e) => {
                drop(slot);
                self.inner
                    .counters
                    .failed_requests
                    .fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "Failed to open database connection");
                Err(PoolError::Connect(anyhow::Error::new(e)))
            }
        }
    }

    fn wrap(&self, conn: M::Connection) -> PooledConnection<M> {
        PooledConnection {
            pool: self.clone(),
            conn: Some(conn),
        }
    }

    /// Give up a reserved or checked-out slot without returning a connection.
    fn forfeit_slot(&self) {
        {
            let mut state = self.inner.state.lock();
            state.live = state.live.saturating_sub(1);
        }
        self.inner.released.notify_one();
    }

    fn put_back(&self, conn: M::Connection) {
        let discarded = {
            let mut state = self.inner.state.lock();
            if state.closed {
                state.live = state.live.saturating_sub(1);
                Some(conn)
            } else {
                state.idle.push_back(conn);
                None
            }
        };
        drop(discarded);
        self.inner.released.notify_one();
    }
}

/// A counted slot with no connection handed out yet. Forfeited on drop
/// unless disarmed, so a cancelled `acquire` cannot leak capacity.
struct SlotGuard<'a, M: ManageConnection> {
    pool: &'a Pool<M>,
    armed: bool,
}

impl<'a, M: ManageConnection> SlotGuard<'a, M> {
    fn new(pool: &'a Pool<M>) -> Self {
        Self { pool, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<M: ManageConnection> Drop for SlotGuard<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.forfeit_slot();
        }
    }
}

/// A connection checked out of a [`Pool`]. Returned to the pool on drop.
pub struct PooledConnection<M: ManageConnection> {
    pool: Pool<M>,
    conn: Option<M::Connection>,
}

impl<M: ManageConnection> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        // Only `Drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn);
        }
    }
}
