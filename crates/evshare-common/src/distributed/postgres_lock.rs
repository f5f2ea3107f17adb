use sqlx::{pool::PoolConnection, PgPool, Postgres};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock is already held by another instance")]
    AlreadyHeld,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A unique key identifying a specific lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey(i64);

impl LockKey {
    pub const fn from_components(high: i32, low: i32) -> Self {
        Self(((high as i64) << 32) | (low as i64 & 0xFFFFFFFF))
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl LockKey {
    /// Held by the instance that completes elapsed bookings.
    pub const BOOKING_COMPLETION_SWEEP: LockKey = LockKey::from_components(0x0E5B, 0x0001);
}

/// A guard that holds a PostgreSQL session-level advisory lock.
///
/// Session locks survive the connection being returned to the pool, so
/// callers should finish with [`AdvisoryLockGuard::release`]. If the guard is
/// dropped instead, the connection is detached from the pool and closed,
/// which releases the lock server-side.
pub struct AdvisoryLockGuard {
    conn: Option<PoolConnection<Postgres>>,
    key: LockKey,
}

impl AdvisoryLockGuard {
    pub fn key(&self) -> LockKey {
        self.key
    }

    /// Release the lock and return the connection to the pool.
    pub async fn release(mut self) -> Result<(), LockError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let released: bool = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(self.key.value())
            .fetch_one(&mut *conn)
            .await?;

        if released {
            info!("Released advisory lock {}", self.key);
        } else {
            warn!(
                "Failed to release advisory lock {} - was not held",
                self.key
            );
        }

        Ok(())
    }
}

impl Drop for AdvisoryLockGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!(
                "Advisory lock {} dropped without release, closing its connection",
                self.key
            );
            drop(conn.detach());
        }
    }
}

/// PostgreSQL advisory lock manager.
///
/// Locks are tied to a database session, so a crashed holder loses the lock
/// as soon as its connection goes away.
#[derive(Clone)]
pub struct AdvisoryLock {
    pool: PgPool,
}

impl AdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Try to acquire a session-level advisory lock without blocking.
    ///
    /// Returns [`LockError::AlreadyHeld`] if another session owns the key.
    pub async fn try_acquire(&self, key: LockKey) -> Result<AdvisoryLockGuard, LockError> {
        let mut conn = self.pool.acquire().await?;

        let acquired: bool = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(key.value())
            .fetch_one(&mut *conn)
            .await?;

        if acquired {
            info!("Acquired advisory lock {}", key);
            Ok(AdvisoryLockGuard {
                conn: Some(conn),
                key,
            })
        } else {
            debug!("Failed to acquire advisory lock {} - already held", key);
            Err(LockError::AlreadyHeld)
        }
    }
}

/// Leader election helper using advisory locks
pub struct LeaderElection {
    lock_manager: AdvisoryLock,
    key: LockKey,
    retry_interval: Duration,
}

impl LeaderElection {
    pub fn new(pool: PgPool, key: LockKey) -> Self {
        Self {
            lock_manager: AdvisoryLock::new(pool),
            key,
            retry_interval: Duration::from_secs(3),
        }
    }

    /// Set the retry interval for failed lock acquisition attempts
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Run `f` whenever this instance holds the lock.
    ///
    /// When `f` returns, leadership is released and re-contested after the
    /// retry interval. Callers stop the loop by dropping the future.
    pub async fn run_as_leader<F, Fut>(&self, f: F) -> !
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>>,
    {
        loop {
            match self.lock_manager.try_acquire(self.key).await {
                Ok(guard) => {
                    info!("Became leader for {}", self.key);

                    if let Err(e) = f().await {
                        warn!("Leader function error: {}", e);
                    }

                    if let Err(e) = guard.release().await {
                        warn!("Error releasing leader lock {}: {}", self.key, e);
                    }
                    info!("Lost leadership for {}", self.key);
                }
                Err(LockError::AlreadyHeld) => {
                    debug!("Waiting for leadership of {}", self.key);
                }
                Err(e) => {
                    warn!("Error acquiring leader lock: {}", e);
                }
            }

            tokio::time::sleep(self.retry_interval).await;
        }
    }
}
