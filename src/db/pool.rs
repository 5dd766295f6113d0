//! Bounded connection pool.
//!
//! At most `max` connections exist at once; a semaphore hands out the right
//! to hold one. Idle connections are reused LIFO and discarded once they have
//! been idle longer than the pool timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, warn};

use super::{Connection, Connector};
use crate::error::{Error, PoolError, Result};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Pool bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections opened eagerly at construction.
    pub min: usize,
    /// Upper bound on live connections.
    pub max: usize,
    /// Acquire timeout, also the idle lifetime of an unused connection.
    pub timeout: Duration,
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max == 0 {
            return Err(Error::Config(
                "max connections must be at least 1".to_string(),
            ));
        }
        if self.min > self.max {
            return Err(Error::Config(format!(
                "min connections ({}) exceeds max connections ({})",
                self.min, self.max
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("pool timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 2,
            max: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

struct Idle {
    conn: Box<dyn Connection>,
    since: Instant,
}

struct PoolInner {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Idle>>,
    closed: AtomicBool,
}

/// Shared handle to the pool. Clones refer to the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Build a pool and open `config.min` connections up front.
    pub async fn connect(connector: impl Connector, config: PoolConfig) -> Result<Self> {
        Self::connect_shared(Arc::new(connector), config).await
    }

    pub async fn connect_shared(connector: Arc<dyn Connector>, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let mut idle = Vec::with_capacity(config.max);
        for _ in 0..config.min {
            idle.push(Idle {
                conn: connector.connect().await?,
                since: Instant::now(),
            });
        }
        debug!(min = config.min, max = config.max, "connection pool ready");

        Ok(Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                permits: Arc::new(Semaphore::new(config.max)),
                idle: Mutex::new(idle),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Wait for a connection, up to the pool timeout.
    ///
    /// Dropping the returned future cancels the wait.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        if self.is_closed() {
            return Err(PoolError::Closed.into());
        }
        let permit = match tokio::time::timeout(
            self.inner.config.timeout,
            Arc::clone(&self.inner.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed.into()),
            Err(_) => {
                metrics::pool_acquire_failures().add(1, &[KeyValue::new("reason", "timeout")]);
                return Err(PoolError::Timeout.into());
            }
        };
        self.checkout(permit).await
    }

    /// Take a connection only if one can be had without waiting.
    pub async fn try_acquire(&self) -> Result<PooledConnection> {
        if self.is_closed() {
            return Err(PoolError::Closed.into());
        }
        let permit = match Arc::clone(&self.inner.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(PoolError::Closed.into()),
            Err(TryAcquireError::NoPermits) => {
                metrics::pool_acquire_failures().add(1, &[KeyValue::new("reason", "exhausted")]);
                return Err(PoolError::Exhausted.into());
            }
        };
        self.checkout(permit).await
    }

    async fn checkout(&self, permit: OwnedSemaphorePermit) -> Result<PooledConnection> {
        let reused = self.take_idle();
        let conn = match reused {
            Some(conn) => conn,
            // The permit is dropped on error, freeing the slot.
            None => self.inner.connector.connect().await?,
        };
        Ok(PooledConnection {
            conn: Some(conn),
            permit: Some(permit),
            pool: Arc::clone(&self.inner),
            broken: false,
        })
    }

    fn take_idle(&self) -> Option<Box<dyn Connection>> {
        let mut idle = lock(&self.inner.idle);
        let timeout = self.inner.config.timeout;
        while let Some(entry) = idle.pop() {
            if entry.since.elapsed() <= timeout {
                return Some(entry.conn);
            }
            debug!("discarding stale idle connection");
        }
        None
    }

    /// Drop every idle connection and refuse further acquires.
    ///
    /// Connections still checked out are discarded when released.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.permits.close();
        let drained = std::mem::take(&mut *lock(&self.inner.idle));
        debug!(connections = drained.len(), "connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn idle_count(&self) -> usize {
        lock(&self.inner.idle).len()
    }

    /// Connections that could be handed out right now without waiting.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    pub fn max_size(&self) -> usize {
        self.inner.config.max
    }

    pub fn config(&self) -> PoolConfig {
        self.inner.config
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A panic while holding the idle list cannot leave it inconsistent.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive handle to one pooled connection. Returned to the pool on drop.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
    broken: bool,
}

impl PooledConnection {
    /// Discard this connection on release instead of reusing it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Return the connection to the pool. Same as dropping the handle.
    pub fn release(self) {}
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        // Only taken in drop.
        self.conn.as_deref().expect("pooled connection used after release")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_deref_mut()
            .expect("pooled connection used after release")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.broken {
            warn!("dropping broken connection");
        } else {
            // Checked under the lock `close` drains with, so nothing lands in a closed pool.
            let mut idle = lock(&self.pool.idle);
            if !self.pool.closed.load(Ordering::SeqCst) {
                idle.push(Idle {
                    conn,
                    since: Instant::now(),
                });
            }
        }
        // Release the slot only after the connection is back in the idle list.
        drop(self.permit.take());
    }
}
