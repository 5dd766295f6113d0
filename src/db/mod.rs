//! Backend store: connection traits, key layout, and the shared [`Store`] handle.
//!
//! Everything above this module talks to the store through a pooled
//! [`Connection`]. Two backends ship: Redis for production and an
//! in-process memory store for tests and embedded use.

pub mod memory;
pub mod pool;
pub mod queue;
pub mod redis;
pub mod stats;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryStore;
pub use self::pool::{Pool, PoolConfig, PooledConnection};
pub use self::redis::RedisConnector;

/// Default key prefix, shared with Resque.
pub const DEFAULT_NAMESPACE: &str = "resque:";

/// A write sent as part of a pipeline. Replies are not inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set(String, String),
    Del(String),
    SAdd(String, String),
    SRem(String, String),
    Incr(String),
    RPush(String, String),
    LPush(String, String),
}

/// One live connection to the store. Owned exclusively by whoever holds it.
#[async_trait]
pub trait Connection: Send {
    /// Send a batch of writes in one round trip.
    async fn pipeline(&mut self, commands: &[Command]) -> Result<()>;

    /// Pop the head of a list. Bytes are returned as stored, UTF-8 or not.
    async fn lpop(&mut self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn get(&mut self, key: &str) -> Result<Option<String>>;

    async fn llen(&mut self, key: &str) -> Result<u64>;

    /// Inclusive range, negative indices count from the tail.
    async fn lrange(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    async fn smembers(&mut self, key: &str) -> Result<Vec<String>>;
}

/// Opens new connections for the pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

/// Namespaced key layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    namespace: String,
}

impl Keys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn queue(&self, name: &str) -> String {
        format!("{}queue:{name}", self.namespace)
    }

    pub fn queues(&self) -> String {
        format!("{}queues", self.namespace)
    }

    pub fn worker(&self, identity: &str) -> String {
        format!("{}worker:{identity}", self.namespace)
    }

    pub fn worker_started(&self, identity: &str) -> String {
        format!("{}worker:{identity}:started", self.namespace)
    }

    pub fn workers(&self) -> String {
        format!("{}workers", self.namespace)
    }

    pub fn failed(&self) -> String {
        format!("{}failed", self.namespace)
    }

    pub fn stat_processed(&self) -> String {
        format!("{}stat:processed", self.namespace)
    }

    pub fn stat_processed_for(&self, identity: &str) -> String {
        format!("{}stat:processed:{identity}", self.namespace)
    }

    pub fn stat_failed(&self) -> String {
        format!("{}stat:failed", self.namespace)
    }

    pub fn stat_failed_for(&self, identity: &str) -> String {
        format!("{}stat:failed:{identity}", self.namespace)
    }
}

impl Default for Keys {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

/// Store handle. Owns the connection pool shared across all components.
///
/// Cheap to clone; handlers capture a clone to enqueue follow-up jobs.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
    keys: Keys,
}

impl Store {
    pub fn new(pool: Pool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            keys: Keys::new(namespace),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed_with_namespace() {
        let keys = Keys::new("app:");
        assert_eq!(keys.queue("mail"), "app:queue:mail");
        assert_eq!(keys.worker("h:1-0:mail"), "app:worker:h:1-0:mail");
        assert_eq!(keys.worker_started("h:1-0:mail"), "app:worker:h:1-0:mail:started");
        assert_eq!(keys.workers(), "app:workers");
        assert_eq!(keys.failed(), "app:failed");
        assert_eq!(keys.stat_processed(), "app:stat:processed");
        assert_eq!(keys.stat_failed_for("w"), "app:stat:failed:w");
    }

    #[test]
    fn default_namespace_matches_resque() {
        assert_eq!(Keys::default().queues(), "resque:queues");
    }
}
