//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use resq_rs::config::Settings;
use resq_rs::db::{Command, Connection, Connector, MemoryStore, Pool, PoolConfig, Store};
use resq_rs::error::{Error, Result};

pub const NAMESPACE: &str = "resque:";

/// Settings for a short in-process run over `queues`.
pub fn settings(queues: &[&str]) -> Settings {
    let mut settings = Settings::for_queues(queues.iter().copied());
    settings.poll_interval = Duration::from_millis(10);
    settings.concurrency = 2;
    settings.exit_on_complete = true;
    settings.pool = PoolConfig {
        min: 1,
        max: 4,
        timeout: Duration::from_secs(5),
    };
    settings
}

/// A memory-backed store plus the raw backend for direct inspection.
pub async fn memory_store(config: PoolConfig) -> (MemoryStore, Pool, Store) {
    let backend = MemoryStore::new();
    let pool = Pool::connect(backend.clone(), config)
        .await
        .expect("memory pool");
    let store = Store::new(pool.clone(), NAMESPACE);
    (backend, pool, store)
}

/// Counts connections opened through it.
#[derive(Clone, Default)]
pub struct CountingConnector {
    pub inner: MemoryStore,
    pub opened: Arc<AtomicUsize>,
}

impl CountingConnector {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for CountingConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.connect().await
    }
}

/// Fails the first `failures` pops with a backend error.
#[derive(Clone)]
pub struct FlakyConnector {
    pub inner: MemoryStore,
    pub failures: Arc<AtomicUsize>,
}

impl FlakyConnector {
    pub fn new(inner: MemoryStore, failures: usize) -> Self {
        Self {
            inner,
            failures: Arc::new(AtomicUsize::new(failures)),
        }
    }
}

#[async_trait]
impl Connector for FlakyConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(FlakyConnection {
            inner: self.inner.connect().await?,
            failures: Arc::clone(&self.failures),
        }))
    }
}

struct FlakyConnection {
    inner: Box<dyn Connection>,
    failures: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for FlakyConnection {
    async fn pipeline(&mut self, commands: &[Command]) -> Result<()> {
        self.inner.pipeline(commands).await
    }

    async fn lpop(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::Backend("connection reset by peer".to_string()));
        }
        self.inner.lpop(key).await
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn llen(&mut self, key: &str) -> Result<u64> {
        self.inner.llen(key).await
    }

    async fn lrange(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.inner.lrange(key, start, stop).await
    }

    async fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        self.inner.smembers(key).await
    }
}
