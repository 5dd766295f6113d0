//! Coordinator: one poller, `concurrency` workers, and the drain protocol.
//!
//! Shutdown is driven entirely by stream closure. The poller stops on quit
//! (or when the queues run dry with exit-on-complete), the stream closes,
//! each worker finishes its in-flight job, deregisters, and exits. A
//! handler that never returns therefore blocks shutdown.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info};

use super::poller::Poller;
use super::stream::QuitSignal;
use super::worker::Worker;
use crate::config::Settings;
use crate::db::{Connector, Pool, Store};
use crate::error::Result;
use crate::handler::HandlerRegistry;

pub struct Coordinator {
    settings: Settings,
    registry: Arc<HandlerRegistry>,
}

impl Coordinator {
    /// Validate `settings` up front; nothing is started on error.
    pub fn new(settings: Settings, registry: HandlerRegistry) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            registry: Arc::new(registry),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Build a pool from `connector`, run until drained, then close the pool.
    pub async fn run(&self, connector: impl Connector, quit: QuitSignal) -> Result<()> {
        let pool = Pool::connect(connector, self.settings.pool).await?;
        let result = self.run_with_pool(pool.clone(), quit).await;
        pool.close();
        result
    }

    /// Run against an existing pool. The pool is left open for the caller.
    pub async fn run_with_pool(&self, pool: Pool, quit: QuitSignal) -> Result<()> {
        let store = Store::new(pool, self.settings.namespace.clone());
        let queues = self.settings.queue_names();

        let (poller, jobs) = Poller::new(store.clone(), &self.settings).spawn(quit);

        let mut workers = JoinSet::new();
        for slot in 0..self.settings.concurrency {
            let worker = Worker::new(slot, &queues, store.clone(), Arc::clone(&self.registry));
            workers.spawn(worker.run(jobs.clone()));
        }
        // Workers hold the only receivers now; if they all exit, the poller notices.
        drop(jobs);
        info!(
            concurrency = self.settings.concurrency,
            handlers = self.registry.len(),
            "workers started"
        );

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task ended abnormally");
            }
        }
        if let Err(e) = poller.await {
            error!(error = %e, "poller task ended abnormally");
        }

        info!("all workers drained");
        Ok(())
    }
}
