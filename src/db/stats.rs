//! Read-only inspection of counters, queues, failures, and active workers.

use super::Store;
use crate::error::{Error, Result};
use crate::model::{FailureRecord, WorkEnvelope};

/// Point-in-time summary, as printed by `resq stats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub processed: u64,
    pub failed: u64,
    pub queues: Vec<(String, u64)>,
    pub workers: Vec<String>,
}

impl Store {
    /// Global success counter.
    pub async fn processed(&self) -> Result<u64> {
        self.counter(&self.keys().stat_processed()).await
    }

    /// Success counter for one worker identity.
    pub async fn processed_by(&self, identity: &str) -> Result<u64> {
        self.counter(&self.keys().stat_processed_for(identity)).await
    }

    /// Global failure counter.
    pub async fn failed_count(&self) -> Result<u64> {
        self.counter(&self.keys().stat_failed()).await
    }

    pub async fn failed_by(&self, identity: &str) -> Result<u64> {
        self.counter(&self.keys().stat_failed_for(identity)).await
    }

    pub async fn queue_len(&self, queue: &str) -> Result<u64> {
        let mut conn = self.pool().acquire().await?;
        conn.llen(&self.keys().queue(queue)).await
    }

    /// Queue names producers have announced via `enqueue`.
    pub async fn known_queues(&self) -> Result<Vec<String>> {
        let mut conn = self.pool().acquire().await?;
        conn.smembers(&self.keys().queues()).await
    }

    /// Every failure record, oldest first.
    pub async fn failures(&self) -> Result<Vec<FailureRecord>> {
        let mut conn = self.pool().acquire().await?;
        let raw = conn.lrange(&self.keys().failed(), 0, -1).await?;
        raw.iter()
            .map(|entry| serde_json::from_str(entry).map_err(Error::from))
            .collect()
    }

    /// Identities currently registered in the active set.
    pub async fn active_workers(&self) -> Result<Vec<String>> {
        let mut conn = self.pool().acquire().await?;
        conn.smembers(&self.keys().workers()).await
    }

    /// The job `identity` is working on, if any.
    pub async fn current_work(&self, identity: &str) -> Result<Option<WorkEnvelope>> {
        let mut conn = self.pool().acquire().await?;
        let raw = conn.get(&self.keys().worker(identity)).await?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(Error::from))
            .transpose()
    }

    pub async fn summary(&self) -> Result<Summary> {
        let mut queues = Vec::new();
        for queue in self.known_queues().await? {
            let len = self.queue_len(&queue).await?;
            queues.push((queue, len));
        }
        Ok(Summary {
            processed: self.processed().await?,
            failed: self.failed_count().await?,
            queues,
            workers: self.active_workers().await?,
        })
    }

    async fn counter(&self, key: &str) -> Result<u64> {
        let mut conn = self.pool().acquire().await?;
        match conn.get(key).await? {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::Backend(format!("counter {key} holds {raw:?}"))),
            None => Ok(0),
        }
    }
}
