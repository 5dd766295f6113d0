//! Poller: the single producer of the job stream.
//!
//! Each round pops at most one job, checking queues in strict or rotated
//! order. Empty rounds sleep one poll interval. Backend failures are logged
//! and retried; only the quit signal or exit-on-complete end the stream.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::stream::{JobSender, JobStream, QuitSignal, job_stream};
use crate::config::{QueueOrder, Settings};
use crate::db::queue::Popped;
use crate::db::{Command, Store};
use crate::error::Result;
use crate::model::{ExceptionKind, FailureRecord, Job, Payload};

/// Worker name recorded on failures the poller writes itself.
const POLLER_IDENTITY: &str = "poller";

pub struct Poller {
    store: Store,
    /// Distinct queue names in declared order.
    queues: Vec<String>,
    /// Per-queue weights, parallel to `queues`. Used in fair mode.
    weights: Vec<u64>,
    order: QueueOrder,
    interval: Duration,
    exit_on_complete: bool,
    round: usize,
}

impl Poller {
    pub fn new(store: Store, settings: &Settings) -> Self {
        Self {
            store,
            queues: settings.queue_names(),
            weights: settings.queues.iter().map(|q| u64::from(q.weight)).collect(),
            order: settings.order,
            interval: settings.poll_interval,
            exit_on_complete: settings.exit_on_complete,
            round: 0,
        }
    }

    /// Queue check order for round `round`.
    ///
    /// Strict mode always returns the declared order. Fair mode gives each
    /// queue `weight` consecutive rounds as leader per cycle; the rest follow
    /// in declared order, wrapping around.
    pub fn round_order(&self, round: usize) -> Vec<&str> {
        let lead = match self.order {
            QueueOrder::Strict => 0,
            QueueOrder::Fair => self.leader(round as u64),
        };
        self.queues[lead..]
            .iter()
            .chain(&self.queues[..lead])
            .map(String::as_str)
            .collect()
    }

    /// Index of the queue whose weight span contains `round` within the cycle.
    fn leader(&self, round: u64) -> usize {
        let total: u64 = self.weights.iter().sum();
        if total == 0 {
            return 0;
        }
        let mut slot = round % total;
        for (i, weight) in self.weights.iter().enumerate() {
            if slot < *weight {
                return i;
            }
            slot -= weight;
        }
        0
    }

    /// Start polling on its own task. The returned stream closes when polling stops.
    pub fn spawn(self, quit: QuitSignal) -> (JoinHandle<()>, JobStream) {
        let (tx, jobs) = job_stream();
        let handle = tokio::spawn(self.run(tx, quit));
        (handle, jobs)
    }

    async fn run(mut self, tx: JobSender, quit: QuitSignal) {
        info!(queues = ?self.queues, order = ?self.order, "poller started");

        loop {
            if quit.is_raised() {
                info!("quit observed, poller stopping");
                break;
            }

            match self.poll_round().await {
                Ok(Some(job)) => {
                    debug!(queue = %job.queue, class = %job.payload.class, "job dequeued");
                    tokio::select! {
                        biased;
                        permit = tx.reserve() => match permit {
                            Some(permit) => permit.send(job),
                            None => {
                                warn!("no workers left to take jobs, poller stopping");
                                self.push_back(&job).await;
                                break;
                            }
                        },
                        _ = quit.raised() => {
                            info!(queue = %job.queue, "quit while handing off job, pushing it back");
                            self.push_back(&job).await;
                            break;
                        }
                    }
                }
                Ok(None) => {
                    if self.exit_on_complete {
                        info!("all queues empty, poller exiting");
                        break;
                    }
                    debug!(interval = ?self.interval, "all queues empty, sleeping");
                    if self.sleep_or_quit(&quit).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "poll round failed, retrying next round");
                    if self.sleep_or_quit(&quit).await {
                        break;
                    }
                }
            }
        }

        // Dropping `tx` here closes the stream.
        info!("poller stopped");
    }

    /// One round: pop from the first non-empty queue in this round's order.
    async fn poll_round(&mut self) -> Result<Option<Job>> {
        let round = self.round;
        self.round = self.round.wrapping_add(1);
        let order: Vec<String> = self
            .round_order(round)
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut conn = self.store.pool().acquire().await?;
        for queue in &order {
            loop {
                let popped = match self.store.pop(&mut *conn, queue).await {
                    Ok(popped) => popped,
                    Err(e) => {
                        if e.is_backend() {
                            conn.mark_broken();
                        }
                        return Err(e);
                    }
                };
                match popped {
                    Some(Popped::Job(job)) => return Ok(Some(job)),
                    // Bad entry recorded; try the same queue again.
                    Some(Popped::Malformed { queue, raw, error }) => {
                        self.record_malformed(&mut *conn, queue, raw, error).await;
                    }
                    None => break,
                }
            }
        }
        Ok(None)
    }

    async fn record_malformed(
        &self,
        conn: &mut dyn crate::db::Connection,
        queue: String,
        raw: String,
        error: String,
    ) {
        error!(%queue, %error, "undecodable queue entry moved to failed list");
        let record = FailureRecord {
            failed_at: Utc::now(),
            payload: Payload::new("<undecodable>", vec![Value::String(raw)]),
            exception: ExceptionKind::DecodeError,
            error,
            worker: POLLER_IDENTITY.to_string(),
            queue,
        };
        let buffer = match serde_json::to_string(&record) {
            Ok(buffer) => buffer,
            Err(e) => {
                error!(error = %e, "cannot encode failure record");
                return;
            }
        };
        let keys = self.store.keys();
        if let Err(e) = conn
            .pipeline(&[
                Command::RPush(keys.failed(), buffer),
                Command::Incr(keys.stat_failed()),
            ])
            .await
        {
            warn!(error = %e, "failed to record undecodable entry");
        }
    }

    async fn push_back(&self, job: &Job) {
        let result = match self.store.pool().acquire().await {
            Ok(mut conn) => self.store.requeue(&mut *conn, job).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!(queue = %job.queue, class = %job.payload.class, error = %e, "job lost: could not push it back");
        }
    }

    /// Sleep one interval. Returns true if quit was raised meanwhile.
    async fn sleep_or_quit(&self, quit: &QuitSignal) -> bool {
        tokio::select! {
            _ = quit.raised() => true,
            _ = tokio::time::sleep(self.interval) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueSpec;
    use crate::db::{MemoryStore, Pool, PoolConfig};

    async fn poller(queues: Vec<QueueSpec>, order: QueueOrder) -> Poller {
        let pool = Pool::connect(MemoryStore::new(), PoolConfig::default())
            .await
            .unwrap();
        let settings = Settings {
            queues,
            order,
            ..Settings::default()
        };
        Poller::new(Store::new(pool, "test:"), &settings)
    }

    #[tokio::test]
    async fn strict_order_never_changes() {
        let p = poller(
            vec![QueueSpec::new("a"), QueueSpec::new("b"), QueueSpec::new("c")],
            QueueOrder::Strict,
        )
        .await;
        for round in 0..5 {
            assert_eq!(p.round_order(round), vec!["a", "b", "c"]);
        }
    }

    #[tokio::test]
    async fn fair_order_rotates_the_leading_queue() {
        let p = poller(
            vec![QueueSpec::new("a"), QueueSpec::new("b"), QueueSpec::new("c")],
            QueueOrder::Fair,
        )
        .await;
        assert_eq!(p.round_order(0), vec!["a", "b", "c"]);
        assert_eq!(p.round_order(1), vec!["b", "c", "a"]);
        assert_eq!(p.round_order(2), vec!["c", "a", "b"]);
        assert_eq!(p.round_order(3), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn weights_lead_proportionally_in_fair_mode() {
        let p = poller(
            vec![QueueSpec::weighted("high", 2), QueueSpec::new("low")],
            QueueOrder::Fair,
        )
        .await;
        let leaders: Vec<&str> = (0..3).map(|r| p.round_order(r)[0]).collect();
        assert_eq!(leaders, vec!["high", "high", "low"]);
        assert_eq!(p.round_order(2), vec!["low", "high"]);
    }

    #[tokio::test]
    async fn huge_weights_cost_nothing_per_round() {
        let p = poller(
            vec![QueueSpec::weighted("a", u32::MAX), QueueSpec::new("b")],
            QueueOrder::Fair,
        )
        .await;
        assert_eq!(p.round_order(0), vec!["a", "b"]);
        assert_eq!(p.round_order(u32::MAX as usize), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn weights_are_ignored_in_strict_mode() {
        let p = poller(
            vec![QueueSpec::new("low"), QueueSpec::weighted("high", 5)],
            QueueOrder::Strict,
        )
        .await;
        assert_eq!(p.round_order(3), vec!["low", "high"]);
    }
}
