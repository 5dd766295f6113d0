//! Worker identity and per-job lifecycle.
//!
//! A [`Process`] moves `Idle -> Started -> {Succeeded | Failed} -> Idle` for
//! every job and mirrors that progress into the store: the active-worker
//! set, the running-work envelope, failure records, and stat counters.
//!
//! Those records are advisory. Writes go out as one pipeline per operation;
//! a failed write is logged and counted, never retried, and never stops a
//! job from being processed.

use std::time::Duration;

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{Span, debug, error, info, warn};

use crate::db::{Command, PooledConnection, Store};
use crate::error::{Error, PoolError, Result};
use crate::model::{FailureRecord, Job, JobError, JobState, WorkEnvelope};
use crate::telemetry::job::record_state_transition;
use crate::telemetry::metrics;

/// Acquire attempts for every lifecycle write except `finish`.
const CONNECTION_ATTEMPTS: u32 = 3;
const CONNECTION_BACKOFF: Duration = Duration::from_millis(100);

pub struct Process {
    identity: String,
    store: Store,
    state: JobState,
}

impl Process {
    /// A process for worker slot `slot`, polling `queues`.
    pub fn new(slot: usize, queues: &[String], store: Store) -> Self {
        Self {
            identity: identity(&host_name(), std::process::id(), slot, queues),
            store,
            state: JobState::Idle,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Join the active-worker set and zero this identity's counters.
    pub async fn open(&self) {
        let Some(mut conn) = self.connection("open", Some(CONNECTION_ATTEMPTS)).await else {
            return;
        };
        let keys = self.store.keys();
        self.write(
            &mut conn,
            "open",
            &[
                Command::SAdd(keys.workers(), self.identity.clone()),
                Command::Set(keys.stat_processed_for(&self.identity), "0".to_string()),
                Command::Set(keys.stat_failed_for(&self.identity), "0".to_string()),
            ],
        )
        .await;
        info!(worker = %self.identity, "worker registered");
    }

    /// Record that `job` is running. Must precede the handler call.
    pub async fn start(&mut self, job: &Job) -> Result<()> {
        self.transition(JobState::Started)?;

        let now = Utc::now();
        let envelope = WorkEnvelope {
            queue: job.queue.clone(),
            run_at: now,
            payload: job.payload.clone(),
        };
        let buffer = serde_json::to_string(&envelope)?;

        if let Some(mut conn) = self.connection("start", Some(CONNECTION_ATTEMPTS)).await {
            let keys = self.store.keys();
            self.write(
                &mut conn,
                "start",
                &[
                    Command::Set(keys.worker(&self.identity), buffer),
                    Command::Set(keys.worker_started(&self.identity), now.to_rfc3339()),
                ],
            )
            .await;
        }
        debug!(queue = %job.queue, class = %job.payload.class, "processing since {now}");
        Ok(())
    }

    /// Append a failure record and bump the failure counters.
    pub async fn fail(
        &mut self,
        conn: Option<&mut PooledConnection>,
        job: &Job,
        err: &JobError,
    ) -> Result<()> {
        self.transition(JobState::Failed)?;

        let record = FailureRecord {
            failed_at: Utc::now(),
            payload: job.payload.clone(),
            exception: err.kind,
            error: err.message.clone(),
            worker: self.identity.clone(),
            queue: job.queue.clone(),
        };
        let buffer = serde_json::to_string(&record)?;

        match conn {
            Some(conn) => {
                let keys = self.store.keys();
                self.write(
                    conn,
                    "fail",
                    &[
                        Command::RPush(keys.failed(), buffer),
                        Command::Incr(keys.stat_failed()),
                        Command::Incr(keys.stat_failed_for(&self.identity)),
                    ],
                )
                .await;
            }
            None => error!(worker = %self.identity, record = %buffer, "failure record not stored"),
        }
        Ok(())
    }

    /// Bump the success counters.
    pub async fn succeed(&mut self, conn: Option<&mut PooledConnection>, job: &Job) -> Result<()> {
        self.transition(JobState::Succeeded)?;

        match conn {
            Some(conn) => {
                let keys = self.store.keys();
                self.write(
                    conn,
                    "succeed",
                    &[
                        Command::Incr(keys.stat_processed()),
                        Command::Incr(keys.stat_processed_for(&self.identity)),
                    ],
                )
                .await;
            }
            None => error!(
                worker = %self.identity,
                queue = %job.queue,
                class = %job.payload.class,
                "success not counted"
            ),
        }
        Ok(())
    }

    /// Settle `job`: record its outcome, clear the running-work envelope,
    /// and return to idle. Called exactly once per dequeued job.
    pub async fn finish(&mut self, job: &Job, outcome: std::result::Result<(), JobError>) -> Result<()> {
        // Accounting depends on this write, so keep trying until the pool closes.
        let mut conn = self.connection("finish", None).await;

        let result = match &outcome {
            Ok(()) => "succeeded",
            Err(_) => "failed",
        };
        match &outcome {
            Ok(()) => self.succeed(conn.as_mut(), job).await?,
            Err(err) => {
                warn!(queue = %job.queue, class = %job.payload.class, error = %err, "job failed");
                self.fail(conn.as_mut(), job, err).await?;
            }
        }

        if let Some(conn) = conn.as_mut() {
            let keys = self.store.keys();
            self.write(
                conn,
                "finish",
                &[
                    Command::Del(keys.worker(&self.identity)),
                    Command::Del(keys.worker_started(&self.identity)),
                ],
            )
            .await;
        }
        self.transition(JobState::Idle)?;

        metrics::jobs_finished().add(
            1,
            &[
                KeyValue::new("queue", job.queue.clone()),
                KeyValue::new("class", job.payload.class.clone()),
                KeyValue::new("result", result),
            ],
        );
        Ok(())
    }

    /// Leave the active-worker set and drop this identity's counters.
    pub async fn close(&self) {
        let Some(mut conn) = self.connection("close", Some(CONNECTION_ATTEMPTS)).await else {
            return;
        };
        let keys = self.store.keys();
        self.write(
            &mut conn,
            "close",
            &[
                Command::SRem(keys.workers(), self.identity.clone()),
                Command::Del(keys.stat_processed_for(&self.identity)),
                Command::Del(keys.stat_failed_for(&self.identity)),
            ],
        )
        .await;
        info!(worker = %self.identity, "worker shut down");
    }

    fn transition(&mut self, to: JobState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }
        record_state_transition(&Span::current(), &self.state.to_string(), &to.to_string());
        self.state = to;
        Ok(())
    }

    /// A connection for a lifecycle write.
    ///
    /// Gives up after `attempts` failed acquires (`None` retries until the
    /// pool closes) and returns `None`.
    async fn connection(&self, op: &'static str, attempts: Option<u32>) -> Option<PooledConnection> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.pool().acquire().await {
                Ok(conn) => return Some(conn),
                Err(Error::Pool(PoolError::Closed)) => {
                    error!(worker = %self.identity, op, "pool closed, lifecycle write dropped");
                    return None;
                }
                Err(e) if attempts.is_some_and(|max| attempt >= max) => {
                    error!(worker = %self.identity, op, error = %e, "giving up on lifecycle write");
                    return None;
                }
                Err(e) => {
                    warn!(worker = %self.identity, op, attempt, error = %e, "no connection for lifecycle write");
                    tokio::time::sleep(CONNECTION_BACKOFF).await;
                }
            }
        }
    }

    async fn write(&self, conn: &mut PooledConnection, op: &'static str, commands: &[Command]) {
        if let Err(e) = conn.pipeline(commands).await {
            if e.is_backend() {
                conn.mark_broken();
            }
            metrics::lifecycle_write_failures().add(1, &[KeyValue::new("operation", op)]);
            warn!(worker = %self.identity, op, error = %e, "lifecycle write failed");
        }
    }
}

impl std::fmt::Display for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.identity)
    }
}

/// `host:pid-slot:queue,queue` with queues sorted.
fn identity(hostname: &str, pid: u32, slot: usize, queues: &[String]) -> String {
    let mut queues = queues.to_vec();
    queues.sort();
    format!("{hostname}:{pid}-{slot}:{}", queues.join(","))
}

/// This machine's name, or `localhost` if the OS will not say.
fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
