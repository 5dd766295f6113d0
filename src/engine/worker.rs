//! Worker: pulls jobs off the shared stream and runs their handlers.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use serde_json::Value;
use tracing::{Instrument, debug, error};

use super::process::Process;
use super::stream::JobStream;
use crate::db::Store;
use crate::handler::{Handler, HandlerRegistry};
use crate::model::{ExceptionKind, Job, JobError};
use crate::telemetry::job::start_job_span;
use crate::telemetry::metrics;

pub struct Worker {
    process: Process,
    registry: Arc<HandlerRegistry>,
}

impl Worker {
    pub fn new(slot: usize, queues: &[String], store: Store, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            process: Process::new(slot, queues, store),
            registry,
        }
    }

    pub fn identity(&self) -> &str {
        self.process.identity()
    }

    /// Register, process jobs until the stream closes, then deregister.
    pub async fn run(mut self, jobs: JobStream) {
        self.process.open().await;

        while let Some(job) = jobs.next().await {
            let span = start_job_span(&job.queue, &job.payload.class, self.process.identity());
            self.process_job(job).instrument(span).await;
        }

        self.process.close().await;
    }

    async fn process_job(&mut self, job: Job) {
        let outcome = match self.registry.get(&job.payload.class) {
            Some(handler) => {
                if let Err(e) = self.process.start(&job).await {
                    error!(worker = %self.process, error = %e, "could not start job");
                }
                let started = Instant::now();
                let outcome = run_guarded(handler, job.queue.clone(), job.payload.args.clone()).await;
                metrics::handler_duration_ms().record(
                    started.elapsed().as_secs_f64() * 1000.0,
                    &[KeyValue::new("class", job.payload.class.clone())],
                );
                outcome
            }
            None => {
                let err = JobError::no_handler(&job);
                error!(worker = %self.process, "{}", err.message);
                metrics::jobs_unhandled()
                    .add(1, &[KeyValue::new("class", job.payload.class.clone())]);
                Err(err)
            }
        };

        if let Err(e) = self.process.finish(&job, outcome).await {
            error!(worker = %self.process, error = %e, "could not finish job");
        }
        debug!(queue = %job.queue, class = %job.payload.class, args = ?job.payload.args, "done");
    }
}

/// Run a handler on its own task so a panic ends that task, not the worker.
///
/// Returned errors and panics both come back as a [`JobError`].
async fn run_guarded(
    handler: Arc<dyn Handler>,
    queue: String,
    args: Vec<Value>,
) -> Result<(), JobError> {
    let task = tokio::spawn(async move { handler.call(queue, args).await });
    match task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(JobError::new(ExceptionKind::Error, format!("{e:#}"))),
        Err(e) if e.is_panic() => Err(JobError::new(
            ExceptionKind::Panic,
            panic_message(e.into_panic()),
        )),
        Err(e) => Err(JobError::new(ExceptionKind::Error, e.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler<F, Fut>(f: F) -> Arc<dyn Handler>
    where
        F: Fn(String, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::handler::HandlerResult> + Send + 'static,
    {
        Arc::new(f)
    }

    #[tokio::test]
    async fn guard_passes_through_success() {
        let h = handler(|_, _| async { anyhow::Ok(()) });
        assert_eq!(run_guarded(h, "q".into(), vec![]).await, Ok(()));
    }

    #[tokio::test]
    async fn guard_reports_returned_errors_with_context() {
        let h = handler(|_, _| async {
            Err::<(), _>(anyhow::anyhow!("disk full").context("writing report"))
        });
        let err = run_guarded(h, "q".into(), vec![]).await.unwrap_err();
        assert_eq!(err.kind, ExceptionKind::Error);
        assert_eq!(err.message, "writing report: disk full");
    }

    #[tokio::test]
    async fn guard_contains_panics() {
        let h = handler(|_, args: Vec<Value>| async move {
            let n = args[0].as_i64().unwrap_or_default();
            if n > 0 {
                panic!("boom {n}");
            }
            anyhow::Ok(())
        });
        let err = run_guarded(h, "q".into(), vec![json!(7)]).await.unwrap_err();
        assert_eq!(err.kind, ExceptionKind::Panic);
        assert_eq!(err.message, "boom 7");
    }

    #[tokio::test]
    async fn guard_contains_panics_before_the_future_is_built() {
        let h = handler(|_, args: Vec<Value>| {
            let first = args[0].clone(); // panics on empty args
            async move {
                let _ = first;
                anyhow::Ok(())
            }
        });
        let err = run_guarded(h, "q".into(), vec![]).await.unwrap_err();
        assert_eq!(err.kind, ExceptionKind::Panic);
    }
}
