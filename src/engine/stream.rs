//! Plumbing between the poller and the workers: the quit signal and the
//! single-producer, multi-consumer job stream.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};

use crate::model::Job;

/// Process-wide request to stop dequeuing. Clones observe the same signal.
///
/// Raising it is sticky: once raised it stays raised.
#[derive(Debug, Clone)]
pub struct QuitSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl QuitSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal is raised (immediately if it already is).
    pub async fn raised(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|raised| *raised).await;
    }
}

impl Default for QuitSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a job stream. Capacity 1: the poller pops at most one job ahead
/// of the workers.
pub fn job_stream() -> (JobSender, JobStream) {
    let (tx, rx) = mpsc::channel(1);
    (
        JobSender { tx },
        JobStream {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producer side. Dropping it closes the stream.
pub struct JobSender {
    tx: mpsc::Sender<Job>,
}

impl JobSender {
    /// Wait for room in the stream. Fails once every consumer is gone.
    pub async fn reserve(&self) -> Option<mpsc::Permit<'_, Job>> {
        self.tx.reserve().await.ok()
    }
}

/// Consumer side. Clones share one queue; each job goes to exactly one caller.
#[derive(Clone)]
pub struct JobStream {
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl JobStream {
    /// The next job, or `None` once the producer is gone and the stream is drained.
    pub async fn next(&self) -> Option<Job> {
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Payload;

    #[tokio::test]
    async fn quit_signal_is_sticky_and_shared() {
        let quit = QuitSignal::new();
        let observer = quit.clone();
        assert!(!observer.is_raised());

        let waiter = tokio::spawn(async move { observer.raised().await });
        quit.raise();
        waiter.await.unwrap();

        assert!(quit.is_raised());
        // Already raised: resolves without waiting.
        quit.raised().await;
    }

    #[tokio::test]
    async fn each_job_reaches_exactly_one_consumer() {
        let (tx, stream) = job_stream();
        let a = stream.clone();
        let b = stream.clone();
        drop(stream);

        let producer = tokio::spawn(async move {
            for i in 0..10 {
                let permit = tx.reserve().await.expect("consumers alive");
                permit.send(Job::new("q", Payload::new(format!("C{i}"), vec![])));
            }
        });

        let consume = |s: JobStream| async move {
            let mut seen = Vec::new();
            while let Some(job) = s.next().await {
                seen.push(job.payload.class);
            }
            seen
        };
        let (seen_a, seen_b) = tokio::join!(consume(a), consume(b));
        producer.await.unwrap();

        let mut all: Vec<String> = seen_a.into_iter().chain(seen_b).collect();
        all.sort();
        let mut expected: Vec<String> = (0..10).map(|i| format!("C{i}")).collect();
        expected.sort();
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn reserve_fails_when_consumers_are_gone() {
        let (tx, stream) = job_stream();
        drop(stream);
        assert!(tx.reserve().await.is_none());
    }
}
