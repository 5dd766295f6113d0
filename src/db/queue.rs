//! Queue operations: enqueue, pop, and push-back.
//!
//! Payloads are stored as Resque JSON in `queue:<name>` lists, pushed at
//! the tail and popped from the head.

use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::debug;

use super::{Command, Connection, Store};
use crate::error::{Error, Result};
use crate::model::{Job, Payload};
use crate::telemetry::metrics;

/// What a single pop produced.
#[derive(Debug)]
pub enum Popped {
    Job(Job),
    /// The entry could not be decoded as a payload. Already removed from the queue.
    Malformed { queue: String, raw: String, error: String },
}

impl Store {
    /// Push a job onto the tail of `queue`.
    ///
    /// `args` must serialize to a JSON array (a `Vec`, slice, or tuple);
    /// anything else is rejected before touching the store.
    pub async fn enqueue<A>(&self, queue: &str, class: &str, args: A) -> Result<()>
    where
        A: Serialize,
    {
        let payload = build_payload(queue, class, args)?;
        let buffer = serde_json::to_string(&payload)?;

        let mut conn = self.pool().acquire().await?;
        let result = conn
            .pipeline(&[
                Command::SAdd(self.keys().queues(), queue.to_string()),
                Command::RPush(self.keys().queue(queue), buffer),
            ])
            .await;
        if result.as_ref().is_err_and(Error::is_backend) {
            conn.mark_broken();
        }
        result?;

        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new("operation", "enqueue"),
            ],
        );
        debug!(queue, class, "job enqueued");
        Ok(())
    }

    /// Push a payload back onto the head of its queue, ahead of everything else.
    pub async fn requeue(&self, conn: &mut dyn Connection, job: &Job) -> Result<()> {
        let buffer = serde_json::to_string(&job.payload)?;
        conn.pipeline(&[Command::LPush(self.keys().queue(&job.queue), buffer)])
            .await?;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", job.queue.clone()),
                KeyValue::new("operation", "requeue"),
            ],
        );
        Ok(())
    }

    /// Pop the head of `queue`. `None` when the queue is empty.
    pub async fn pop(&self, conn: &mut dyn Connection, queue: &str) -> Result<Option<Popped>> {
        let raw = conn.lpop(&self.keys().queue(queue)).await?;

        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new(
                    "operation",
                    if raw.is_some() { "pop" } else { "pop_empty" },
                ),
            ],
        );

        Ok(raw.map(|bytes| decode(queue, bytes)))
    }
}

fn decode(queue: &str, bytes: Vec<u8>) -> Popped {
    let malformed = |raw: String, error: String| Popped::Malformed {
        queue: queue.to_string(),
        raw,
        error,
    };
    let raw = match String::from_utf8(bytes) {
        Ok(raw) => raw,
        Err(e) => {
            let error = format!("entry is not UTF-8: {e}");
            return malformed(String::from_utf8_lossy(e.as_bytes()).into_owned(), error);
        }
    };
    match serde_json::from_str::<Payload>(&raw) {
        Ok(payload) => Popped::Job(Job::new(queue, payload)),
        Err(e) => malformed(raw, e.to_string()),
    }
}

fn build_payload<A: Serialize>(queue: &str, class: &str, args: A) -> Result<Payload> {
    if queue.is_empty() {
        return Err(Error::InvalidArgs("queue name must not be empty".to_string()));
    }
    if class.is_empty() {
        return Err(Error::InvalidArgs("class name must not be empty".to_string()));
    }
    let args = match serde_json::to_value(args)
        .map_err(|e| Error::InvalidArgs(format!("arguments are not representable: {e}")))?
    {
        serde_json::Value::Array(args) => args,
        serde_json::Value::Null => Vec::new(),
        other => {
            return Err(Error::InvalidArgs(format!(
                "arguments must be a sequence, got {other}"
            )));
        }
    };
    Ok(Payload::new(class, args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tuples_and_vecs_become_positional_args() {
        let payload = build_payload("q", "Mail", (1, "two")).unwrap();
        assert_eq!(payload.args, vec![json!(1), json!("two")]);

        let payload = build_payload("q", "Mail", vec![json!({"id": 3})]).unwrap();
        assert_eq!(payload.args, vec![json!({"id": 3})]);
    }

    #[test]
    fn non_utf8_entries_decode_as_malformed() {
        match decode("q", vec![b'{', 0xff, b'}']) {
            Popped::Malformed { queue, raw, error } => {
                assert_eq!(queue, "q");
                assert_eq!(raw, "{\u{fffd}}");
                assert!(error.contains("not UTF-8"));
            }
            Popped::Job(job) => panic!("decoded {job:?}"),
        }
    }

    #[test]
    fn unit_and_none_mean_no_args() {
        assert!(build_payload("q", "Mail", ()).unwrap().args.is_empty());
        assert!(build_payload("q", "Mail", None::<Vec<i32>>).unwrap().args.is_empty());
    }

    #[test]
    fn scalar_args_are_rejected() {
        let err = build_payload("q", "Mail", 42).unwrap_err();
        assert!(matches!(err, Error::InvalidArgs(_)));
    }

    #[test]
    fn maps_with_non_string_keys_are_rejected() {
        let args = vec![std::collections::HashMap::from([((1, 2), 3)])];
        let err = build_payload("q", "Mail", args).unwrap_err();
        assert!(matches!(err, Error::InvalidArgs(_)));
    }

    #[test]
    fn empty_names_are_rejected() {
        assert!(build_payload("", "Mail", ()).is_err());
        assert!(build_payload("q", "", ()).is_err());
    }
}
