//! Core data model.
//!
//! A job is one entry popped from a queue: the queue it came from plus a
//! Resque payload (`{"class": ..., "args": [...]}`). Everything else here is
//! advisory state written while a worker processes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// The wire-level job payload, shared with every Resque-compatible producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Handler name. Workers dispatch on this.
    pub class: String,

    /// Positional arguments. Opaque to the engine.
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

impl Payload {
    pub fn new(class: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self {
            class: class.into(),
            args,
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A dequeued job. Immutable; owned by exactly one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub queue: String,
    pub payload: Payload,
}

impl Job {
    pub fn new(queue: impl Into<String>, payload: Payload) -> Self {
        Self {
            queue: queue.into(),
            payload,
        }
    }

    pub fn class(&self) -> &str {
        &self.payload.class
    }

    pub fn args(&self) -> &[serde_json::Value] {
        &self.payload.args
    }
}

// ---------------------------------------------------------------------------
// Lifecycle records
// ---------------------------------------------------------------------------

/// What a worker is doing right now. Stored under `worker:<identity>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkEnvelope {
    pub queue: String,
    pub run_at: DateTime<Utc>,
    pub payload: Payload,
}

/// One failed job. Appended to the `failed` list, never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub failed_at: DateTime<Utc>,
    pub payload: Payload,
    pub exception: ExceptionKind,
    pub error: String,
    pub worker: String,
    pub queue: String,
}

/// The `exception` field of a failure record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExceptionKind {
    /// The handler returned an error.
    Error,
    /// The handler panicked; the panic was contained.
    Panic,
    /// No handler is registered for the payload's class.
    NoHandlerError,
    /// The queue entry was not a valid payload.
    DecodeError,
}

impl std::fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExceptionKind::Error => "Error",
            ExceptionKind::Panic => "Panic",
            ExceptionKind::NoHandlerError => "NoHandlerError",
            ExceptionKind::DecodeError => "DecodeError",
        };
        write!(f, "{s}")
    }
}

/// Why a job did not succeed. Becomes a [`FailureRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobError {
    pub kind: ExceptionKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The error produced when a job's class has no registered handler.
    pub fn no_handler(job: &Job) -> Self {
        Self::new(
            ExceptionKind::NoHandlerError,
            format!(
                "No handler for {} in queue {} with args {}",
                job.payload.class,
                job.queue,
                serde_json::Value::Array(job.payload.args.clone())
            ),
        )
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Per-job lifecycle state of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for the next job.
    Idle,
    /// Work envelope written, handler running.
    Started,
    /// Handler returned successfully.
    Succeeded,
    /// Handler failed, panicked, or was never found.
    Failed,
}

impl JobState {
    /// Can transition from self to `to`?
    ///
    /// `Idle -> Failed` covers jobs finished without a handler ever starting.
    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Idle, Started)
                | (Idle, Failed)
                | (Started, Succeeded)
                | (Started, Failed)
                | (Succeeded, Idle)
                | (Failed, Idle)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Idle => "idle",
            JobState::Started => "started",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_reads_resque_json() {
        let payload: Payload =
            serde_json::from_str(r#"{"class":"Archive","args":[1,"two",{"three":3}]}"#).unwrap();
        assert_eq!(payload.class, "Archive");
        assert_eq!(payload.args, vec![json!(1), json!("two"), json!({"three": 3})]);
    }

    #[test]
    fn payload_without_args_defaults_to_empty() {
        let payload: Payload = serde_json::from_str(r#"{"class":"Ping"}"#).unwrap();
        assert!(payload.args.is_empty());
    }

    #[test]
    fn failure_record_uses_resque_field_names() {
        let record = FailureRecord {
            failed_at: Utc::now(),
            payload: Payload::new("Archive", vec![]),
            exception: ExceptionKind::NoHandlerError,
            error: "nope".to_string(),
            worker: "host:1-0:default".to_string(),
            queue: "default".to_string(),
        };
        let value = serde_json::to_value(&record).unwrap();
        for field in ["failed_at", "payload", "exception", "error", "worker", "queue"] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert_eq!(value["exception"], "NoHandlerError");
    }

    #[test]
    fn state_machine_rejects_skipping_start_on_success() {
        assert!(JobState::Idle.can_transition_to(JobState::Started));
        assert!(JobState::Idle.can_transition_to(JobState::Failed));
        assert!(!JobState::Idle.can_transition_to(JobState::Succeeded));
        assert!(!JobState::Started.can_transition_to(JobState::Idle));
        assert!(JobState::Failed.can_transition_to(JobState::Idle));
    }

    #[test]
    fn no_handler_error_names_class_and_queue() {
        let job = Job::new("mail", Payload::new("NoSuchHandler", vec![json!(7)]));
        let err = JobError::no_handler(&job);
        assert_eq!(err.kind, ExceptionKind::NoHandlerError);
        assert!(err.message.contains("No handler for NoSuchHandler"));
        assert!(err.message.contains("queue mail"));
    }
}
