//! # resq-rs
//!
//! Resque-compatible background job engine.
//!
//! A single poller pops JSON payloads from namespaced Redis lists and hands
//! them, one at a time, to a fixed set of async workers. Each worker looks up
//! a handler by the payload's `class`, runs it behind a panic boundary, and
//! records the outcome (success counters, failure records, active-worker
//! registration) in the same layout Resque uses, so existing Resque tooling
//! can inspect a running system.
//!
//! ```no_run
//! use resq_rs::config::Settings;
//! use resq_rs::db::RedisConnector;
//! use resq_rs::engine::{self, QuitSignal};
//! use resq_rs::handler::HandlerRegistry;
//!
//! # async fn demo() -> resq_rs::error::Result<()> {
//! let registry = HandlerRegistry::empty().register("Mailer", |_queue: String, args: Vec<serde_json::Value>| async move {
//!     tracing::info!(?args, "sending mail");
//!     anyhow::Ok(())
//! });
//! let connector = RedisConnector::new("redis://127.0.0.1/")?;
//! engine::run(Settings::for_queues(["mail"]), connector, registry, QuitSignal::new()).await
//! # }
//! ```

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handler;
pub mod model;
pub mod telemetry;
