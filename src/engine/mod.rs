//! The job engine: poller, workers, per-job lifecycle, and shutdown.
//!
//! [`run`] and [`run_with_pool`] are the entry points; everything else is
//! exposed for callers that want to wire the pieces themselves.

pub mod coordinator;
pub mod poller;
pub mod process;
pub mod stream;
pub mod worker;

pub use coordinator::Coordinator;
pub use poller::Poller;
pub use process::Process;
pub use stream::{JobStream, QuitSignal};
pub use worker::Worker;

use crate::config::Settings;
use crate::db::{Connector, Pool};
use crate::error::Result;
use crate::handler::HandlerRegistry;

/// Connect, process jobs until `quit` is raised (or the queues drain with
/// exit-on-complete), wait for in-flight jobs, and return.
///
/// Configuration and connection errors are returned before any worker starts.
pub async fn run(
    settings: Settings,
    connector: impl Connector,
    registry: HandlerRegistry,
    quit: QuitSignal,
) -> Result<()> {
    Coordinator::new(settings, registry)?
        .run(connector, quit)
        .await
}

/// Like [`run`], but on a pool the caller owns and keeps using afterwards.
pub async fn run_with_pool(
    settings: Settings,
    pool: Pool,
    registry: HandlerRegistry,
    quit: QuitSignal,
) -> Result<()> {
    Coordinator::new(settings, registry)?
        .run_with_pool(pool, quit)
        .await
}
