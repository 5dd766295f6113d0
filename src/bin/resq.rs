//! resq CLI: run workers, enqueue jobs, inspect the store.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use resq_rs::config::{Config, Settings};
use resq_rs::db::{Pool, PoolConfig, RedisConnector, Store};
use resq_rs::engine::{self, QuitSignal};
use resq_rs::handler::HandlerRegistry;
use resq_rs::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "resq", about = "Resque-compatible job workers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process jobs until interrupted
    Work {
        /// TOML settings file; RESQ_* variables are used when omitted
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Push a job onto a queue
    Enqueue {
        /// Queue name
        queue: String,
        /// Handler class
        class: String,
        /// JSON array of arguments
        #[arg(long, default_value = "[]")]
        args: String,
    },
    /// Print counters, queue lengths, and active workers
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Work { config: path } => cmd_work(config, path).await,
        Command::Enqueue { queue, class, args } => cmd_enqueue(&config, queue, class, args).await,
        Command::Stats => cmd_stats(&config).await,
    }
}

async fn cmd_work(config: Config, path: Option<PathBuf>) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::from_config(&config, "resq"))?;

    let settings = match path {
        Some(path) => Settings::from_file(&path)?,
        None => config.settings.clone(),
    };
    let connector = RedisConnector::new(config.redis_url.expose_secret())?;

    let quit = QuitSignal::new();
    tokio::spawn(wait_for_shutdown(quit.clone()));

    engine::run(settings, connector, builtin_handlers(), quit).await?;
    Ok(())
}

async fn cmd_enqueue(
    config: &Config,
    queue: String,
    class: String,
    args: String,
) -> anyhow::Result<()> {
    let args: Value = serde_json::from_str(&args).context("--args must be valid JSON")?;
    let store = client_store(config).await?;
    store.enqueue(&queue, &class, args).await?;
    println!("Enqueued {class} on {queue}");
    Ok(())
}

async fn cmd_stats(config: &Config) -> anyhow::Result<()> {
    let store = client_store(config).await?;
    let summary = store.summary().await?;

    println!("Processed:  {}", summary.processed);
    println!("Failed:     {}", summary.failed);
    println!("---");
    if summary.queues.is_empty() {
        println!("No queues found.");
    } else {
        println!("{:<30}  PENDING", "QUEUE");
        for (queue, len) in &summary.queues {
            println!("{queue:<30}  {len}");
        }
    }
    println!("---");
    println!("{} worker(s) active", summary.workers.len());
    for identity in &summary.workers {
        match store.current_work(identity).await? {
            Some(work) => println!(
                "  {identity}  {} on {} since {}",
                work.payload.class,
                work.queue,
                work.run_at.format("%Y-%m-%d %H:%M:%S")
            ),
            None => println!("  {identity}  idle"),
        }
    }
    Ok(())
}

/// A one-connection store for short-lived client commands.
async fn client_store(config: &Config) -> anyhow::Result<Store> {
    let connector = RedisConnector::new(config.redis_url.expose_secret())?;
    let pool = Pool::connect(
        connector,
        PoolConfig {
            min: 1,
            max: 1,
            ..config.settings.pool
        },
    )
    .await?;
    Ok(Store::new(pool, config.settings.namespace.clone()))
}

/// Handlers the stock binary knows about. Applications embed the library
/// and register their own.
fn builtin_handlers() -> HandlerRegistry {
    HandlerRegistry::empty()
        .register("Echo", |queue: String, args: Vec<Value>| async move {
            tracing::info!(%queue, ?args, "echo");
            anyhow::Ok(())
        })
        .register("Sleep", |_: String, args: Vec<Value>| async move {
            let ms = args
                .first()
                .and_then(Value::as_u64)
                .context("Sleep expects a millisecond count")?;
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            anyhow::Ok(())
        })
}

/// Raise `quit` on Ctrl-C, SIGTERM, or SIGQUIT.
async fn wait_for_shutdown(quit: QuitSignal) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match (signal(SignalKind::terminate()), signal(SignalKind::quit())) {
            (Ok(mut term), Ok(mut sigquit)) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                    _ = sigquit.recv() => {}
                }
            }
            _ => {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.ok();

    tracing::info!("shutdown requested, draining in-flight jobs");
    quit.raise();
}
