//! End-to-end tests against a live Redis.
//!
//! Requires a Redis server; point `RESQ_REDIS_URL` at it (defaults to
//! `redis://127.0.0.1:6379/`). Each test uses its own namespace.
//!
//! Run with:
//! ```sh
//! cargo test --test redis_test -- --ignored
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use resq_rs::config::Settings;
use resq_rs::db::{Pool, PoolConfig, RedisConnector, Store};
use resq_rs::engine::{self, QuitSignal};
use resq_rs::handler::HandlerRegistry;
use resq_rs::model::ExceptionKind;
use serde_json::{Value, json};

fn redis_url() -> String {
    std::env::var("RESQ_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string())
}

fn namespace() -> String {
    format!("resq-test-{}:", uuid::Uuid::new_v4())
}

async fn store(namespace: &str) -> Store {
    let connector = RedisConnector::new(&redis_url()).expect("valid redis url");
    let pool = Pool::connect(connector, PoolConfig::default())
        .await
        .expect("redis reachable");
    Store::new(pool, namespace)
}

#[tokio::test]
#[ignore]
async fn enqueue_and_process_round_trip() {
    let namespace = namespace();
    let store = store(&namespace).await;
    store.enqueue("mail", "Deliver", ("bob", 1)).await.unwrap();
    store.enqueue("mail", "Missing", ()).await.unwrap();
    assert_eq!(store.queue_len("mail").await.unwrap(), 2);
    assert_eq!(store.known_queues().await.unwrap(), vec!["mail"]);

    let delivered = Arc::new(AtomicUsize::new(0));
    let registry = {
        let delivered = Arc::clone(&delivered);
        HandlerRegistry::empty().register("Deliver", move |_: String, args: Vec<Value>| {
            let delivered = Arc::clone(&delivered);
            async move {
                anyhow::ensure!(args == vec![json!("bob"), json!(1)], "unexpected args {args:?}");
                delivered.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        })
    };

    let mut settings = Settings::for_queues(["mail"]);
    settings.namespace = namespace.clone();
    settings.exit_on_complete = true;
    settings.concurrency = 2;
    settings.poll_interval = Duration::from_millis(50);

    let connector = RedisConnector::new(&redis_url()).unwrap();
    tokio::time::timeout(
        Duration::from_secs(30),
        engine::run(settings, connector, registry, QuitSignal::new()),
    )
    .await
    .expect("run did not finish")
    .unwrap();

    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    let summary = store.summary().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.queues, vec![("mail".to_string(), 0)]);
    assert!(summary.workers.is_empty());

    let failures = store.failures().await.unwrap();
    assert_eq!(failures[0].exception, ExceptionKind::NoHandlerError);
    assert_eq!(failures[0].payload.class, "Missing");
}

#[tokio::test]
#[ignore]
async fn unreachable_server_fails_at_startup() {
    let connector = RedisConnector::new("redis://127.0.0.1:1/").unwrap();
    let result = Pool::connect(
        connector,
        PoolConfig {
            min: 1,
            max: 1,
            timeout: Duration::from_secs(1),
        },
    )
    .await;
    assert!(matches!(result, Err(e) if e.is_backend()));
}
