//! Handler registry.
//!
//! Maps a payload's `class` to the async function that executes it. Built
//! once before a run and shared read-only by every worker.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

/// What a handler returns. Any error becomes a failure record.
pub type HandlerResult = anyhow::Result<()>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// Executes jobs of one class. Receives the queue name and the job's args.
///
/// Implemented for every `Fn(String, Vec<Value>) -> impl Future<Output = HandlerResult>`,
/// so plain async closures register directly.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, queue: String, args: Vec<Value>) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(String, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, queue: String, args: Vec<Value>) -> HandlerFuture {
        Box::pin(self(queue, args))
    }
}

/// Registry of handlers, indexed by class name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry with no handlers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register `handler` for `class`, replacing any earlier one.
    pub fn register(mut self, class: impl Into<String>, handler: impl Handler) -> Self {
        self.insert(class, handler);
        self
    }

    pub fn insert(&mut self, class: impl Into<String>, handler: impl Handler) {
        let class = class.into();
        if self.handlers.insert(class.clone(), Arc::new(handler)).is_some() {
            tracing::warn!(%class, "handler replaced");
        }
    }

    /// Look up a handler by class name.
    pub fn get(&self, class: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(class).cloned()
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut classes: Vec<&str> = self.classes().collect();
        classes.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("classes", &classes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closures_register_and_dispatch() {
        let registry = HandlerRegistry::empty().register(
            "Echo",
            |queue: String, args: Vec<Value>| async move {
                anyhow::ensure!(queue == "q", "wrong queue {queue}");
                anyhow::ensure!(args.len() == 1, "expected one arg");
                anyhow::Ok(())
            },
        );

        let handler = registry.get("Echo").expect("registered");
        assert!(handler.call("q".into(), vec![Value::Null]).await.is_ok());
        assert!(handler.call("other".into(), vec![Value::Null]).await.is_err());
        assert!(registry.get("Missing").is_none());
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let registry = HandlerRegistry::empty()
            .register("A", |_: String, _: Vec<Value>| async { anyhow::Ok(()) })
            .register("A", |_: String, _: Vec<Value>| async {
                Err::<(), _>(anyhow::anyhow!("second"))
            });
        assert_eq!(registry.len(), 1);
    }
}
