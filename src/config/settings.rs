//! Run settings: which queues to poll, how, and with how many workers.
//!
//! Settings come from `RESQ_*` environment variables or a TOML file and are
//! validated once before anything connects.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::parsed_var;
use crate::db::{DEFAULT_NAMESPACE, PoolConfig};
use crate::error::{Error, Result};

/// How the poller orders queues within one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOrder {
    /// Declared order, every round.
    #[default]
    Strict,
    /// Rotate the starting queue each round so later queues are not starved.
    Fair,
}

impl std::str::FromStr for QueueOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "strict" => Ok(QueueOrder::Strict),
            "fair" => Ok(QueueOrder::Fair),
            other => Err(format!("unknown queue order {other:?} (expected strict or fair)")),
        }
    }
}

/// Largest accepted queue weight.
pub const MAX_QUEUE_WEIGHT: u32 = 1000;

/// One queue and its weight in fair rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub weight: u32,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight: 1,
        }
    }

    pub fn weighted(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

impl std::str::FromStr for QueueSpec {
    type Err = Error;

    /// `name` or `name=weight`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.split_once('=') {
            Some((name, weight)) => {
                let weight = weight.trim().parse::<u32>().map_err(|e| {
                    Error::Config(format!("queue {name:?} has invalid weight {weight:?}: {e}"))
                })?;
                Ok(QueueSpec::weighted(name.trim(), weight))
            }
            None => Ok(QueueSpec::new(s)),
        }
    }
}

/// Parse a comma-separated queue list such as `high=3,default,low`.
pub fn parse_queues(list: &str) -> Result<Vec<QueueSpec>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse::<QueueSpec>)
        .collect()
}

/// Everything a run needs besides the backend and the handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub queues: Vec<QueueSpec>,
    pub order: QueueOrder,
    pub pool: PoolConfig,
    pub poll_interval: Duration,
    pub exit_on_complete: bool,
    pub concurrency: usize,
    pub namespace: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            queues: Vec::new(),
            order: QueueOrder::Strict,
            pool: PoolConfig::default(),
            poll_interval: Duration::from_secs(5),
            exit_on_complete: false,
            concurrency: 25,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl Settings {
    /// Settings for the given queues, everything else at defaults.
    pub fn for_queues<I, S>(queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queues: queues.into_iter().map(QueueSpec::new).collect(),
            ..Self::default()
        }
    }

    /// Overlay `RESQ_*` environment variables onto the defaults.
    ///
    /// `RESQ_CONNECTIONS` sets both pool bounds; `RESQ_MIN_CONNECTIONS` and
    /// `RESQ_MAX_CONNECTIONS` override each side.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Some(list) = parsed_var::<String>("RESQ_QUEUES")? {
            settings.queues = parse_queues(&list)?;
        }
        if let Some(order) = parsed_var("RESQ_ORDER")? {
            settings.order = order;
        }
        if let Some(ms) = parsed_var::<u64>("RESQ_INTERVAL_MS")? {
            settings.poll_interval = Duration::from_millis(ms);
        }
        if let Some(flag) = parsed_var("RESQ_EXIT_ON_COMPLETE")? {
            settings.exit_on_complete = flag;
        }
        if let Some(n) = parsed_var("RESQ_CONCURRENCY")? {
            settings.concurrency = n;
        }
        if let Some(n) = parsed_var::<usize>("RESQ_CONNECTIONS")? {
            settings.pool.min = n;
            settings.pool.max = n;
        }
        if let Some(n) = parsed_var("RESQ_MIN_CONNECTIONS")? {
            settings.pool.min = n;
        }
        if let Some(n) = parsed_var("RESQ_MAX_CONNECTIONS")? {
            settings.pool.max = n;
        }
        if let Some(ms) = parsed_var::<u64>("RESQ_POOL_TIMEOUT_MS")? {
            settings.pool.timeout = Duration::from_millis(ms);
        }
        if let Ok(namespace) = std::env::var("RESQ_NAMESPACE") {
            settings.namespace = namespace;
        }

        Ok(settings)
    }

    /// Parse settings from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: SettingsFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("bad settings file: {e}")))?;
        file.into_settings()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read settings file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject settings no run could start with.
    pub fn validate(&self) -> Result<()> {
        if self.queues.is_empty() {
            return Err(Error::Config(
                "at least one queue must be specified".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for queue in &self.queues {
            if queue.name.is_empty() {
                return Err(Error::Config("queue names must not be empty".to_string()));
            }
            if queue.name.contains([',', '=']) || queue.name.contains(char::is_whitespace) {
                return Err(Error::Config(format!(
                    "queue name {:?} contains a separator or whitespace",
                    queue.name
                )));
            }
            if queue.weight == 0 || queue.weight > MAX_QUEUE_WEIGHT {
                return Err(Error::Config(format!(
                    "queue {:?} has weight {}, expected 1..={MAX_QUEUE_WEIGHT}",
                    queue.name, queue.weight
                )));
            }
            if !seen.insert(queue.name.as_str()) {
                return Err(Error::Config(format!(
                    "queue {:?} is listed more than once",
                    queue.name
                )));
            }
        }
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be non-zero".to_string()));
        }
        self.pool.validate()
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|q| q.name.clone()).collect()
    }
}

/// On-disk shape of the settings file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    queues: Vec<String>,
    order: Option<QueueOrder>,
    interval_ms: Option<u64>,
    exit_on_complete: Option<bool>,
    concurrency: Option<usize>,
    min_connections: Option<usize>,
    max_connections: Option<usize>,
    pool_timeout_ms: Option<u64>,
    namespace: Option<String>,
}

impl SettingsFile {
    fn into_settings(self) -> Result<Settings> {
        let defaults = Settings::default();
        let queues = self
            .queues
            .iter()
            .map(|entry| entry.parse())
            .collect::<Result<Vec<QueueSpec>>>()?;

        Ok(Settings {
            queues,
            order: self.order.unwrap_or(defaults.order),
            pool: PoolConfig {
                min: self.min_connections.unwrap_or(defaults.pool.min),
                max: self.max_connections.unwrap_or(defaults.pool.max),
                timeout: self
                    .pool_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.pool.timeout),
            },
            poll_interval: self
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            exit_on_complete: self.exit_on_complete.unwrap_or(defaults.exit_on_complete),
            concurrency: self.concurrency.unwrap_or(defaults.concurrency),
            namespace: self.namespace.unwrap_or(defaults.namespace),
        })
    }
}
