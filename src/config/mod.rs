//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The Redis URL may embed a password, so it is wrapped in
//! `secrecy::SecretString` to keep it out of logs.

pub mod settings;

pub use settings::{QueueOrder, QueueSpec, Settings};

use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub redis_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub settings: Settings,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    /// Worker settings come from `RESQ_*` vars; see [`Settings::from_env`].
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            redis_url: SecretString::from(required_var("RESQ_REDIS_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            settings: Settings::from_env()?,
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Read and parse an optional variable. Unset means `None`; unparseable is an error.
pub(crate) fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(None),
    }
}
