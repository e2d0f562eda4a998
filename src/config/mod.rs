//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The push gateway token is wrapped in secrecy::SecretString
//! to keep it out of logs.

use crate::backend::BackendKind;
use crate::error::{Error, Result};
use crate::push::{DEFAULT_PUSH_TIMEOUT, PushTarget};
use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub catalog_path: PathBuf,
    pub backend: BackendKind,
    pub namespace: Option<String>,
    pub pushgateway_url: Option<String>,
    pub pushgateway_token: Option<SecretString>,
    pub push_job: String,
    pub push_interval: Duration,
    pub push_timeout: Duration,
    pub listen_addr: SocketAddr,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            catalog_path: PathBuf::from(required_var("KPI_CATALOG")?),
            backend: match optional_var("METRICS_BACKEND") {
                Some(name) => name.parse()?,
                None => BackendKind::Prometheus,
            },
            namespace: optional_var("METRICS_NAMESPACE"),
            pushgateway_url: optional_var("PUSHGATEWAY_URL"),
            pushgateway_token: optional_var("PUSHGATEWAY_TOKEN").map(SecretString::from),
            push_job: optional_var("PUSH_JOB").unwrap_or_else(|| "kpi-metrics".to_string()),
            push_interval: seconds_var("PUSH_INTERVAL_SECS", 15)?,
            push_timeout: seconds_var("PUSH_TIMEOUT_SECS", DEFAULT_PUSH_TIMEOUT.as_secs())?,
            listen_addr: parsed_var("LISTEN_ADDR", SocketAddr::from(([127, 0, 0, 1], 9464)))?,
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Periodic push destination, when a gateway is configured.
    pub fn push_target(&self) -> Option<PushTarget> {
        self.pushgateway_url.as_ref().map(|endpoint| PushTarget {
            endpoint: endpoint.clone(),
            job: self.push_job.clone(),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    optional_var(name)
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}

/// Unset and blank are treated the same.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("invalid value for {name} ({raw:?}): {e}"))),
        None => Ok(default),
    }
}

/// A whole number of seconds; zero is rejected.
fn seconds_var(name: &str, default: u64) -> Result<Duration> {
    match parsed_var(name, default)? {
        0 => Err(Error::Config(format!("{name} must be greater than zero"))),
        secs => Ok(Duration::from_secs(secs)),
    }
}
