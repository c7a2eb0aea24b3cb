//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::sweeper::SweepConfig;
use crate::tasks::RetryPolicy;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not valid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Absent: in-memory stores (dev/tests).
    pub database_url: Option<String>,
    pub vendor_base_url: String,
    pub vendor_api_key: String,
    pub vendor_timeout: Duration,
    pub analysis_url: String,
    /// When set, webhook deliveries must carry a valid `X-Callback-Signature`.
    pub callback_secret: Option<String>,
    /// When absent, `POST /internal/sweep` is disabled.
    pub sweep_token: Option<String>,
    pub sweep_interval: Duration,
    pub sweep_batch_limit: usize,
    pub sweep_max_concurrency: usize,
    pub stale_after: chrono::Duration,
    pub projection_source_type: String,
    pub analysis_max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            vendor_base_url: "http://localhost:9000".to_string(),
            vendor_api_key: String::new(),
            vendor_timeout: Duration::from_secs(30),
            analysis_url: "http://localhost:9100/analyze".to_string(),
            callback_secret: None,
            sweep_token: None,
            sweep_interval: Duration::from_secs(300),
            sweep_batch_limit: 100,
            sweep_max_concurrency: 8,
            stale_after: chrono::Duration::minutes(30),
            projection_source_type: "meetingbaas".to_string(),
            analysis_max_attempts: 5,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset or blank values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let vendor_base_url = get("VENDOR_BASE_URL").unwrap_or_else(|| {
            warn!(default = %defaults.vendor_base_url, "VENDOR_BASE_URL not set; using dev default");
            defaults.vendor_base_url.clone()
        });
        let vendor_api_key = get("VENDOR_API_KEY").unwrap_or_else(|| {
            warn!("VENDOR_API_KEY not set; vendor requests are unauthenticated");
            String::new()
        });
        let analysis_url = get("ANALYSIS_URL").unwrap_or_else(|| {
            warn!(default = %defaults.analysis_url, "ANALYSIS_URL not set; using dev default");
            defaults.analysis_url.clone()
        });

        Ok(Self {
            bind_addr: parse(&get, "BIND_ADDR", defaults.bind_addr)?,
            database_url: get("DATABASE_URL"),
            vendor_base_url,
            vendor_api_key,
            vendor_timeout: Duration::from_secs(parse(&get, "VENDOR_TIMEOUT_SECS", 30u64)?),
            analysis_url,
            callback_secret: get("CALLBACK_SECRET"),
            sweep_token: get("SWEEP_TOKEN"),
            sweep_interval: Duration::from_secs(positive(&get, "SWEEP_INTERVAL_SECS", 300u64)?),
            sweep_batch_limit: positive(&get, "SWEEP_BATCH_LIMIT", defaults.sweep_batch_limit)?,
            sweep_max_concurrency: positive(&get, "SWEEP_MAX_CONCURRENCY", defaults.sweep_max_concurrency)?,
            stale_after: chrono::Duration::minutes(positive(&get, "STALE_AFTER_MINUTES", 30i64)?),
            projection_source_type: get("PROJECTION_SOURCE_TYPE").unwrap_or(defaults.projection_source_type),
            analysis_max_attempts: positive(&get, "ANALYSIS_MAX_ATTEMPTS", defaults.analysis_max_attempts)?,
        })
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            batch_limit: self.sweep_batch_limit,
            max_concurrency: self.sweep_max_concurrency,
            stale_after: self.stale_after,
        }
    }

    pub fn analysis_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.analysis_max_attempts,
            ..RetryPolicy::default()
        }
    }
}

fn parse<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: format!("`{raw}`: {e}"),
        }),
        None => Ok(default),
    }
}

fn positive<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    let value = parse(get, name, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
