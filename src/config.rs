//! Exporter configuration from environment variables
//!
//! | Variable | Default |
//! |---|---|
//! | `SEASTAT_JOLOKIA_URL` | `http://localhost:8778` |
//! | `SEASTAT_PORT` | `8080` |
//! | `SEASTAT_SCRAPE_INTERVAL_SECS` | `30` |
//! | `SEASTAT_JOLOKIA_TIMEOUT_SECS` | `5` |
//! | `SEASTAT_SHUTDOWN_GRACE_SECS` | `10` |
//! | `SEASTAT_DRAIN_TIMEOUT_SECS` | `5` |

use std::time::Duration;
use thiserror::Error;

use crate::jolokia;
use crate::scraper::DEFAULT_SCRAPE_INTERVAL;
use crate::server::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_SHUTDOWN_GRACE};

/// Default Jolokia agent address
pub const DEFAULT_JOLOKIA_URL: &str = "http://localhost:8778";

/// Default port for the HTTP endpoints
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub jolokia_url: String,
    pub port: u16,
    pub scrape_interval: Duration,
    pub jolokia_timeout: Duration,
    pub shutdown_grace: Duration,
    pub drain_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jolokia_url: DEFAULT_JOLOKIA_URL.to_string(),
            port: DEFAULT_PORT,
            scrape_interval: DEFAULT_SCRAPE_INTERVAL,
            jolokia_timeout: jolokia::DEFAULT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl Config {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup
    ///
    /// Unset keys fall back to their defaults; set keys must parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let jolokia_url = lookup("SEASTAT_JOLOKIA_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.jolokia_url);

        let port = match lookup("SEASTAT_PORT") {
            Some(v) => parse_number::<u16>("SEASTAT_PORT", &v)?,
            None => defaults.port,
        };

        Ok(Self {
            jolokia_url,
            port,
            scrape_interval: seconds(
                &lookup,
                "SEASTAT_SCRAPE_INTERVAL_SECS",
                defaults.scrape_interval,
                false,
            )?,
            jolokia_timeout: seconds(
                &lookup,
                "SEASTAT_JOLOKIA_TIMEOUT_SECS",
                defaults.jolokia_timeout,
                false,
            )?,
            shutdown_grace: seconds(
                &lookup,
                "SEASTAT_SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace,
                true,
            )?,
            drain_timeout: seconds(
                &lookup,
                "SEASTAT_DRAIN_TIMEOUT_SECS",
                defaults.drain_timeout,
                true,
            )?,
        })
    }
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn seconds<F>(
    lookup: &F,
    key: &'static str,
    default: Duration,
    allow_zero: bool,
) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    let secs = parse_number::<u64>(key, &value)?;
    if secs == 0 && !allow_zero {
        return Err(ConfigError::Invalid {
            key,
            value,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
