//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in secrecy::SecretString so it
//! never ends up in logs.

pub mod secrets;

use crate::engine::reaper::cutoff;
use crate::error::{Error, Result};
use chrono::Utc;
use secrecy::SecretString;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// How long `done` items are kept before the reaper expunges them.
    pub retention: Duration,
    /// How long an item may stay `processing` before the reaper presumes
    /// its worker dead and forces it to `error`.
    pub staleness: Duration,
    /// Pause between reaper sweeps.
    pub sweep_interval: Duration,
    /// Candidates locked per claim attempt.
    pub claim_batch_size: i64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let claim_batch_size = parsed_var("CLAIM_BATCH_SIZE", 10i64)?;
        if claim_batch_size < 1 {
            return Err(Error::Config(format!(
                "CLAIM_BATCH_SIZE must be at least 1, got {claim_batch_size}"
            )));
        }

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            retention: window_var("WORK_RETENTION_SECS", 3600)?,
            staleness: window_var("WORK_STALE_SECS", 600)?,
            sweep_interval: Duration::from_secs(parsed_var("REAPER_INTERVAL_SECS", 300)?),
            claim_batch_size,
        })
    }
}

/// A reaper window in seconds. Must leave a representable cutoff when
/// subtracted from the current time.
fn window_var(name: &str, default: u64) -> Result<Duration> {
    let window = Duration::from_secs(parsed_var(name, default)?);
    cutoff(Utc::now(), window, name)?;
    Ok(window)
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid value for {name} ({raw:?}): {e}"))),
        Err(_) => Ok(default),
    }
}
