//! Matrix worker configuration from environment variables

use crate::aggregate::{MAX_TREND_INTERVALS, MAX_TREND_INTERVAL_HOURS};
use crate::types::{Server, SourceCategory};
use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Configuration for the matrix worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Master enable flag; a disabled worker exits right away
    pub enabled: bool,

    /// Seconds between drop/pattern matrix passes
    pub interval_secs: u64,

    /// Seconds between trend passes
    pub trend_interval_secs: u64,

    /// Pause between two (server, category) passes
    pub separation_ms: u64,

    pub trend_interval_hours: i64,
    pub trend_interval_num: usize,

    pub servers: Vec<Server>,
    pub source_categories: Vec<SourceCategory>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            db_path: "data/dropstats.db".to_string(),
            enabled: true,
            interval_secs: 600,
            trend_interval_secs: 21_600,
            separation_ms: 3_000,
            trend_interval_hours: 24,
            trend_interval_num: 60,
            servers: Server::all().to_vec(),
            source_categories: vec![SourceCategory::All],
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `DROPSTATS_DB_PATH` (default: data/dropstats.db)
    /// - `WORKER_ENABLED` (default: true)
    /// - `WORKER_INTERVAL_SECS` (default: 600)
    /// - `WORKER_TREND_INTERVAL_SECS` (default: 21600)
    /// - `WORKER_SEPARATION_MS` (default: 3000)
    /// - `TREND_INTERVAL_HOURS` (default: 24)
    /// - `TREND_INTERVAL_NUM` (default: 60)
    /// - `MATRIX_WORKER_SERVERS` (default: CN,US,JP,KR)
    /// - `MATRIX_WORKER_SOURCE_CATEGORIES` (default: all)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            db_path: lookup("DROPSTATS_DB_PATH").unwrap_or(defaults.db_path),
            enabled: parse_or(&lookup, "WORKER_ENABLED", defaults.enabled),
            interval_secs: parse_or(&lookup, "WORKER_INTERVAL_SECS", defaults.interval_secs),
            trend_interval_secs: parse_or(
                &lookup,
                "WORKER_TREND_INTERVAL_SECS",
                defaults.trend_interval_secs,
            ),
            separation_ms: parse_or(&lookup, "WORKER_SEPARATION_MS", defaults.separation_ms),
            trend_interval_hours: parse_or(
                &lookup,
                "TREND_INTERVAL_HOURS",
                defaults.trend_interval_hours,
            ),
            trend_interval_num: parse_or(&lookup, "TREND_INTERVAL_NUM", defaults.trend_interval_num),
            servers: parse_list(&lookup, "MATRIX_WORKER_SERVERS", Server::from_name)?
                .unwrap_or(defaults.servers),
            source_categories: parse_list(
                &lookup,
                "MATRIX_WORKER_SOURCE_CATEGORIES",
                SourceCategory::from_name,
            )?
            .unwrap_or(defaults.source_categories),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("WORKER_INTERVAL_SECS", self.interval_secs as i64),
            ("WORKER_TREND_INTERVAL_SECS", self.trend_interval_secs as i64),
            ("TREND_INTERVAL_HOURS", self.trend_interval_hours),
        ];
        for (var, value) in positive {
            if value <= 0 {
                return Err(ConfigError::InvalidValue {
                    var,
                    value: value.to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }

        if self.trend_interval_hours > MAX_TREND_INTERVAL_HOURS {
            return Err(ConfigError::InvalidValue {
                var: "TREND_INTERVAL_HOURS",
                value: self.trend_interval_hours.to_string(),
                reason: format!("must be at most {}", MAX_TREND_INTERVAL_HOURS),
            });
        }
        if self.trend_interval_num > MAX_TREND_INTERVALS {
            return Err(ConfigError::InvalidValue {
                var: "TREND_INTERVAL_NUM",
                value: self.trend_interval_num.to_string(),
                reason: format!("must be at most {}", MAX_TREND_INTERVALS),
            });
        }
        // Trend windows start and end on a game-day reset
        if (self.trend_interval_hours * self.trend_interval_num as i64) % 24 != 0 {
            return Err(ConfigError::InvalidValue {
                var: "TREND_INTERVAL_NUM",
                value: self.trend_interval_num.to_string(),
                reason: format!(
                    "{} intervals of {}h do not cover whole game days",
                    self.trend_interval_num, self.trend_interval_hours
                ),
            });
        }
        Ok(())
    }

    pub fn trend_interval_length(&self) -> chrono::Duration {
        chrono::Duration::hours(self.trend_interval_hours)
    }
}

/// Parse a scalar, falling back to `default` when unset or malformed
fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: T) -> T {
    match lookup(var) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("⚠️  Ignoring malformed {}={:?}, using default", var, raw);
                default
            }
        },
        None => default,
    }
}

/// Parse a comma-separated list of names; an unknown name is an error
fn parse_list<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    from_name: fn(&str) -> Option<T>,
) -> Result<Option<Vec<T>>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };

    let mut values = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let value = from_name(name).ok_or_else(|| ConfigError::InvalidValue {
            var,
            value: name.to_string(),
            reason: "unknown name".to_string(),
        })?;
        values.push(value);
    }

    if values.is_empty() {
        return Err(ConfigError::InvalidValue {
            var,
            value: raw,
            reason: "list is empty".to_string(),
        });
    }
    Ok(Some(values))
}
