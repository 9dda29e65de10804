//! Runtime configuration read from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `DATABASE_URL` | none |
//! | `REDIS_URL` | none (in-process bus) |
//! | `STOCK_OUTBOX_POLL_MS` | 5000 |
//! | `STOCK_OUTBOX_BATCH_SIZE` | 100 |
//! | `STOCK_OUTBOX_RETENTION_DAYS` | 7 |
//! | `STOCK_LEDGER_RETENTION_DAYS` | 730 |
//! | `STOCK_MAX_MUTATION_RETRIES` | 3 |
//! | `STOCK_SNAPSHOT_HOUR_UTC` | 0 |
//! | `STOCK_HOLD_EXPIRY_INTERVAL_SECS` | 60 |
//! | `STOCK_SNAPSHOT_RETENTION_{DAILY,MONTH_END,QUARTER_END,YEAR_END,AD_HOC}_DAYS` | 90, 1095, 2555, 3650, 365 |

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;

use crate::mutation::DEFAULT_MAX_RETRIES;
use crate::outbox::publisher::{DEFAULT_BATCH_SIZE, DEFAULT_POLL_INTERVAL};
use crate::retention::{DEFAULT_LEDGER_RETENTION_DAYS, DEFAULT_OUTBOX_RETENTION_DAYS};
use crate::snapshots::SnapshotRetention;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockConfig {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub outbox_poll_interval: StdDuration,
    pub outbox_batch_size: usize,
    pub outbox_retention: Duration,
    pub ledger_retention: Duration,
    pub max_mutation_retries: u32,
    /// UTC hour at which the daily jobs (snapshots, retention) open.
    pub snapshot_hour_utc: u32,
    pub hold_expiry_interval: StdDuration,
    pub snapshot_retention: SnapshotRetention,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            outbox_poll_interval: DEFAULT_POLL_INTERVAL,
            outbox_batch_size: DEFAULT_BATCH_SIZE,
            outbox_retention: Duration::days(DEFAULT_OUTBOX_RETENTION_DAYS),
            ledger_retention: Duration::days(DEFAULT_LEDGER_RETENTION_DAYS),
            max_mutation_retries: DEFAULT_MAX_RETRIES,
            snapshot_hour_utc: 0,
            hold_expiry_interval: StdDuration::from_secs(60),
            snapshot_retention: SnapshotRetention::default(),
        }
    }
}

impl StockConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset and empty values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();
        let retention = defaults.snapshot_retention;

        let snapshot_hour_utc = parse_or(&get, "STOCK_SNAPSHOT_HOUR_UTC", defaults.snapshot_hour_utc)?;
        if snapshot_hour_utc > 23 {
            return Err(ConfigError::Invalid {
                key: "STOCK_SNAPSHOT_HOUR_UTC",
                value: snapshot_hour_utc.to_string(),
                reason: "must be between 0 and 23".into(),
            });
        }

        let outbox_batch_size = parse_or(&get, "STOCK_OUTBOX_BATCH_SIZE", defaults.outbox_batch_size)?;
        if outbox_batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "STOCK_OUTBOX_BATCH_SIZE",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            outbox_poll_interval: millis_or(&get, "STOCK_OUTBOX_POLL_MS", defaults.outbox_poll_interval)?,
            outbox_batch_size,
            outbox_retention: days_or(&get, "STOCK_OUTBOX_RETENTION_DAYS", defaults.outbox_retention)?,
            ledger_retention: days_or(&get, "STOCK_LEDGER_RETENTION_DAYS", defaults.ledger_retention)?,
            max_mutation_retries: parse_or(&get, "STOCK_MAX_MUTATION_RETRIES", defaults.max_mutation_retries)?,
            snapshot_hour_utc,
            hold_expiry_interval: StdDuration::from_secs(parse_or(
                &get,
                "STOCK_HOLD_EXPIRY_INTERVAL_SECS",
                defaults.hold_expiry_interval.as_secs(),
            )?),
            snapshot_retention: SnapshotRetention {
                daily: days_or(&get, "STOCK_SNAPSHOT_RETENTION_DAILY_DAYS", retention.daily)?,
                month_end: days_or(&get, "STOCK_SNAPSHOT_RETENTION_MONTH_END_DAYS", retention.month_end)?,
                quarter_end: days_or(&get, "STOCK_SNAPSHOT_RETENTION_QUARTER_END_DAYS", retention.quarter_end)?,
                year_end: days_or(&get, "STOCK_SNAPSHOT_RETENTION_YEAR_END_DAYS", retention.year_end)?,
                ad_hoc: days_or(&get, "STOCK_SNAPSHOT_RETENTION_AD_HOC_DAYS", retention.ad_hoc)?,
            },
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or(ConfigError::Missing("DATABASE_URL"))
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn days_or<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let days: u32 = parse_or(get, key, u32::try_from(default.num_days()).unwrap_or(u32::MAX))?;
    Ok(Duration::days(i64::from(days)))
}

fn millis_or<G>(get: &G, key: &'static str, default: StdDuration) -> Result<StdDuration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let millis: u64 = parse_or(get, key, u64::try_from(default.as_millis()).unwrap_or(u64::MAX))?;
    Ok(StdDuration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = StockConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config, StockConfig::default());
        assert_eq!(config.outbox_poll_interval, StdDuration::from_millis(5000));
        assert_eq!(config.ledger_retention, Duration::days(730));
        assert_eq!(config.snapshot_retention.quarter_end, Duration::days(2555));
        assert_eq!(config.require_database_url(), Err(ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn overrides_are_applied() {
        let config = StockConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://stock@localhost/stock"),
            ("REDIS_URL", " "),
            ("STOCK_OUTBOX_POLL_MS", "250"),
            ("STOCK_OUTBOX_BATCH_SIZE", "20"),
            ("STOCK_MAX_MUTATION_RETRIES", "5"),
            ("STOCK_SNAPSHOT_HOUR_UTC", "23"),
            ("STOCK_SNAPSHOT_RETENTION_AD_HOC_DAYS", "30"),
        ]))
        .unwrap();

        assert_eq!(config.require_database_url(), Ok("postgres://stock@localhost/stock"));
        assert_eq!(config.redis_url, None);
        assert_eq!(config.outbox_poll_interval, StdDuration::from_millis(250));
        assert_eq!(config.outbox_batch_size, 20);
        assert_eq!(config.max_mutation_retries, 5);
        assert_eq!(config.snapshot_hour_utc, 23);
        assert_eq!(config.snapshot_retention.ad_hoc, Duration::days(30));
        assert_eq!(config.snapshot_retention.daily, Duration::days(90));
    }

    #[test]
    fn invalid_values_name_the_key() {
        let err = StockConfig::from_lookup(lookup(&[("STOCK_SNAPSHOT_HOUR_UTC", "24")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "STOCK_SNAPSHOT_HOUR_UTC", .. }));

        let err = StockConfig::from_lookup(lookup(&[("STOCK_LEDGER_RETENTION_DAYS", "two years")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "STOCK_LEDGER_RETENTION_DAYS", .. }));

        let err = StockConfig::from_lookup(lookup(&[("STOCK_OUTBOX_BATCH_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "STOCK_OUTBOX_BATCH_SIZE", .. }));
    }
}
