//! Environment configuration.
//!
//! | Variable | Default |
//! |---|---|
//! | `DATABASE_URL` | none (required by the worker) |
//! | `REDIS_URL` | none (cache and Redis events disabled) |
//! | `STOCK_EVENTS_CHANNEL` | `inventory.stock.released` |
//! | `RESERVATION_TTL_SECS` | `900` |
//! | `SWEEP_INTERVAL_SECS` | `60` |
//! | `SWEEP_BATCH_LIMIT` | `1000` (`0` = unbounded) |
//! | `SWEEP_TICK_TIMEOUT_SECS` | `120` |
//! | `CACHE_ITEM_TTL_SECS` | `300` |
//! | `CACHE_LOW_STOCK_TTL_SECS` | `60` |

use std::env;
use std::time::Duration;

use thiserror::Error;

use stockledger_inventory::StockReleased;

use crate::cache::CacheConfig;
use crate::sweeper::SweeperConfig;
use crate::workflows::ReservationConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {key}")]
    MissingEnv { key: String },

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub stock_events_channel: String,
    pub reservation: ReservationConfig,
    pub sweeper: SweeperConfig,
    pub cache: CacheConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            stock_events_channel: StockReleased::EVENT_TYPE.to_string(),
            reservation: ReservationConfig::default(),
            sweeper: SweeperConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup (the process environment, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let reservation_ttl = positive_secs(&get, "RESERVATION_TTL_SECS")?
            .map(|secs| chrono::Duration::seconds(secs as i64))
            .unwrap_or(defaults.reservation.default_ttl);

        let mut sweeper = defaults.sweeper.clone();
        if let Some(interval) = positive_secs(&get, "SWEEP_INTERVAL_SECS")? {
            sweeper = sweeper.with_interval(Duration::from_secs(interval));
        }
        if let Some(limit) = parse::<usize>(&get, "SWEEP_BATCH_LIMIT")? {
            sweeper = sweeper.with_batch_limit(limit);
        }
        if let Some(timeout) = positive_secs(&get, "SWEEP_TICK_TIMEOUT_SECS")? {
            sweeper = sweeper.with_tick_timeout(Duration::from_secs(timeout));
        }

        let mut cache = defaults.cache;
        if let Some(ttl) = positive_secs(&get, "CACHE_ITEM_TTL_SECS")? {
            cache = cache.with_item_ttl(Duration::from_secs(ttl));
        }
        if let Some(ttl) = positive_secs(&get, "CACHE_LOW_STOCK_TTL_SECS")? {
            cache = cache.with_low_stock_ttl(Duration::from_secs(ttl));
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            stock_events_channel: get("STOCK_EVENTS_CHANNEL")
                .unwrap_or(defaults.stock_events_channel),
            reservation: defaults.reservation.with_default_ttl(reservation_ttl),
            sweeper,
            cache,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnv {
                key: "DATABASE_URL".to_string(),
            })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn positive_secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<u64>, ConfigError> {
    match parse::<u64>(get, key)? {
        Some(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        // Keeps the value representable as a signed chrono duration.
        Some(secs) if secs > i64::MAX as u64 / 1000 => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: secs.to_string(),
            reason: "too large".to_string(),
        }),
        other => Ok(other),
    }
}
