//! Runtime configuration read from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_URL` | unset (in-memory ledger) |
//! | `STOCKWISE_LOCK_TIMEOUT_MS` | `2000` |
//! | `STOCKWISE_RESERVE_MAX_ATTEMPTS` | `3` |
//! | `STOCKWISE_RESERVE_BACKOFF_MS` | `25` |
//! | `STOCKWISE_COMPENSATION` | `leave` (`leave` or `release`) |
//! | `STOCKWISE_HISTORY_LIMIT` | `50` |
//!
//! Unparseable values are logged and replaced by the default.

use std::str::FromStr;
use std::time::Duration;

use crate::checkout::CompensationPolicy;
use crate::retry::RetryPolicy;
use crate::stock::DEFAULT_HISTORY_LIMIT;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const LOCK_TIMEOUT_MS: &str = "STOCKWISE_LOCK_TIMEOUT_MS";
pub const RESERVE_MAX_ATTEMPTS: &str = "STOCKWISE_RESERVE_MAX_ATTEMPTS";
pub const RESERVE_BACKOFF_MS: &str = "STOCKWISE_RESERVE_BACKOFF_MS";
pub const COMPENSATION: &str = "STOCKWISE_COMPENSATION";
pub const HISTORY_LIMIT: &str = "STOCKWISE_HISTORY_LIMIT";

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_BACKOFF_MS: u64 = 25;
const MAX_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct InventoryConfig {
    /// Postgres connection string; the in-memory ledger is used when absent.
    pub database_url: Option<String>,
    pub lock_timeout: Duration,
    pub reserve_retry: RetryPolicy,
    pub compensation: CompensationPolicy,
    pub history_limit: usize,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            reserve_retry: RetryPolicy::default(),
            compensation: CompensationPolicy::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl InventoryConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source (environment, test map, ...).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let database_url = lookup(DATABASE_URL).filter(|url| !url.trim().is_empty());
        let lock_timeout_ms = parse_or(&lookup, LOCK_TIMEOUT_MS, DEFAULT_LOCK_TIMEOUT_MS);
        let max_attempts = parse_or(&lookup, RESERVE_MAX_ATTEMPTS, defaults.reserve_retry.max_attempts);
        let backoff_ms = parse_or(&lookup, RESERVE_BACKOFF_MS, DEFAULT_BACKOFF_MS);
        let compensation = parse_or(&lookup, COMPENSATION, defaults.compensation);
        let history_limit = parse_or(&lookup, HISTORY_LIMIT, defaults.history_limit);

        Self {
            database_url,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            reserve_retry: RetryPolicy::exponential(
                max_attempts.max(1),
                Duration::from_millis(backoff_ms),
                MAX_BACKOFF,
            ),
            compensation,
            history_limit,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "invalid configuration value, using default");
                default
            }
        },
    }
}
