//! Engine configuration.
//!
//! Values come from `STOCKLEDGER_*` environment variables (a `.env` file is
//! honoured) and fall back to [`StockEngineConfig::default`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::store::MAX_PAGE_SIZE;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
    #[error("{0} is required")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockEngineConfig {
    /// Postgres connection string; `None` selects no database.
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Bound on waiting for a pooled connection.
    pub acquire_timeout_ms: u64,
    /// `SET LOCAL lock_timeout` for every commit transaction.
    pub lock_timeout_ms: u64,
    /// `SET LOCAL statement_timeout` for every commit transaction.
    pub statement_timeout_ms: u64,
    pub default_history_limit: u32,
    pub retry: RetryPolicy,
}

impl Default for StockEngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            acquire_timeout_ms: 5_000,
            lock_timeout_ms: 2_000,
            statement_timeout_ms: 10_000,
            default_history_limit: 50,
            retry: RetryPolicy::default(),
        }
    }
}

impl StockEngineConfig {
    /// Load from the process environment (after reading `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let database_url = lookup("STOCKLEDGER_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .filter(|url| !url.trim().is_empty());

        let config = Self {
            database_url,
            max_connections: parse(&lookup, "STOCKLEDGER_MAX_CONNECTIONS", defaults.max_connections)?,
            acquire_timeout_ms: parse(
                &lookup,
                "STOCKLEDGER_ACQUIRE_TIMEOUT_MS",
                defaults.acquire_timeout_ms,
            )?,
            lock_timeout_ms: parse(&lookup, "STOCKLEDGER_LOCK_TIMEOUT_MS", defaults.lock_timeout_ms)?,
            statement_timeout_ms: parse(
                &lookup,
                "STOCKLEDGER_STATEMENT_TIMEOUT_MS",
                defaults.statement_timeout_ms,
            )?,
            default_history_limit: parse(
                &lookup,
                "STOCKLEDGER_HISTORY_LIMIT",
                defaults.default_history_limit,
            )?,
            retry: RetryPolicy {
                max_attempts: parse(
                    &lookup,
                    "STOCKLEDGER_RETRY_MAX_ATTEMPTS",
                    defaults.retry.max_attempts,
                )?,
                initial_backoff_ms: parse(
                    &lookup,
                    "STOCKLEDGER_RETRY_BACKOFF_MS",
                    defaults.retry.initial_backoff_ms,
                )?,
                ..defaults.retry
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "STOCKLEDGER_MAX_CONNECTIONS",
                value: "0".into(),
            });
        }
        if self.default_history_limit == 0 || self.default_history_limit > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid {
                key: "STOCKLEDGER_HISTORY_LIMIT",
                value: self.default_history_limit.to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "STOCKLEDGER_RETRY_MAX_ATTEMPTS",
                value: "0".into(),
            });
        }
        Ok(())
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("STOCKLEDGER_DATABASE_URL"))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

fn parse<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
