use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{AnomalyError, Result};
use crate::isolation::IsolationLevel;

pub const DB_URL: &str = "DB_URL";
pub const DB_USERNAME: &str = "DB_USERNAME";
pub const DB_PASSWORD: &str = "DB_PASSWORD";
pub const DB_POOL_SIZE: &str = "DB_POOL_SIZE";
pub const BARRIER_TIMEOUT_MS: &str = "HARNESS_BARRIER_TIMEOUT_MS";
pub const ACTOR_TIMEOUT_MS: &str = "HARNESS_ACTOR_TIMEOUT_MS";
pub const WRITER_ISOLATION: &str = "HARNESS_WRITER_ISOLATION";

/// Connection parameters of the external store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Connection string, either `postgres://...` or `host=... dbname=...`.
    pub url: String,
    /// Overrides the user embedded in `url`.
    pub username: Option<String>,
    /// Overrides the password embedded in `url`.
    pub password: Option<String>,
    /// Idle connections kept for reuse. Two actors need two connections.
    pub pool_size: usize,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            pool_size: 2,
        }
    }
}

/// Bounds on every wait the harness performs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Longest an actor blocks on a latch.
    pub barrier: Duration,
    /// Longest the driver waits for an actor thread to hand back its result.
    pub actor: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            barrier: Duration::from_secs(10),
            actor: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub store: StoreConfig,
    pub timeouts: Timeouts,
    /// Level of the writer actor's transactions.
    pub writer_isolation: IsolationLevel,
}

impl HarnessConfig {
    pub fn new(store: StoreConfig) -> Self {
        Self {
            store,
            timeouts: Timeouts::default(),
            writer_isolation: IsolationLevel::ReadCommitted,
        }
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value. Only `DB_URL` is mandatory.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(DB_URL)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| AnomalyError::Config(format!("{} is not set", DB_URL)))?;

        let mut config = HarnessConfig::new(StoreConfig::new(url));
        config.store.username = lookup(DB_USERNAME);
        config.store.password = lookup(DB_PASSWORD);
        if let Some(raw) = lookup(DB_POOL_SIZE) {
            config.store.pool_size = parse_number(DB_POOL_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(BARRIER_TIMEOUT_MS) {
            config.timeouts.barrier = Duration::from_millis(parse_number(BARRIER_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = lookup(ACTOR_TIMEOUT_MS) {
            config.timeouts.actor = Duration::from_millis(parse_number(ACTOR_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = lookup(WRITER_ISOLATION) {
            config.writer_isolation = raw.parse()?;
        }
        Ok(config)
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| AnomalyError::Config(format!("{} must be a non-negative integer, got `{}`", key, raw)))
}
