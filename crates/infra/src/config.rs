//! Configuration loaded from environment variables.
//!
//! | Variable | Values | Default |
//! |---|---|---|
//! | `EVSTORE_DATABASE_URL` | Postgres URL | unset (in-memory stores) |
//! | `EVSTORE_COUNT_POLICY` | `exact`, `approximate` | `approximate` |
//! | `EVSTORE_RUNTIME_LOCK` | `none`, `try` | `none` |
//! | `EVSTORE_CONTINUE_ON_ERROR` | boolean | `false` |
//! | `EVSTORE_FORCE_UNLOCK` | boolean | `false` |
//! | `EVSTORE_RESET_BEFORE_PLAY` | boolean | `false` |
//!
//! Booleans accept `true`/`false`, `1`/`0`, `yes`/`no` and `on`/`off`.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;

use crate::event_store::CountPolicy;
use crate::projector::{RuntimeLockPolicy, WorkerContext};

pub const DATABASE_URL: &str = "EVSTORE_DATABASE_URL";
pub const COUNT_POLICY: &str = "EVSTORE_COUNT_POLICY";
pub const RUNTIME_LOCK: &str = "EVSTORE_RUNTIME_LOCK";
pub const CONTINUE_ON_ERROR: &str = "EVSTORE_CONTINUE_ON_ERROR";
pub const FORCE_UNLOCK: &str = "EVSTORE_FORCE_UNLOCK";
pub const RESET_BEFORE_PLAY: &str = "EVSTORE_RESET_BEFORE_PLAY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("database connection failed: {0}")]
    Connection(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub database_url: Option<String>,
    pub count_policy: CountPolicy,
    pub runtime_lock: RuntimeLockPolicy,
    pub worker: WorkerContext,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset and blank values take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let count_policy = match get(COUNT_POLICY) {
            None => CountPolicy::default(),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "exact" => CountPolicy::Exact,
                "approximate" => CountPolicy::Approximate,
                _ => return Err(invalid(COUNT_POLICY, v)),
            },
        };

        let runtime_lock = match get(RUNTIME_LOCK) {
            None => RuntimeLockPolicy::default(),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "none" => RuntimeLockPolicy::None,
                "try" | "try_lock" => RuntimeLockPolicy::TryLock,
                _ => return Err(invalid(RUNTIME_LOCK, v)),
            },
        };

        let worker = WorkerContext::new()
            .continue_on_error(parse_bool(CONTINUE_ON_ERROR, get(CONTINUE_ON_ERROR))?)
            .unlock(parse_bool(FORCE_UNLOCK, get(FORCE_UNLOCK))?)
            .reset(parse_bool(RESET_BEFORE_PLAY, get(RESET_BEFORE_PLAY))?);

        Ok(Self {
            database_url: get(DATABASE_URL),
            count_policy,
            runtime_lock,
            worker,
        })
    }

    pub fn use_persistent_stores(&self) -> bool {
        self.database_url.is_some()
    }

    /// Connect to Postgres when a database URL is configured.
    pub async fn connect(&self) -> Result<Option<PgPool>, ConfigError> {
        match &self.database_url {
            Some(url) => Ok(Some(PgPool::connect(url).await?)),
            None => Ok(None),
        }
    }
}

fn parse_bool(key: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(false);
    };
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn invalid(key: &'static str, value: String) -> ConfigError {
    ConfigError::Invalid { key, value }
}
