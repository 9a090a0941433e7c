use anyhow::{Context, Result, bail};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::connection::config::PoolConfig;
use crate::dispatcher::DispatcherConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub reply_timeout: Duration,
    pub db_max_connections: usize,
    pub db_connect_timeout: Duration,
}

impl AppConfig {
    /// Read the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("BIND_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_or(&lookup, "BIND_PORT", 8080)?;
        let worker_count: usize = parse_or(&lookup, "WORKER_COUNT", 4)?;
        let queue_capacity: usize = parse_or(&lookup, "QUEUE_CAPACITY", 64)?;
        let reply_timeout_ms: u64 = parse_or(&lookup, "REPLY_TIMEOUT_MS", 5000)?;
        let db_max_connections: usize = parse_or(&lookup, "DB_MAX_CONNECTIONS", worker_count)?;
        let db_connect_timeout_ms: u64 = parse_or(&lookup, "DB_CONNECT_TIMEOUT_MS", 30_000)?;

        let config = Self {
            host,
            port,
            worker_count,
            queue_capacity,
            reply_timeout: Duration::from_millis(reply_timeout_ms),
            db_max_connections,
            db_connect_timeout: Duration::from_millis(db_connect_timeout_ms),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            bail!("WORKER_COUNT must be > 0");
        }
        if self.queue_capacity == 0 {
            bail!("QUEUE_CAPACITY must be > 0");
        }
        if self.db_max_connections == 0 {
            bail!("DB_MAX_CONNECTIONS must be > 0");
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new()
            .max_connections(self.db_max_connections)
            .connect_timeout(self.db_connect_timeout)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::new(self.worker_count).queue_capacity(self.queue_capacity)
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        None => Ok(default),
    }
}
