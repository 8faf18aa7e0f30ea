//! Postgres pool setup.
//!
//! A reprocessing run issues its statements one at a time, with a second
//! connection used by the progress writer, so the pool stays small.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use rhizome_core::{Error, Result};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Pool sizing for [`crate::Database`].
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    /// Defaults overridden by `RHIZOME_DB_MAX_CONNECTIONS` and
    /// `RHIZOME_DB_ACQUIRE_TIMEOUT_SECS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(n) = lookup("RHIZOME_DB_MAX_CONNECTIONS").and_then(|v| v.parse::<u32>().ok()) {
            // at least two: one for the run, one for progress writes
            config.max_connections = n.max(2);
        }
        if let Some(secs) =
            lookup("RHIZOME_DB_ACQUIRE_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok())
        {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        config
    }
}

/// Connect a pool sized by `config`.
pub async fn create_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "database",
        component = "pool",
        max_connections = config.max_connections,
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_pool_config_from_lookup() {
        let config = PoolConfig::from_lookup(lookup(&[
            ("RHIZOME_DB_MAX_CONNECTIONS", "10"),
            ("RHIZOME_DB_ACQUIRE_TIMEOUT_SECS", "5"),
        ]));
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_pool_config_keeps_room_for_progress_writes() {
        let config = PoolConfig::from_lookup(lookup(&[("RHIZOME_DB_MAX_CONNECTIONS", "1")]));
        assert_eq!(config.max_connections, 2);
    }

    #[test]
    fn test_pool_config_ignores_garbage() {
        let config = PoolConfig::from_lookup(lookup(&[("RHIZOME_DB_MAX_CONNECTIONS", "lots")]));
        assert_eq!(config, PoolConfig::default());
    }
}
