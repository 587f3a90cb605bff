//! Environment-driven configuration for the engine and the Postgres store.

use thiserror::Error;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Version-checked commit attempts per operation before giving up with `Contention`.
    pub max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl EngineConfig {
    /// Reads `STOCKROOM_MAX_ATTEMPTS` (default 5, must be at least 1).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let max_attempts = parse_positive(&lookup, "STOCKROOM_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        Ok(Self { max_attempts })
    }
}

/// Postgres connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Reads `DATABASE_URL` (required) and `STOCKROOM_DB_MAX_CONNECTIONS` (default 10).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let max_connections =
            parse_positive(&lookup, "STOCKROOM_DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        Ok(Self {
            database_url,
            max_connections,
        })
    }
}

fn parse_positive(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u32,
) -> Result<u32, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    let value = raw.trim().parse::<u32>().map_err(|e| ConfigError::Invalid {
        name,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            value: raw,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn engine_defaults_to_five_attempts() {
        assert_eq!(EngineConfig::default().max_attempts, 5);
        assert_eq!(EngineConfig::from_lookup(env(&[])).unwrap(), EngineConfig::default());
    }

    #[test]
    fn engine_reads_max_attempts() {
        let cfg = EngineConfig::from_lookup(env(&[("STOCKROOM_MAX_ATTEMPTS", " 8 ")])).unwrap();
        assert_eq!(cfg.max_attempts, 8);
    }

    #[test]
    fn engine_rejects_zero_and_garbage() {
        assert!(matches!(
            EngineConfig::from_lookup(env(&[("STOCKROOM_MAX_ATTEMPTS", "0")])),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            EngineConfig::from_lookup(env(&[("STOCKROOM_MAX_ATTEMPTS", "many")])),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn store_requires_database_url() {
        assert_eq!(
            StoreConfig::from_lookup(env(&[])),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
        let cfg = StoreConfig::from_lookup(env(&[("DATABASE_URL", "postgres://localhost/stock")])).unwrap();
        assert_eq!(cfg, StoreConfig::new("postgres://localhost/stock"));
        assert_eq!(cfg.max_connections, 10);
    }

    #[test]
    fn store_reads_pool_size() {
        let cfg = StoreConfig::from_lookup(env(&[
            ("DATABASE_URL", "postgres://localhost/stock"),
            ("STOCKROOM_DB_MAX_CONNECTIONS", "32"),
        ]))
        .unwrap();
        assert_eq!(cfg.max_connections, 32);
    }
}
