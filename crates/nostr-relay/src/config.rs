//! Relay configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

pub const DEFAULT_RING_CAPACITY: usize = 500;
pub const DEFAULT_DB_PATH: &str = "./db/";
pub const DEFAULT_QUERY_BATCH_SIZE: usize = 256;

/// Settings for a single relay instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Number of slots in the ephemeral ring buffer.
    pub ring_capacity: usize,
    /// Directory holding the SQLite database. Created if absent.
    pub db_path: PathBuf,
    /// Rows fetched per page when streaming persistent query results.
    pub query_batch_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            query_batch_size: DEFAULT_QUERY_BATCH_SIZE,
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `RELAY_RING_CAPACITY` | Ephemeral ring slots | `500` |
    /// | `RELAY_DB_PATH` | Durable store directory | `./db/` |
    /// | `RELAY_QUERY_BATCH_SIZE` | Rows per persistent page | `256` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let defaults = Self::default();

        let ring_capacity = match lookup("RELAY_RING_CAPACITY") {
            Some(value) => parse_positive("RELAY_RING_CAPACITY", value)?,
            None => defaults.ring_capacity,
        };

        let db_path = lookup("RELAY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let query_batch_size = match lookup("RELAY_QUERY_BATCH_SIZE") {
            Some(value) => parse_positive("RELAY_QUERY_BATCH_SIZE", value)?,
            None => defaults.query_batch_size,
        };

        Ok(Self {
            ring_capacity,
            db_path,
            query_batch_size,
        })
    }
}

fn parse_positive(name: &'static str, value: String) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::Invalid { name, value }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    Invalid { name: &'static str, value: String },
}
