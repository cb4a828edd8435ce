//! Settings loaded from the environment.
//!
//! A `.env` file in the working directory is read first via `dotenvy`;
//! real environment variables win over it.
//!
//! | Variable                     | Default  |
//! |------------------------------|----------|
//! | `RESALLOC_DATA_DIR`          | `./data` |
//! | `RESALLOC_LOCK_TIMEOUT_MS`   | `5000`   |
//! | `RESALLOC_COMPACT_THRESHOLD` | `1000`   |
//! | `RESALLOC_METRICS_PORT`      | unset    |
//! | `RESALLOC_LOG`               | `info`   |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::engine::AllocatorConfig;

pub const WAL_FILE_NAME: &str = "resalloc.wal";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{key}: cannot parse {value:?}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub lock_timeout: Duration,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_timeout: crate::engine::DEFAULT_LOCK_TIMEOUT,
            compact_threshold: 1000,
            metrics_port: None,
            log_filter: "info".into(),
        }
    }
}

impl Config {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys take defaults; set but
    /// malformed keys are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let lock_timeout_ms: Option<u64> = parse(&lookup, "RESALLOC_LOCK_TIMEOUT_MS")?;
        Ok(Self {
            data_dir: lookup("RESALLOC_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            lock_timeout: lock_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            compact_threshold: parse(&lookup, "RESALLOC_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parse(&lookup, "RESALLOC_METRICS_PORT")?,
            log_filter: lookup("RESALLOC_LOG").unwrap_or(defaults.log_filter),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }

    pub fn allocator(&self) -> AllocatorConfig {
        AllocatorConfig {
            lock_timeout: self.lock_timeout,
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { key, value }),
    }
}
