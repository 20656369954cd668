//! Runtime configuration for refresh-ahead.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Every knob has a default, so a partial file only overrides what it names.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::FixedPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Command-line arguments for the simulation binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "refresh-ahead", about = "Refresh-ahead two-tier cache simulation")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Number of distinct keys to load each round.
    #[arg(long, default_value_t = 16)]
    pub keys: usize,

    /// Number of passes over the key space.
    #[arg(long, default_value_t = 10)]
    pub rounds: usize,

    /// Pause between rounds in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,

    /// Simulated source latency in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub source_latency_ms: u64,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote store access.
    pub store: StoreConfig,

    /// Background refresh pool.
    pub refresh: RefreshConfig,

    /// Expiration and refresh windows.
    pub policy: PolicyConfig,

    /// Near tier.
    pub near: NearConfig,
}

/// Remote store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Upper bound on a remote get before it counts as a miss.
    pub get_timeout_ms: u64,

    /// Encoded entries larger than this are zstd-compressed.
    pub compression_threshold: usize,

    /// zstd compression level (1-22).
    pub zstd_level: i32,

    /// Largest decompressed entry accepted from the store.
    pub max_decoded_bytes: usize,

    /// Prefix for every store key.
    pub namespace: Option<String>,

    /// Hash keys to a fixed width instead of using their text form.
    pub hash_keys: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            get_timeout_ms: 50,
            compression_threshold: 16 * 1024,
            zstd_level: 3,
            max_decoded_bytes: 8 * 1024 * 1024,
            namespace: None,
            hash_keys: false,
        }
    }
}

impl StoreConfig {
    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.get_timeout_ms)
    }
}

/// Background refresh pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Number of worker tasks.
    pub workers: usize,

    /// Jobs that can wait in the queue before submissions start parking.
    pub queue_capacity: usize,

    /// Pool name, used in worker span names.
    pub name: String,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            workers: 20,
            queue_capacity: 1024,
            name: "refresh".to_string(),
        }
    }
}

/// Default freshness windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Seconds until a fetched value must not be served.
    pub expire_after_secs: u64,

    /// Seconds until a fetched value is refreshed in the background.
    pub refresh_after_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            expire_after_secs: 60,
            refresh_after_secs: 30,
        }
    }
}

impl PolicyConfig {
    pub fn fixed_policy(&self) -> FixedPolicy {
        FixedPolicy::new(
            Duration::from_secs(self.expire_after_secs),
            Duration::from_secs(self.refresh_after_secs),
        )
    }
}

/// Near tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NearConfig {
    /// Put a local tier in front of the loader.
    pub enabled: bool,

    /// Maximum number of entries held locally.
    pub max_capacity: u64,
}

impl Default for NearConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults if it is missing.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pool cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh.workers == 0 {
            return Err(ConfigError::Invalid("refresh.workers must be at least 1".into()));
        }
        if self.refresh.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "refresh.queue_capacity must be at least 1".into(),
            ));
        }
        if self.store.max_decoded_bytes <= self.store.compression_threshold {
            return Err(ConfigError::Invalid(
                "store.max_decoded_bytes must exceed store.compression_threshold".into(),
            ));
        }
        if self.policy.refresh_after_secs > self.policy.expire_after_secs {
            tracing::warn!(
                refresh_after_secs = self.policy.refresh_after_secs,
                expire_after_secs = self.policy.expire_after_secs,
                "Refresh window exceeds expiration, entries will expire before they refresh"
            );
        }
        Ok(())
    }
}
