//! Server configuration for `cesync serve`.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML
//! file (`--config`), `CESYNC_*` environment variables for the `[sync]`
//! tuning knobs, command-line flags. The `serve` flags themselves fall back
//! to `CESYNC_PORT`, `CESYNC_CONFIG` and `CESYNC_SCENARIOS_DIR` through clap,
//! so those reach this module as [`FlagOverrides`].
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8080
//! scenarios_dir = "scenarios"
//! round_trip_timeout_ms = 30000
//!
//! [sync]
//! merge_timeout_ms = 5000
//! max_concurrent_merges = 32
//!
//! [sync.retry]
//! max_attempts = 3
//! base_delay_ms = 50
//! max_delay_ms = 2000
//! jitter = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ce_sync::{RetryPolicy, SyncConfig};
use serde::{Deserialize, Serialize};

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub sync: SyncSettings,
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    /// Directory of scenario definition JSON files.
    pub scenarios_dir: Option<PathBuf>,
    /// How long an HTTP caller waits before getting `queued`.
    pub round_trip_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            port: 8080,
            scenarios_dir: None,
            round_trip_timeout_ms: 30_000,
        }
    }
}

/// `[sync]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub merge_timeout_ms: u64,
    pub max_concurrent_merges: usize,
    pub worker_idle_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let defaults = SyncConfig::default();
        SyncSettings {
            merge_timeout_ms: defaults.merge_timeout.as_millis() as u64,
            max_concurrent_merges: defaults.max_concurrent_merges,
            worker_idle_ms: defaults.worker_idle.as_millis() as u64,
            retry: defaults.retry,
        }
    }
}

/// Command-line overrides; `None` leaves the lower layers in place.
#[derive(Debug, Clone, Default)]
pub struct FlagOverrides {
    pub port: Option<u16>,
    pub scenarios_dir: Option<PathBuf>,
}

// ── Functions ─────────────────────────────────────────────────────────────────

/// Read and parse a config TOML file from `path`.
pub fn read_config(path: &Path) -> Result<Config, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
    toml::from_str(&content).map_err(|e| format!("could not parse '{}': {}", path.display(), e))
}

impl Config {
    /// Resolve the full layer stack.
    pub fn load(path: Option<&Path>, flags: &FlagOverrides) -> Result<Config, String> {
        let mut config = match path {
            Some(path) => read_config(path)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_flags(flags);
        Ok(config)
    }

    /// Apply `CESYNC_*` sync overrides looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
            value
                .trim()
                .parse()
                .map_err(|_| format!("invalid value for {}: '{}'", key, value))
        }

        if let Some(v) = lookup("CESYNC_MERGE_TIMEOUT_MS") {
            self.sync.merge_timeout_ms = parse("CESYNC_MERGE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("CESYNC_RETRY_ATTEMPTS") {
            self.sync.retry.max_attempts = parse("CESYNC_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("CESYNC_MAX_CONCURRENT_MERGES") {
            self.sync.max_concurrent_merges = parse("CESYNC_MAX_CONCURRENT_MERGES", &v)?;
        }
        Ok(())
    }

    pub fn apply_flags(&mut self, flags: &FlagOverrides) {
        if let Some(port) = flags.port {
            self.server.port = port;
        }
        if let Some(dir) = &flags.scenarios_dir {
            self.server.scenarios_dir = Some(dir.clone());
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            retry: self.sync.retry,
            merge_timeout: Duration::from_millis(self.sync.merge_timeout_ms),
            max_concurrent_merges: self.sync.max_concurrent_merges,
            worker_idle: Duration::from_millis(self.sync.worker_idle_ms),
        }
    }

    pub fn round_trip_timeout(&self) -> Duration {
        Duration::from_millis(self.server.round_trip_timeout_ms)
    }
}
