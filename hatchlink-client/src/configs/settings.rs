use std::env;
use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Mode whose overrides apply when `RUN_MODE` is unset; it has no file of
/// its own.
pub const DEFAULT_RUN_MODE: &str = "production";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub retry_count: u32,
    pub attempt_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub command_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub reconnect_backoff_max_ms: u64,
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub retention_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub device: Device,
    pub link: Link,
    pub telemetry: Telemetry,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load("configs")
    }

    /// Layers `default`, the `RUN_MODE` file (optional) and `HATCHLINK__*`
    /// environment variables found under `dir`.
    ///
    /// Without `RUN_MODE` the device defaults apply; `RUN_MODE=development`
    /// points the link at a local mock.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or(DEFAULT_RUN_MODE.into());
        Self::load_mode(dir, &run_mode)
    }

    pub fn load_mode(dir: impl AsRef<Path>, run_mode: &str) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();

        Config::builder()
            .add_source(File::with_name(&dir.join("default").to_string_lossy()))
            .add_source(File::with_name(&dir.join(run_mode).to_string_lossy()).required(false))
            .add_source(
                Environment::with_prefix("HATCHLINK")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}
