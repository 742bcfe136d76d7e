use std::error::Error;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mock {
    pub host: String,
    pub port: u16,
    /// Latency added before every reply
    #[serde(default)]
    pub reply_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub mock: Mock,
}

impl Settings {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        Ok(toml::from_str(include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../",
            "configs/default.toml"
        )))?)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.mock.host, self.mock.port)
    }

    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.mock.reply_delay_ms)
    }
}
