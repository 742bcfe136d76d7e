use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::DeviceSettings;
use crate::codec::DecodeError;

/// Live readings reported by the controller in a `sensor_data` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Primary chamber temperature (°C)
    #[serde(rename = "temp")]
    pub temperature: f64,
    /// Relative humidity (%)
    #[serde(rename = "hum", default)]
    pub humidity: f64,
    /// Heater relay engaged
    #[serde(default)]
    pub heater: bool,
    /// Humidifier engaged
    #[serde(default)]
    pub humidifier: bool,
    /// Egg-turning motor running
    #[serde(rename = "motor", default)]
    pub motor_running: bool,
    /// Seconds until the next turn (or until the current turn ends)
    #[serde(rename = "motor_remaining", default)]
    pub motor_remaining_secs: u32,
    /// Incubation day, 0 when no cycle is running
    #[serde(rename = "day", default)]
    pub incubation_day: u16,
    /// Output of the controller's temperature loop
    #[serde(default)]
    pub pid_output: f64,
}

impl DeviceState {
    pub(crate) fn deserialize_map(fields: &Map<String, Value>) -> Result<Self, DecodeError> {
        serde_json::from_value(Value::Object(fields.clone()))
            .map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}

/// Inclusive bounds a primary temperature must fall in to be believed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlausibleRange {
    pub min: f64,
    pub max: f64,
}

impl PlausibleRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && (self.min..=self.max).contains(&value)
    }
}

impl Default for PlausibleRange {
    fn default() -> Self {
        Self::new(10.0, 45.0)
    }
}

/// A validated, timestamped reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Device readings
    pub state: DeviceState,
    /// Settings in force when the reading was accepted
    pub settings: DeviceSettings,
    /// Acceptance time
    pub timestamp: OffsetDateTime,
}

impl TelemetrySample {
    pub fn new(state: DeviceState, settings: DeviceSettings) -> Self {
        Self::at(state, settings, OffsetDateTime::now_utc())
    }

    pub fn at(state: DeviceState, settings: DeviceSettings, timestamp: OffsetDateTime) -> Self {
        Self {
            state,
            settings,
            timestamp,
        }
    }

    pub fn is_plausible(&self, range: &PlausibleRange) -> bool {
        range.contains(self.state.temperature)
    }
}
