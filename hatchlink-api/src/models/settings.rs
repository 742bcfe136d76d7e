use serde::{Deserialize, Serialize};

use crate::message::Command;

/// Coefficients of the controller's temperature loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidParams {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidParams {
    fn default() -> Self {
        Self {
            kp: 2.0,
            ki: 0.5,
            kd: 1.0,
        }
    }
}

/// Setpoints and timings pushed to the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Target chamber temperature (°C)
    pub target_temperature: f64,
    /// Target relative humidity (%)
    pub target_humidity: f64,
    /// Time between two egg turns
    pub motor_interval_ms: u64,
    /// Length of one egg turn
    pub motor_duration_ms: u64,
    pub pid: PidParams,
}

impl DeviceSettings {
    /// The command sequence that applies these settings on the device.
    pub fn commands(&self) -> Vec<Command> {
        vec![
            Command::set_target(self.target_temperature, self.target_humidity),
            Command::set_motor(self.motor_interval_ms, self.motor_duration_ms),
            Command::set_pid(self.pid.kp, self.pid.ki, self.pid.kd),
        ]
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            target_temperature: 37.7,
            target_humidity: 55.0,
            motor_interval_ms: 2 * 60 * 60 * 1000,
            motor_duration_ms: 15 * 1000,
            pid: PidParams::default(),
        }
    }
}
