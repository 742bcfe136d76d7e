use std::time::Duration;

use hatchlink_api::{DeviceSettings, DeviceState, PidParams};
use rand::Rng;

pub const AMBIENT_TEMPERATURE: f64 = 22.0;
pub const AMBIENT_HUMIDITY: f64 = 40.0;

/// °C per second gained at full heater output
const HEATING_RATE: f64 = 0.08;
/// Fraction of the gap to ambient lost per second
const HEAT_LOSS_RATE: f64 = 0.002;
const HUMIDIFY_RATE: f64 = 0.2;
const DRYING_RATE: f64 = 0.05;
/// Hysteresis around the humidity target
const HUMIDITY_BAND: f64 = 1.0;
/// Longest stretch integrated at once, so a late first poll stays cheap
const MAX_CATCH_UP: Duration = Duration::from_secs(60 * 60);
const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug)]
pub struct PidController {
    params: PidParams,
    min_output: f64,
    max_output: f64,
    previous_error: f64,
    integral: f64,
    last_output: f64,
    last_setpoint: f64,
}

impl PidController {
    pub fn new(params: PidParams) -> Self {
        Self {
            params,
            min_output: 0.0,
            max_output: 100.0,
            previous_error: 0.0,
            integral: 0.0,
            last_output: 0.0,
            last_setpoint: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.previous_error = 0.0;
        self.integral = 0.0;
        self.last_output = 0.0;
        self.last_setpoint = 0.0;
    }

    pub fn update(&mut self, setpoint: f64, measurement: f64, dt: f64) -> f64 {
        const DT_EPSILON: f64 = 1e-6;
        if dt < DT_EPSILON {
            return self.last_output;
        }

        // A setpoint jump of more than 10% invalidates the accumulated integral
        const SETPOINT_CHANGE_THRESHOLD: f64 = 0.1;
        if self.last_setpoint != 0.0
            && (setpoint - self.last_setpoint).abs() / self.last_setpoint.abs()
                > SETPOINT_CHANGE_THRESHOLD
        {
            self.integral = 0.0;
        }
        self.last_setpoint = setpoint;

        let error = setpoint - measurement;
        let p_term = self.params.kp * error;

        if self.params.ki > 0.0 {
            self.integral += error * dt;
            self.integral = self.integral.clamp(
                self.min_output / self.params.ki,
                self.max_output / self.params.ki,
            );
        } else {
            self.integral = 0.0;
        }
        let i_term = self.params.ki * self.integral;

        let d_term = self.params.kd * (error - self.previous_error) / dt;

        let output = (p_term + i_term + d_term).clamp(self.min_output, self.max_output);
        self.previous_error = error;
        self.last_output = output;

        output
    }

    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    pub fn set_params(&mut self, params: PidParams) {
        self.params = params;
        self.reset();
    }
}

/// Thermal and humidity model of an incubator chamber.
#[derive(Debug)]
pub struct Chamber {
    settings: DeviceSettings,
    pid: PidController,
    temperature: f64,
    humidity: f64,
    heater: bool,
    humidifier: bool,
    elapsed: Duration,
}

impl Chamber {
    pub fn new(settings: DeviceSettings) -> Self {
        Self {
            pid: PidController::new(settings.pid),
            settings,
            temperature: AMBIENT_TEMPERATURE,
            humidity: AMBIENT_HUMIDITY,
            heater: false,
            humidifier: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn set_targets(&mut self, temperature: f64, humidity: f64) {
        self.settings.target_temperature = temperature;
        self.settings.target_humidity = humidity;
    }

    pub fn set_motor(&mut self, interval_ms: u64, duration_ms: u64) {
        self.settings.motor_interval_ms = interval_ms;
        self.settings.motor_duration_ms = duration_ms;
    }

    pub fn set_pid(&mut self, params: PidParams) {
        self.settings.pid = params;
        self.pid.set_params(params);
    }

    /// Integrates the model over `dt` in one-second steps.
    pub fn advance(&mut self, dt: Duration) {
        let mut remaining = dt.min(MAX_CATCH_UP).as_secs_f64();

        while remaining > 0.0 {
            let step = remaining.min(1.0);
            self.step(step);
            remaining -= step;
        }
        self.elapsed += dt;
    }

    fn step(&mut self, dt: f64) {
        let output = self
            .pid
            .update(self.settings.target_temperature, self.temperature, dt);
        self.heater = output > 0.5;
        self.temperature += (output / 100.0 * HEATING_RATE
            - (self.temperature - AMBIENT_TEMPERATURE) * HEAT_LOSS_RATE)
            * dt;

        if self.humidity < self.settings.target_humidity - HUMIDITY_BAND {
            self.humidifier = true;
        } else if self.humidity > self.settings.target_humidity + HUMIDITY_BAND {
            self.humidifier = false;
        }
        let drift = if self.humidifier {
            HUMIDIFY_RATE
        } else {
            -DRYING_RATE
        };
        self.humidity = (self.humidity + drift * dt).clamp(0.0, 100.0);
    }

    /// Whether the turner runs and seconds left in the current phase.
    fn motor(&self) -> (bool, u32) {
        let interval = self.settings.motor_interval_ms.max(1);
        let duration = self.settings.motor_duration_ms.min(interval);
        let position = u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX) % interval;

        let (running, remaining_ms) = if position < duration {
            (true, duration - position)
        } else {
            (false, interval - position)
        };
        (running, u32::try_from(remaining_ms / 1000).unwrap_or(u32::MAX))
    }

    pub fn reading(&self) -> DeviceState {
        let mut rng = rand::rng();
        let (motor_running, motor_remaining_secs) = self.motor();
        let day = self.elapsed.as_secs_f64() / SECONDS_PER_DAY;

        DeviceState {
            temperature: round2(self.temperature + rng.random_range(-0.05..=0.05)),
            humidity: round2((self.humidity + rng.random_range(-0.2..=0.2)).clamp(0.0, 100.0)),
            heater: self.heater,
            humidifier: self.humidifier,
            motor_running,
            motor_remaining_secs,
            incubation_day: day as u16 + 1,
            pid_output: round2(self.pid.last_output()),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
