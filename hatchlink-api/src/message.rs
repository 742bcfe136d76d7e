use serde_json::{Map, Number, Value};

use crate::codec::{self, CodecError, DecodeError};
use crate::models::DeviceState;

pub const PING: &str = "ping";
pub const GET_SENSOR_DATA: &str = "get_sensor_data";
pub const SET_TARGET: &str = "set_target";
pub const SET_MOTOR: &str = "set_motor";
pub const SET_PID: &str = "set_pid";

/// Value of the `type` field tagging telemetry replies
pub const SENSOR_DATA_TYPE: &str = "sensor_data";

/// Scalar command parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Param {
    pub(crate) fn to_json(&self, key: &str) -> Result<Value, CodecError> {
        Ok(match self {
            Param::Text(text) => Value::String(text.clone()),
            Param::Int(value) => Value::Number(Number::from(*value)),
            Param::Float(value) => Number::from_f64(*value)
                .map(Value::Number)
                .ok_or_else(|| CodecError::NonFinite(key.to_owned()))?,
            Param::Bool(value) => Value::Bool(*value),
        })
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Text(value.to_owned())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Text(value)
    }
}

impl From<i32> for Param {
    fn from(value: i32) -> Self {
        Param::Int(value.into())
    }
}

impl From<u32> for Param {
    fn from(value: u32) -> Self {
        Param::Int(value.into())
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Int(value)
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::Float(value)
    }
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Param::Bool(value)
    }
}

/// A named request with ordered scalar parameters.
///
/// Built by value; once handed to the link it is never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: String,
    params: Vec<(String, Param)>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Appends a parameter, or replaces the value of an existing key in place.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Param>) -> Self {
        let key = key.into();
        let value = value.into();

        match self.params.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.params.push((key, value)),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[(String, Param)] {
        &self.params
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        codec::encode(self)
    }

    /// Handshake probe
    pub fn ping() -> Self {
        Self::new(PING)
    }

    pub fn get_sensor_data() -> Self {
        Self::new(GET_SENSOR_DATA)
    }

    pub fn set_target(temperature: f64, humidity: f64) -> Self {
        Self::new(SET_TARGET)
            .with_param("temp", temperature)
            .with_param("hum", humidity)
    }

    pub fn set_motor(interval_ms: u64, duration_ms: u64) -> Self {
        Self::new(SET_MOTOR)
            .with_param("interval_ms", saturating_i64(interval_ms))
            .with_param("duration_ms", saturating_i64(duration_ms))
    }

    pub fn set_pid(kp: f64, ki: f64, kd: f64) -> Self {
        Self::new(SET_PID)
            .with_param("kp", kp)
            .with_param("ki", ki)
            .with_param("kd", kd)
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// A decoded reply object
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    fields: Map<String, Value>,
}

impl Reply {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn status(&self) -> Option<&str> {
        self.fields.get("status").and_then(Value::as_str)
    }

    /// Replies carrying a `status` field acknowledge a command; they are
    /// protocol-level and never telemetry.
    pub fn is_ack(&self) -> bool {
        self.fields.contains_key("status")
    }

    pub fn kind(&self) -> Option<&str> {
        self.fields.get("type").and_then(Value::as_str)
    }

    pub fn is_telemetry(&self) -> bool {
        !self.is_ack() && self.kind() == Some(SENSOR_DATA_TYPE)
    }

    /// Interprets the reply as a live device reading.
    pub fn device_state(&self) -> Result<DeviceState, DecodeError> {
        DeviceState::deserialize_map(&self.fields)
    }
}
