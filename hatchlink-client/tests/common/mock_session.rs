use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hatchlink_client::{Connector, Endpoint, Error, LinkSession, Result};
use serde_json::{Value, json};
use tokio::time::Instant;

const READ_POLL: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct Behaviour {
    online: AtomicBool,
    hang_on_connect: AtomicBool,
    silent: AtomicBool,
    ignore_sensor_requests: AtomicBool,
    echo: AtomicBool,
    temperature: Mutex<f64>,
    sensor_reply: Mutex<Option<String>>,
    reply_delay: Mutex<Duration>,
    received: Mutex<Vec<String>>,
    connects: AtomicUsize,
}

/// Scripted controller answering through [`FakeSession`]s.
#[derive(Debug, Clone)]
pub struct FakeDevice {
    inner: Arc<Behaviour>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Behaviour {
                online: AtomicBool::new(true),
                hang_on_connect: AtomicBool::new(false),
                silent: AtomicBool::new(false),
                ignore_sensor_requests: AtomicBool::new(false),
                echo: AtomicBool::new(false),
                temperature: Mutex::new(37.5),
                sensor_reply: Mutex::new(None),
                reply_delay: Mutex::new(Duration::ZERO),
                received: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
            }),
        }
    }

    pub fn offline() -> Self {
        let device = Self::new();
        device.set_online(false);
        device
    }

    /// Refuses new connections and breaks open sessions on their next write.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    /// New connections never complete.
    pub fn set_hang_on_connect(&self, hang: bool) {
        self.inner.hang_on_connect.store(hang, Ordering::SeqCst);
    }

    /// Accepts requests without answering any of them.
    pub fn set_silent(&self, silent: bool) {
        self.inner.silent.store(silent, Ordering::SeqCst);
    }

    /// Answers everything except `get_sensor_data`.
    pub fn set_ignore_sensor_requests(&self, ignore: bool) {
        self.inner.ignore_sensor_requests.store(ignore, Ordering::SeqCst);
    }

    /// Answers every non-ping request with the request line itself.
    pub fn set_echo(&self, echo: bool) {
        self.inner.echo.store(echo, Ordering::SeqCst);
    }

    pub fn set_temperature(&self, temperature: f64) {
        *self.inner.temperature.lock().unwrap() = temperature;
    }

    /// Raw line sent instead of the sensor payload.
    pub fn set_sensor_reply(&self, reply: Option<&str>) {
        *self.inner.sensor_reply.lock().unwrap() = reply.map(str::to_owned);
    }

    pub fn set_reply_delay(&self, delay: Duration) {
        *self.inner.reply_delay.lock().unwrap() = delay;
    }

    /// Command names received so far, across all sessions.
    pub fn received_commands(&self) -> Vec<String> {
        self.inner.received.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    fn answer(&self, line: &str) -> Option<String> {
        let request: Value = serde_json::from_str(line).ok()?;
        let name = request["cmd"].as_str().unwrap_or_default().to_owned();
        self.inner.received.lock().unwrap().push(name.clone());

        if self.inner.silent.load(Ordering::SeqCst) {
            return None;
        }

        match name.as_str() {
            "ping" => Some(json!({ "status": "ok" }).to_string()),
            "get_sensor_data" => {
                if self.inner.ignore_sensor_requests.load(Ordering::SeqCst) {
                    return None;
                }
                if let Some(reply) = self.inner.sensor_reply.lock().unwrap().clone() {
                    return Some(reply);
                }
                Some(sensor_payload(*self.inner.temperature.lock().unwrap()))
            }
            _ if self.inner.echo.load(Ordering::SeqCst) => Some(line.to_owned()),
            _ => Some(json!({ "status": "ok" }).to_string()),
        }
    }
}

pub fn sensor_payload(temperature: f64) -> String {
    json!({
        "type": "sensor_data",
        "temp": temperature,
        "hum": 55.0,
        "heater": true,
        "humidifier": false,
        "motor": false,
        "motor_remaining": 120,
        "day": 3,
        "pid_output": 20.5
    })
    .to_string()
}

pub struct FakeConnector {
    device: FakeDevice,
}

impl FakeConnector {
    pub fn new(device: FakeDevice) -> Self {
        Self { device }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(
        &self,
        _endpoint: &Endpoint,
        _connect_timeout: Duration,
    ) -> Result<Arc<dyn LinkSession>> {
        self.device.inner.connects.fetch_add(1, Ordering::SeqCst);

        if self.device.inner.hang_on_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.device.is_online() {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into());
        }

        Ok(Arc::new(FakeSession {
            device: self.device.clone(),
            inbox: Mutex::new(VecDeque::new()),
            open: AtomicBool::new(true),
        }))
    }
}

pub struct FakeSession {
    device: FakeDevice,
    /// Replies with the instant they become readable
    inbox: Mutex<VecDeque<(Instant, String)>>,
    open: AtomicBool,
}

#[async_trait]
impl LinkSession for FakeSession {
    async fn write_line(&self, line: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        if !self.device.is_online() {
            self.open.store(false, Ordering::SeqCst);
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone").into());
        }

        if let Some(reply) = self.device.answer(line.trim_end()) {
            let delay = *self.device.inner.reply_delay.lock().unwrap();
            self.inbox
                .lock()
                .unwrap()
                .push_back((Instant::now() + delay, reply));
        }
        Ok(())
    }

    async fn read_line(&self, deadline: Instant) -> Result<String> {
        loop {
            if !self.is_open() {
                return Err(Error::Closed);
            }

            let now = Instant::now();
            {
                let mut inbox = self.inbox.lock().unwrap();
                if inbox.front().is_some_and(|(ready_at, _)| *ready_at <= now) {
                    if let Some((_, line)) = inbox.pop_front() {
                        return Ok(line);
                    }
                }
            }

            if now >= deadline {
                return Err(Error::Timeout);
            }
            tokio::time::sleep(READ_POLL.min(deadline - now)).await;
        }
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
