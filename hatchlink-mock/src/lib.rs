//! Stand-in for the incubator controller firmware, speaking the same
//! line-delimited JSON over TCP.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use hatchlink_api::message::{GET_SENSOR_DATA, PING, SENSOR_DATA_TYPE, SET_MOTOR, SET_PID, SET_TARGET};
use hatchlink_api::{DeviceSettings, DeviceState, PidParams};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{oneshot, watch};

use crate::simulate::Chamber;

pub mod settings;
pub mod simulate;

#[derive(Serialize)]
struct SensorReply<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(flatten)]
    state: DeviceState,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct ControlState {
    silent: AtomicBool,
    garbage: AtomicBool,
    temperature: Mutex<Option<f64>>,
    reply_delay_ms: AtomicU64,
    received: Mutex<Vec<String>>,
    connections: AtomicUsize,
}

/// Fault injection and inspection handle, shared with a running mock.
#[derive(Debug, Clone, Default)]
pub struct MockControls {
    inner: Arc<ControlState>,
}

impl MockControls {
    /// Keep reading commands but never answer them.
    pub fn set_silent(&self, silent: bool) {
        self.inner.silent.store(silent, Ordering::SeqCst);
    }

    /// Wrap every reply in stray bytes.
    pub fn set_garbage(&self, garbage: bool) {
        self.inner.garbage.store(garbage, Ordering::SeqCst);
    }

    /// Report a fixed primary temperature instead of the simulated one.
    pub fn override_temperature(&self, temperature: Option<f64>) {
        *lock(&self.inner.temperature) = temperature;
    }

    pub fn set_reply_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.inner.reply_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Names of all commands received so far, in arrival order.
    pub fn received_commands(&self) -> Vec<String> {
        lock(&self.inner.received).clone()
    }

    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }

    fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.inner.reply_delay_ms.load(Ordering::SeqCst))
    }
}

#[derive(Clone)]
struct Device {
    chamber: Arc<Mutex<(Chamber, Instant)>>,
    controls: MockControls,
}

impl Device {
    fn respond(&self, line: &str) -> Option<String> {
        let request = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(fields)) => fields,
            _ => {
                lock(&self.controls.inner.received).push(line.to_owned());
                return self.frame(error_reply("invalid request"));
            }
        };

        let name = request
            .get("cmd")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        lock(&self.controls.inner.received).push(name.clone());

        if self.controls.inner.silent.load(Ordering::SeqCst) {
            return None;
        }

        let reply = match name.as_str() {
            PING => ok_reply(),
            GET_SENSOR_DATA => self.sensor_reply(),
            SET_TARGET => match (number(&request, "temp"), number(&request, "hum")) {
                (Some(temperature), Some(humidity)) => {
                    lock(&self.chamber).0.set_targets(temperature, humidity);
                    ok_reply()
                }
                _ => error_reply("set_target needs temp and hum"),
            },
            SET_MOTOR => match (integer(&request, "interval_ms"), integer(&request, "duration_ms")) {
                (Some(interval), Some(duration)) => {
                    lock(&self.chamber).0.set_motor(interval, duration);
                    ok_reply()
                }
                _ => error_reply("set_motor needs interval_ms and duration_ms"),
            },
            SET_PID => match (number(&request, "kp"), number(&request, "ki"), number(&request, "kd")) {
                (Some(kp), Some(ki), Some(kd)) => {
                    lock(&self.chamber).0.set_pid(PidParams { kp, ki, kd });
                    ok_reply()
                }
                _ => error_reply("set_pid needs kp, ki and kd"),
            },
            "" => error_reply("missing cmd"),
            other => error_reply(&format!("unknown command: {other}")),
        };

        self.frame(reply)
    }

    fn sensor_reply(&self) -> Value {
        let mut state = {
            let mut guard = lock(&self.chamber);
            let (chamber, last_update) = &mut *guard;
            let now = Instant::now();
            chamber.advance(now.duration_since(*last_update));
            *last_update = now;
            chamber.reading()
        };

        if let Some(temperature) = *lock(&self.controls.inner.temperature) {
            state.temperature = temperature;
        }

        serde_json::to_value(SensorReply {
            kind: SENSOR_DATA_TYPE,
            state,
        })
        .unwrap_or_else(|e| error_reply(&e.to_string()))
    }

    fn frame(&self, reply: Value) -> Option<String> {
        let mut line = reply.to_string();
        if self.controls.inner.garbage.load(Ordering::SeqCst) {
            line = format!("\u{1}\u{1}#{line}~~");
        }
        line.push('\n');
        Some(line)
    }
}

fn ok_reply() -> Value {
    json!({ "status": "ok" })
}

fn error_reply(message: &str) -> Value {
    json!({ "status": "error", "message": message })
}

fn number(request: &Map<String, Value>, key: &str) -> Option<f64> {
    request.get(key).and_then(Value::as_f64)
}

fn integer(request: &Map<String, Value>, key: &str) -> Option<u64> {
    request.get(key).and_then(Value::as_u64)
}

pub struct MockIncubator {
    listener: TcpListener,
    device: Device,
}

impl MockIncubator {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
            device: Device {
                chamber: Arc::new(Mutex::new((
                    Chamber::new(DeviceSettings::default()),
                    Instant::now(),
                ))),
                controls: MockControls::default(),
            },
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn controls(&self) -> MockControls {
        self.device.controls.clone()
    }

    /// Settings the simulated firmware currently runs with.
    pub fn settings(&self) -> DeviceSettings {
        lock(&self.device.chamber).0.settings().clone()
    }

    /// Serves connections until the returned sender fires or is dropped.
    /// Open connections are closed as well.
    pub fn start(self) -> oneshot::Sender<()> {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("Mock incubator listening on {}", addr);
        }

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        tracing::info!("Mock incubator shutting down");
                        break;
                    },
                    accepted = self.listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                let device = self.device.clone();
                                let shutdown = shutdown_rx.clone();
                                tokio::spawn(async move {
                                    handle_connection(stream, addr, device, shutdown).await;
                                });
                            },
                            Err(e) => {
                                tracing::error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                }
            }
            shutdown_tx.send_replace(true);
        });

        stop_tx
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    device: Device,
    mut shutdown: watch::Receiver<bool>,
) {
    device.controls.inner.connections.fetch_add(1, Ordering::SeqCst);
    tracing::info!("Client {} connected", addr);

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.changed() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read from {}: {}", addr, e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        tracing::debug!("{} -> {}", addr, line);
        let Some(reply) = device.respond(line) else {
            continue;
        };

        let delay = device.controls.reply_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        tracing::debug!("{} <- {}", addr, reply.trim_end());
        if let Err(e) = write_half.write_all(reply.as_bytes()).await {
            tracing::warn!("Failed to write to {}: {}", addr, e);
            break;
        }
    }

    tracing::info!("Client {} disconnected", addr);
}
