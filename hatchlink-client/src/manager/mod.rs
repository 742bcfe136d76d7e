//! Owns the single logical link to one controller.
//!
//! All traffic goes through [`DeviceLinkManager`]: a request line and its
//! reply form one exchange, and exchanges never interleave. The session slot
//! and the connection state change together under one lock, so observers
//! never see `Connected` without a session behind it.

mod monitor;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hatchlink_api::{
    Command, ConnectionState, DecodeError, DeviceSettings, ErrorEvent, Reply, TelemetrySample,
    decode,
};
use time::OffsetDateTime;
use tokio::sync::{RwLock, watch};
use tokio::time::{Instant, timeout_at};

use crate::cache::TelemetryCache;
use crate::configs::LinkConfig;
use crate::error::{Error, Result};
use crate::events::{ErrorChannel, ErrorSubscription};
use crate::lock;
use crate::retry::RetryPolicy;
use crate::session::{Connector, LinkSession, TcpConnector};
use crate::stats::{LinkCounters, LinkStats};
use crate::storage::{
    MemorySampleStore, MemorySettingsStore, NullSink, SampleStore, SettingsStore, TelemetrySink,
};

use monitor::MonitorHandle;

/// Attempts made when a command finds the link down.
pub const IMPLICIT_CONNECT_ATTEMPTS: u32 = 3;

/// A request paired with the raw line that answered it.
pub(crate) struct Exchange {
    pub raw: String,
    pub reply: std::result::Result<Reply, DecodeError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExchangeFailure {
    /// No live session, or it was taken away by `disconnect`
    NotConnected,
    Encode,
    /// The device stayed silent past the command timeout
    NoReply,
    LinkLost,
}

pub struct DeviceLinkManager {
    config: LinkConfig,
    connector: Arc<dyn Connector>,
    sample_store: Arc<dyn SampleStore>,
    settings_store: Arc<dyn SettingsStore>,
    sink: Arc<dyn TelemetrySink>,
    session: Mutex<Option<Arc<dyn LinkSession>>>,
    state: watch::Sender<ConnectionState>,
    exchange_lock: tokio::sync::Mutex<()>,
    connect_lock: tokio::sync::Mutex<()>,
    /// Bumped by every disconnect; a connect that started in an older epoch
    /// must not install its session
    epoch: AtomicU64,
    settings: RwLock<DeviceSettings>,
    cache: TelemetryCache,
    errors: ErrorChannel,
    counters: LinkCounters,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl DeviceLinkManager {
    /// Creates a manager talking TCP, backed by in-memory stores.
    pub fn new(config: LinkConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            config,
            connector: Arc::new(TcpConnector),
            sample_store: Arc::new(MemorySampleStore::new()),
            settings_store: Arc::new(MemorySettingsStore::new()),
            sink: Arc::new(NullSink),
            session: Mutex::new(None),
            state,
            exchange_lock: tokio::sync::Mutex::new(()),
            connect_lock: tokio::sync::Mutex::new(()),
            epoch: AtomicU64::new(0),
            settings: RwLock::new(DeviceSettings::default()),
            cache: TelemetryCache::new(),
            errors: ErrorChannel::new(),
            counters: LinkCounters::default(),
            monitor: Mutex::new(None),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_sample_store(mut self, store: Arc<dyn SampleStore>) -> Self {
        self.sample_store = store;
        self
    }

    pub fn with_settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = store;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Connected with an open session behind it.
    pub fn is_device_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected && self.live_session().is_some()
    }

    pub fn telemetry(&self) -> &TelemetryCache {
        &self.cache
    }

    pub fn latest_sample(&self) -> Option<TelemetrySample> {
        self.cache.latest()
    }

    pub fn errors(&self) -> &ErrorChannel {
        &self.errors
    }

    pub fn subscribe_errors(&self) -> ErrorSubscription {
        self.errors.subscribe()
    }

    pub fn stats(&self) -> LinkStats {
        self.counters.snapshot()
    }

    pub async fn current_settings(&self) -> DeviceSettings {
        self.settings.read().await.clone()
    }

    /// Opens and verifies a session, trying up to `retry_count` times.
    ///
    /// Each attempt opens a fresh session and must get a decodable answer to
    /// `ping` within the attempt timeout. Returns immediately when already
    /// connected. Concurrent callers are serialized and the later ones
    /// observe the outcome of the first.
    pub async fn connect(&self, retry_count: u32) -> bool {
        self.connect_in(retry_count, None).await
    }

    /// Like [`connect`](Self::connect), but gives up without an attempt when
    /// a disconnect happened after `epoch` was read.
    pub(crate) async fn connect_in(&self, retry_count: u32, epoch: Option<u64>) -> bool {
        let _connecting = self.connect_lock.lock().await;
        let epoch = epoch.unwrap_or_else(|| self.epoch.load(Ordering::Acquire));
        if self.epoch.load(Ordering::Acquire) != epoch {
            return false;
        }
        if self.is_device_connected() {
            return true;
        }

        let stale = {
            let mut slot = lock(&self.session);
            if self.epoch.load(Ordering::Acquire) != epoch {
                return false;
            }
            self.set_state(ConnectionState::Connecting);
            slot.take()
        };
        if let Some(stale) = stale {
            stale.close().await;
        }

        let attempts = retry_count.max(1);
        let policy = RetryPolicy::fixed(attempts, self.config.retry_delay);
        let opened = policy
            .retry(move |attempt| self.attempt(attempt, attempts))
            .await;

        let Some(session) = opened else {
            let current = {
                let _slot = lock(&self.session);
                let current = self.epoch.load(Ordering::Acquire) == epoch;
                if current {
                    self.set_state(ConnectionState::Failed);
                }
                current
            };
            if current {
                tracing::warn!(
                    "Device at {} unreachable after {} attempts",
                    self.config.endpoint,
                    attempts
                );
                self.errors.publish(ErrorEvent::ConnectionError);
            }
            return false;
        };

        let installed = {
            let mut slot = lock(&self.session);
            let current = self.epoch.load(Ordering::Acquire) == epoch;
            if current {
                *slot = Some(session.clone());
                self.set_state(ConnectionState::Connected);
            }
            current
        };

        if !installed {
            session.close().await;
            tracing::info!("Connect to {} abandoned after disconnect", self.config.endpoint);
            return false;
        }

        LinkCounters::bump(&self.counters.connections_established);
        tracing::info!("Connected to {}", self.config.endpoint);
        true
    }

    /// Closes the session and stops the monitor. Idempotent.
    ///
    /// An exchange blocked on a read returns `None` within the session's
    /// read quantum, and a connect in progress gives up its result.
    pub async fn disconnect(&self) {
        // Bumped before the monitor is told to stop, so a reconnect it is
        // about to start already belongs to the old epoch
        let session = {
            let mut slot = lock(&self.session);
            self.epoch.fetch_add(1, Ordering::AcqRel);
            self.set_state(ConnectionState::Disconnected);
            slot.take()
        };

        // Dropping the join handle detaches the task; it exits on the stop signal
        drop(self.stop_monitor());

        if let Some(session) = session {
            session.close().await;
            tracing::info!("Disconnected from {}", self.config.endpoint);
        }
    }

    /// Disconnects and waits for the monitor task to finish.
    pub async fn shutdown(&self) {
        let task = self.stop_monitor();
        self.disconnect().await;

        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!("Monitor task panicked: {}", e);
                }
            }
        }
    }

    /// Sends `command` and returns the first reply line.
    ///
    /// Connects implicitly when the link is down. The raw line is returned
    /// even if it does not decode; that case is reported as
    /// `DataParsingError`. `None` means no reply: unreachable, timed out,
    /// link lost or interrupted by `disconnect`.
    pub async fn send_command(&self, command: &Command) -> Option<String> {
        if !self.is_device_connected() && !self.connect(IMPLICIT_CONNECT_ATTEMPTS).await {
            tracing::warn!(
                "'{}' not sent, device at {} unreachable",
                command.name(),
                self.config.endpoint
            );
            return None;
        }

        match self.exchange(command).await {
            Ok(exchange) => Some(exchange.raw),
            Err(failure) => {
                self.report_failure(failure);
                None
            }
        }
    }

    /// Saves `settings` locally, then pushes them to the device.
    ///
    /// Returns `false` when the device is not connected (the settings stay
    /// saved) or when a command of the push gets no reply. On success the
    /// device is given a moment to settle and is then polled once.
    pub async fn apply_settings(&self, settings: DeviceSettings) -> bool {
        if let Err(e) = self.settings_store.save_settings(&settings).await {
            tracing::error!("Failed to save settings: {}", e);
            self.errors.publish(ErrorEvent::GenericError(e.to_string()));
        }
        *self.settings.write().await = settings.clone();

        if !self.is_device_connected() {
            tracing::warn!(
                "Settings saved, device at {} is not connected",
                self.config.endpoint
            );
            self.errors.publish(ErrorEvent::ConnectionError);
            return false;
        }

        for command in settings.commands() {
            match self.exchange(&command).await {
                Ok(Exchange { raw, reply: Ok(reply) }) if reply.status() == Some("error") => {
                    tracing::warn!("Device rejected '{}': {}", command.name(), raw);
                }
                Ok(_) => {}
                Err(failure) => {
                    tracing::warn!(
                        "Settings push aborted at '{}': {:?}",
                        command.name(),
                        failure
                    );
                    self.report_failure(failure);
                    return false;
                }
            }
        }

        tracing::info!("Settings applied to {}", self.config.endpoint);
        tokio::time::sleep(self.config.settle_delay).await;
        self.poll_now().await;
        true
    }

    /// Loads the last saved settings and makes them current.
    pub async fn restore_settings(&self) -> DeviceSettings {
        match self.settings_store.load_last_known_settings().await {
            Ok(settings) => {
                *self.settings.write().await = settings.clone();
                settings
            }
            Err(e) => {
                tracing::warn!("Failed to load saved settings: {}", e);
                self.errors.publish(ErrorEvent::GenericError(e.to_string()));
                self.current_settings().await
            }
        }
    }

    pub async fn history(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<TelemetrySample>> {
        self.sample_store.read_range(start, end).await
    }

    /// Deletes stored samples older than `retention`; returns how many went.
    pub async fn prune_history(&self, retention: Duration) -> usize {
        let cutoff = time::Duration::try_from(retention)
            .ok()
            .and_then(|retention| OffsetDateTime::now_utc().checked_sub(retention));
        let Some(cutoff) = cutoff else {
            return 0;
        };

        match self.sample_store.delete_older_than(cutoff).await {
            Ok(removed) => {
                if removed > 0 {
                    tracing::info!("Pruned {} samples", removed);
                }
                removed
            }
            Err(e) => {
                tracing::warn!("Failed to prune history: {}", e);
                self.errors.publish(ErrorEvent::GenericError(e.to_string()));
                0
            }
        }
    }

    /// One serialized request/reply round trip on the current session.
    pub(crate) async fn exchange(
        &self,
        command: &Command,
    ) -> std::result::Result<Exchange, ExchangeFailure> {
        let line = command.encode().map_err(|e| {
            tracing::error!("Cannot encode '{}': {}", command.name(), e);
            self.errors.publish(ErrorEvent::GenericError(e.to_string()));
            ExchangeFailure::Encode
        })?;

        let _exchange = self.exchange_lock.lock().await;
        let session = self.live_session().ok_or(ExchangeFailure::NotConnected)?;

        LinkCounters::bump(&self.counters.commands_sent);
        tracing::debug!("-> {}", line.trim_end());

        if let Err(e) = session.write_line(&line).await {
            return Err(self.on_link_error(&session, command, e).await);
        }

        let deadline = Instant::now() + self.config.command_timeout;
        let raw = match session.read_line(deadline).await {
            Ok(raw) => raw,
            Err(e) => return Err(self.on_link_error(&session, command, e).await),
        };

        LinkCounters::bump(&self.counters.replies_received);
        tracing::debug!("<- {}", raw);

        let reply = decode(raw.as_bytes());
        if let Err(e) = &reply {
            LinkCounters::bump(&self.counters.parse_errors);
            tracing::warn!("Unreadable reply to '{}': {}", command.name(), e);
            self.errors.publish(ErrorEvent::DataParsingError);
        }

        Ok(Exchange { raw, reply })
    }

    async fn on_link_error(
        &self,
        session: &Arc<dyn LinkSession>,
        command: &Command,
        error: Error,
    ) -> ExchangeFailure {
        let timed_out = matches!(error, Error::Timeout);
        if timed_out {
            LinkCounters::bump(&self.counters.timeouts);
        }

        if !self.retire(session).await {
            tracing::debug!("'{}' interrupted by disconnect", command.name());
            return ExchangeFailure::NotConnected;
        }

        if timed_out {
            tracing::warn!(
                "No reply to '{}' from {} within {:?}",
                command.name(),
                self.config.endpoint,
                self.config.command_timeout
            );
            ExchangeFailure::NoReply
        } else {
            tracing::warn!(
                "Link to {} lost during '{}': {}",
                self.config.endpoint,
                command.name(),
                error
            );
            self.errors.publish(ErrorEvent::ConnectionError);
            ExchangeFailure::LinkLost
        }
    }

    /// Surfaces a missed reply to callers outside the monitor, which probes
    /// liveness instead. Other failures were reported where they happened.
    fn report_failure(&self, failure: ExchangeFailure) {
        if failure == ExchangeFailure::NoReply {
            self.errors.publish(ErrorEvent::ConnectionError);
        }
    }

    /// Drops `session` from the slot if it is still the current one and
    /// marks the link failed. A late reply could otherwise be taken for the
    /// answer to the next request, so the session is always closed.
    async fn retire(&self, session: &Arc<dyn LinkSession>) -> bool {
        let retired = {
            let mut slot = lock(&self.session);
            let current = slot
                .as_ref()
                .is_some_and(|installed| Arc::ptr_eq(installed, session));
            if current {
                slot.take();
                self.set_state(ConnectionState::Failed);
            }
            current
        };

        session.close().await;
        retired
    }

    async fn attempt(&self, attempt: u32, attempts: u32) -> Option<Arc<dyn LinkSession>> {
        LinkCounters::bump(&self.counters.connect_attempts);
        tracing::debug!(
            "Connecting to {} (attempt {}/{})",
            self.config.endpoint,
            attempt,
            attempts
        );

        let deadline = Instant::now() + self.config.attempt_timeout;
        match self.open_verified(deadline).await {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(
                    "Attempt {}/{} to {} failed: {}",
                    attempt,
                    attempts,
                    self.config.endpoint,
                    e
                );
                None
            }
        }
    }

    /// Opens a new session and checks that the firmware answers `ping`
    /// before `deadline`.
    async fn open_verified(&self, deadline: Instant) -> Result<Arc<dyn LinkSession>> {
        let budget = deadline.saturating_duration_since(Instant::now());
        let session = timeout_at(deadline, self.connector.open(&self.config.endpoint, budget))
            .await
            .map_err(|_| Error::Timeout)??;

        if let Err(e) = handshake(&*session, deadline).await {
            session.close().await;
            return Err(e);
        }

        Ok(session)
    }

    fn live_session(&self) -> Option<Arc<dyn LinkSession>> {
        lock(&self.session).clone().filter(|session| session.is_open())
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!("Link to {}: {} -> {}", self.config.endpoint, previous, next);
        }
    }
}

async fn handshake(session: &dyn LinkSession, deadline: Instant) -> Result<()> {
    let ping = Command::ping().encode()?;
    timeout_at(deadline, session.write_line(&ping))
        .await
        .map_err(|_| Error::Timeout)??;

    let raw = session.read_line(deadline).await?;
    decode(raw.as_bytes())?;

    Ok(())
}
