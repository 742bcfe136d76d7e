use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::FutureExt;
use hatchlink_api::{Command, ErrorEvent, TelemetrySample};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{DeviceLinkManager, ExchangeFailure};
use crate::lock;
use crate::stats::LinkCounters;

pub(super) struct MonitorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DeviceLinkManager {
    /// Starts the background poll loop and returns a receiver of accepted
    /// samples. Calling it again while the loop runs only subscribes.
    ///
    /// The loop reconnects when the link is down, pausing per the reconnect
    /// backoff between failed rounds, and otherwise polls the device every
    /// poll interval. It runs until [`disconnect`](Self::disconnect) or
    /// [`shutdown`](Self::shutdown).
    pub fn start_monitor(self: &Arc<Self>) -> watch::Receiver<Option<TelemetrySample>> {
        let mut slot = lock(&self.monitor);
        let running = slot.as_ref().is_some_and(|handle| !handle.task.is_finished());

        if !running {
            let (stop, stop_rx) = watch::channel(false);
            let epoch = self.epoch.load(Ordering::Acquire);
            let manager = Arc::clone(self);
            let task = tokio::spawn(async move { manager.run_monitor(stop_rx, epoch).await });
            *slot = Some(MonitorHandle { stop, task });
        }

        self.cache.subscribe()
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.monitor)
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    pub(super) fn stop_monitor(&self) -> Option<JoinHandle<()>> {
        let handle = lock(&self.monitor).take()?;
        handle.stop.send_replace(true);
        Some(handle.task)
    }

    /// Requests one reading. A valid one is cached, persisted and forwarded
    /// to the sink before it is returned.
    ///
    /// A missed reply triggers a liveness probe on a fresh connection: a
    /// device that fails it is reported as `ConnectionError`, one that
    /// passes as `TimeoutError`. Either way the link stays failed until the
    /// next connect.
    pub async fn poll_now(&self) -> Option<TelemetrySample> {
        let exchange = match self.exchange(&Command::get_sensor_data()).await {
            Ok(exchange) => exchange,
            Err(ExchangeFailure::NoReply) => {
                self.probe_liveness().await;
                return None;
            }
            Err(_) => return None,
        };

        let reply = exchange.reply.ok()?;
        if reply.is_ack() {
            tracing::debug!("Skipping acknowledgement {}", exchange.raw);
            return None;
        }
        if !reply.is_telemetry() {
            LinkCounters::bump(&self.counters.parse_errors);
            tracing::warn!("Reply is not tagged as telemetry: {}", exchange.raw);
            self.errors.publish(ErrorEvent::DataParsingError);
            return None;
        }

        let state = match reply.device_state() {
            Ok(state) => state,
            Err(e) => {
                LinkCounters::bump(&self.counters.parse_errors);
                tracing::warn!("Reply is not a reading ({}): {}", e, exchange.raw);
                self.errors.publish(ErrorEvent::DataParsingError);
                return None;
            }
        };

        let sample = TelemetrySample::new(state, self.current_settings().await);
        let range = self.config.plausible_range;
        if !sample.is_plausible(&range) {
            LinkCounters::bump(&self.counters.samples_rejected);
            tracing::warn!(
                "Discarding implausible temperature {} outside {}..={}",
                sample.state.temperature,
                range.min,
                range.max
            );
            self.errors.publish(ErrorEvent::DataParsingError);
            return None;
        }

        LinkCounters::bump(&self.counters.samples_accepted);
        self.cache.store(sample.clone());

        if let Err(e) = self.sample_store.persist(&sample).await {
            tracing::error!("Failed to persist sample: {}", e);
            self.errors.publish(ErrorEvent::GenericError(e.to_string()));
        }
        if let Err(e) = self.sink.publish(&sample).await {
            tracing::warn!("Failed to forward sample: {}", e);
            self.errors.publish(ErrorEvent::GenericError(e.to_string()));
        }

        Some(sample)
    }

    /// Runs until stopped. Reconnects are tied to `epoch`, the disconnect
    /// epoch the loop was started in.
    async fn run_monitor(&self, mut stop: watch::Receiver<bool>, epoch: u64) {
        tracing::info!("Telemetry monitor started for {}", self.config.endpoint);
        let mut failures = 0u32;

        loop {
            let pause = tokio::select! {
                _ = stop.changed() => break,
                outcome = AssertUnwindSafe(self.monitor_step(&mut failures, epoch)).catch_unwind() => {
                    outcome.unwrap_or_else(|_| {
                        tracing::error!("Monitor iteration panicked");
                        self.errors.publish(ErrorEvent::GenericError(
                            "monitor iteration panicked".into(),
                        ));
                        self.config.reconnect_backoff.delay_after(1)
                    })
                }
            };

            tokio::select! {
                _ = stop.changed() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!("Telemetry monitor stopped for {}", self.config.endpoint);
    }

    /// One iteration; returns the pause before the next one.
    async fn monitor_step(&self, failures: &mut u32, epoch: u64) -> Duration {
        if !self.is_device_connected() {
            if !self.connect_in(self.config.retry_count, Some(epoch)).await {
                *failures = failures.saturating_add(1);
                let backoff = self.config.reconnect_backoff.delay_after(*failures);
                tracing::warn!(
                    "Reconnect to {} failed, retrying in {:?}",
                    self.config.endpoint,
                    backoff
                );
                return backoff;
            }
            *failures = 0;
        }

        self.poll_now().await;
        self.config.poll_interval
    }

    async fn probe_liveness(&self) {
        let deadline = Instant::now() + self.config.probe_timeout;

        match self.open_verified(deadline).await {
            Ok(session) => {
                session.close().await;
                tracing::warn!(
                    "{} answers a fresh connection, missed reply counted as timeout",
                    self.config.endpoint
                );
                self.errors.publish(ErrorEvent::TimeoutError);
            }
            Err(e) => {
                tracing::warn!("{} failed the liveness probe: {}", self.config.endpoint, e);
                self.errors.publish(ErrorEvent::ConnectionError);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use hatchlink_api::ConnectionState;
    use tokio::net::TcpListener;

    use super::*;
    use crate::configs::LinkConfig;

    #[tokio::test]
    async fn test_monitor_step_after_disconnect_stays_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let manager = DeviceLinkManager::new(LinkConfig::new("127.0.0.1", port));

        // An iteration already past its stop check when disconnect lands
        let epoch = manager.epoch.load(Ordering::Acquire);
        manager.disconnect().await;

        let mut failures = 0;
        manager.monitor_step(&mut failures, epoch).await;

        assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
        assert!(!manager.is_device_connected());
        assert_eq!(manager.stats().connect_attempts, 0);
    }

    #[tokio::test]
    async fn test_monitor_step_in_current_epoch_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let device = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = tokio::io::AsyncBufReadExt::lines(tokio::io::BufReader::new(read_half));
            while let Ok(Some(_)) = lines.next_line().await {
                let reply = b"{\"type\":\"sensor_data\",\"temp\":37.5}\n";
                if tokio::io::AsyncWriteExt::write_all(&mut write_half, reply)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        let manager = DeviceLinkManager::new(LinkConfig::new("127.0.0.1", port));

        let epoch = manager.epoch.load(Ordering::Acquire);
        let mut failures = 0;
        manager.monitor_step(&mut failures, epoch).await;

        assert_eq!(manager.connection_state(), ConnectionState::Connected);
        assert_eq!(manager.latest_sample().unwrap().state.temperature, 37.5);

        manager.disconnect().await;
        device.abort();
    }
}
