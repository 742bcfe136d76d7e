use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hatchlink_api::{ConnectionState, ErrorEvent, TelemetrySample};
use hatchlink_client::{MemorySampleStore, TelemetrySink};
use tokio::sync::watch;

mod common;
use common::mock_session::FakeDevice;
use common::{drain, fake_manager, fast_config, manager_for, wait_for_event};

async fn next_sample(
    samples: &mut watch::Receiver<Option<TelemetrySample>>,
    within: Duration,
) -> TelemetrySample {
    tokio::time::timeout(within, async {
        loop {
            samples.changed().await.unwrap();
            if let Some(sample) = samples.borrow_and_update().clone() {
                return sample;
            }
        }
    })
    .await
    .expect("no sample delivered")
}

#[derive(Default)]
struct CollectingSink {
    samples: Mutex<Vec<TelemetrySample>>,
}

#[async_trait]
impl TelemetrySink for CollectingSink {
    async fn publish(&self, sample: &TelemetrySample) -> hatchlink_client::Result<()> {
        self.samples.lock().unwrap().push(sample.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_monitor_connects_and_delivers_samples() {
    let device = FakeDevice::new();
    let store = Arc::new(MemorySampleStore::new());
    let sink = Arc::new(CollectingSink::default());
    let manager = Arc::new(
        fake_manager(&device, fast_config())
            .with_sample_store(store.clone())
            .with_sink(sink.clone()),
    );

    let mut samples = manager.start_monitor();
    let sample = next_sample(&mut samples, Duration::from_secs(2)).await;

    assert_eq!(sample.state.temperature, 37.5);
    assert_eq!(sample.state.incubation_day, 3);
    assert!(manager.is_device_connected());
    assert!(manager.is_monitoring());
    assert!(!store.is_empty().await);
    assert!(!sink.samples.lock().unwrap().is_empty());
    assert_eq!(manager.latest_sample().map(|s| s.state.temperature), Some(37.5));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_start_monitor_twice_runs_one_loop() {
    let device = FakeDevice::new();
    let manager = manager_for(&device, fast_config());

    let mut first = manager.start_monitor();
    let mut second = manager.start_monitor();
    next_sample(&mut first, Duration::from_secs(2)).await;
    next_sample(&mut second, Duration::from_secs(2)).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    manager.shutdown().await;

    assert_eq!(device.connects(), 1);
    let polls = device
        .received_commands()
        .iter()
        .filter(|name| name.as_str() == "get_sensor_data")
        .count();
    // one loop at a 100 ms interval
    assert!(polls <= 8, "{polls} polls");
}

#[tokio::test]
async fn test_silent_device_reports_connection_error() {
    let device = FakeDevice::new();
    let manager = manager_for(&device, fast_config());
    let mut samples = manager.start_monitor();
    next_sample(&mut samples, Duration::from_secs(2)).await;

    let mut errors = manager.subscribe_errors();
    device.set_silent(true);

    // command timeout plus probe timeout, with headroom
    wait_for_event(&mut errors, ErrorEvent::ConnectionError, Duration::from_secs(2)).await;
    assert_ne!(manager.connection_state(), ConnectionState::Connected);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_missed_reply_from_reachable_device_is_timeout() {
    let device = FakeDevice::new();
    let manager = manager_for(&device, fast_config());
    let mut samples = manager.start_monitor();
    next_sample(&mut samples, Duration::from_secs(2)).await;

    let mut errors = manager.subscribe_errors();
    device.set_ignore_sensor_requests(true);

    let seen = wait_for_event(&mut errors, ErrorEvent::TimeoutError, Duration::from_secs(2)).await;
    assert!(!seen.contains(&ErrorEvent::ConnectionError));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_implausible_reading_is_not_cached() {
    let device = FakeDevice::new();
    device.set_temperature(-127.0);
    let manager = manager_for(&device, fast_config());
    let mut errors = manager.subscribe_errors();

    manager.start_monitor();
    let seen = wait_for_event(&mut errors, ErrorEvent::DataParsingError, Duration::from_secs(2)).await;
    manager.shutdown().await;

    assert!(!seen.contains(&ErrorEvent::ConnectionError));
    assert!(manager.latest_sample().is_none());
    assert!(manager.stats().samples_rejected >= 1);
    assert_eq!(manager.stats().samples_accepted, 0);
}

#[tokio::test]
async fn test_acknowledgement_is_not_telemetry() {
    let device = FakeDevice::new();
    device.set_sensor_reply(Some("{\"status\":\"busy\"}"));
    let manager = manager_for(&device, fast_config());
    assert!(manager.connect(1).await);
    let mut errors = manager.subscribe_errors();

    assert!(manager.poll_now().await.is_none());
    assert!(manager.latest_sample().is_none());
    assert!(drain(&mut errors).is_empty());
}

#[tokio::test]
async fn test_untagged_reply_is_not_telemetry() {
    let device = FakeDevice::new();
    device.set_sensor_reply(Some("{\"type\":\"config\",\"temp\":30.0}"));
    let manager = manager_for(&device, fast_config());
    assert!(manager.connect(1).await);
    let mut errors = manager.subscribe_errors();

    assert!(manager.poll_now().await.is_none());
    assert!(manager.latest_sample().is_none());
    assert_eq!(drain(&mut errors), vec![ErrorEvent::DataParsingError]);
    assert_eq!(manager.stats().samples_accepted, 0);
}

#[tokio::test]
async fn test_non_reading_reply_is_parse_error() {
    let device = FakeDevice::new();
    device.set_sensor_reply(Some("{\"type\":\"sensor_data\",\"hum\":50.0}"));
    let manager = manager_for(&device, fast_config());
    assert!(manager.connect(1).await);
    let mut errors = manager.subscribe_errors();

    assert!(manager.poll_now().await.is_none());
    assert_eq!(drain(&mut errors), vec![ErrorEvent::DataParsingError]);
}

#[tokio::test]
async fn test_monitor_recovers_after_outage() {
    let device = FakeDevice::new();
    let manager = manager_for(&device, fast_config());
    let mut samples = manager.start_monitor();
    next_sample(&mut samples, Duration::from_secs(2)).await;

    let mut errors = manager.subscribe_errors();
    device.set_online(false);
    wait_for_event(&mut errors, ErrorEvent::ConnectionError, Duration::from_secs(2)).await;

    device.set_temperature(38.0);
    device.set_online(true);

    let recovered = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let sample = next_sample(&mut samples, Duration::from_secs(3)).await;
            if sample.state.temperature == 38.0 {
                return sample;
            }
        }
    })
    .await
    .expect("monitor did not recover");

    assert_eq!(recovered.state.temperature, 38.0);
    assert!(manager.is_device_connected());
    assert!(device.connects() >= 2);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_polling() {
    let device = FakeDevice::new();
    let manager = manager_for(&device, fast_config());
    let mut samples = manager.start_monitor();
    next_sample(&mut samples, Duration::from_secs(2)).await;

    manager.shutdown().await;
    assert!(!manager.is_monitoring());
    assert_eq!(manager.connection_state(), ConnectionState::Disconnected);

    let before = device.received_commands().len();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(device.received_commands().len(), before);
}

#[tokio::test]
async fn test_monitor_restarts_after_disconnect() {
    let device = FakeDevice::new();
    let manager = manager_for(&device, fast_config());
    let mut samples = manager.start_monitor();
    next_sample(&mut samples, Duration::from_secs(2)).await;

    manager.disconnect().await;
    assert!(!manager.is_monitoring());

    let mut samples = manager.start_monitor();
    next_sample(&mut samples, Duration::from_secs(2)).await;
    assert!(manager.is_device_connected());

    manager.shutdown().await;
}
