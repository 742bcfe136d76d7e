#![allow(dead_code)]

pub mod mock_session;

use std::sync::Arc;
use std::time::Duration;

use hatchlink_api::ErrorEvent;
use hatchlink_client::{DeviceLinkManager, ErrorSubscription, LinkConfig, RetryPolicy};

use mock_session::{FakeConnector, FakeDevice};

pub fn fast_config() -> LinkConfig {
    LinkConfig::new("incubator.test", 80)
        .with_retry_count(2)
        .with_attempt_timeout(Duration::from_millis(300))
        .with_retry_delay(Duration::from_millis(50))
        .with_command_timeout(Duration::from_millis(300))
        .with_probe_timeout(Duration::from_millis(200))
        .with_poll_interval(Duration::from_millis(100))
        .with_reconnect_backoff(RetryPolicy::backoff(
            Duration::from_millis(100),
            Duration::from_millis(100),
        ))
        .with_settle_delay(Duration::from_millis(20))
}

pub fn fake_manager(device: &FakeDevice, config: LinkConfig) -> DeviceLinkManager {
    DeviceLinkManager::new(config).with_connector(Arc::new(FakeConnector::new(device.clone())))
}

pub fn manager_for(device: &FakeDevice, config: LinkConfig) -> Arc<DeviceLinkManager> {
    Arc::new(fake_manager(device, config))
}

/// Drains everything published so far.
pub fn drain(subscription: &mut ErrorSubscription) -> Vec<ErrorEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.try_recv() {
        events.push(event);
    }
    events
}

/// Waits until `wanted` is published, returning every event seen on the way.
pub async fn wait_for_event(
    subscription: &mut ErrorSubscription,
    wanted: ErrorEvent,
    within: Duration,
) -> Vec<ErrorEvent> {
    let mut seen = Vec::new();
    let found = tokio::time::timeout(within, async {
        while let Some(event) = subscription.recv().await {
            let done = event == wanted;
            seen.push(event);
            if done {
                return;
            }
        }
    })
    .await;

    assert!(found.is_ok(), "{:?} not published, saw {:?}", wanted, seen);
    seen
}
