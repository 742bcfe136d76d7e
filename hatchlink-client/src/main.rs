use std::sync::Arc;
use std::time::Duration;

use hatchlink_client::DeviceLinkManager;
use hatchlink_client::configs::{LinkConfig, Settings};

const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() {
    let settings = Settings::new().expect("Failed to load settings.");

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let app_name = env!("CARGO_PKG_NAME").replace('-', "_");
            let level = settings.logger.level.as_str();

            format!("{app_name}={level}").into()
        }))
        .init();

    let manager = Arc::new(DeviceLinkManager::new(LinkConfig::from(&settings)));
    let restored = manager.restore_settings().await;
    tracing::info!("Current settings: {:?}", restored);

    if !manager.connect(settings.link.retry_count).await {
        tracing::warn!("Device not reachable yet, the monitor keeps retrying");
    }

    let mut samples = manager.start_monitor();
    let mut errors = manager.subscribe_errors();
    let retention = Duration::from_secs(settings.telemetry.retention_hours.saturating_mul(3600));
    let mut prune = tokio::time::interval(PRUNE_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
            changed = samples.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(sample) = samples.borrow_and_update().clone() {
                    let state = &sample.state;
                    tracing::info!(
                        "{:.1} °C {:.1} % heater={} humidifier={} motor={} day={}",
                        state.temperature,
                        state.humidity,
                        state.heater,
                        state.humidifier,
                        state.motor_running,
                        state.incubation_day
                    );
                }
            }
            Some(event) = errors.recv() => {
                tracing::warn!("Device error: {}", event);
            }
            _ = prune.tick() => {
                manager.prune_history(retention).await;
            }
        }
    }

    manager.shutdown().await;
    let stats = manager.stats();
    tracing::info!(
        "Link stats: {:?}, {:.0}% of commands answered",
        stats,
        stats.reply_rate() * 100.0
    );
}
