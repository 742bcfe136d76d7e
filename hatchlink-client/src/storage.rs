//! Persistence seams the link manager writes through.

use async_trait::async_trait;
use hatchlink_api::{DeviceSettings, TelemetrySample};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::Result;

/// Time-series store for accepted samples.
#[async_trait]
pub trait SampleStore: Send + Sync {
    async fn persist(&self, sample: &TelemetrySample) -> Result<()>;

    /// Samples with `start <= timestamp <= end`, oldest first.
    async fn read_range(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<TelemetrySample>>;

    /// Removes samples older than `cutoff` and returns how many were removed.
    async fn delete_older_than(&self, cutoff: OffsetDateTime) -> Result<usize>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// The last saved settings, or the defaults when nothing was saved yet.
    async fn load_last_known_settings(&self) -> Result<DeviceSettings>;

    async fn save_settings(&self, settings: &DeviceSettings) -> Result<()>;
}

/// Outbound publisher for accepted samples, e.g. a cloud uploader.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn publish(&self, sample: &TelemetrySample) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemorySampleStore {
    samples: RwLock<Vec<TelemetrySample>>,
}

impl MemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.samples.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.samples.read().await.is_empty()
    }
}

#[async_trait]
impl SampleStore for MemorySampleStore {
    async fn persist(&self, sample: &TelemetrySample) -> Result<()> {
        let mut samples = self.samples.write().await;
        let index = samples.partition_point(|stored| stored.timestamp <= sample.timestamp);
        samples.insert(index, sample.clone());
        Ok(())
    }

    async fn read_range(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<TelemetrySample>> {
        let samples = self.samples.read().await;
        Ok(samples
            .iter()
            .filter(|sample| sample.timestamp >= start && sample.timestamp <= end)
            .cloned()
            .collect())
    }

    async fn delete_older_than(&self, cutoff: OffsetDateTime) -> Result<usize> {
        let mut samples = self.samples.write().await;
        let before = samples.len();
        samples.retain(|sample| sample.timestamp >= cutoff);
        Ok(before - samples.len())
    }
}

#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: RwLock<Option<DeviceSettings>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: DeviceSettings) -> Self {
        Self {
            settings: RwLock::new(Some(settings)),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load_last_known_settings(&self) -> Result<DeviceSettings> {
        Ok(self.settings.read().await.clone().unwrap_or_default())
    }

    async fn save_settings(&self, settings: &DeviceSettings) -> Result<()> {
        *self.settings.write().await = Some(settings.clone());
        Ok(())
    }
}

/// Sink that drops every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl TelemetrySink for NullSink {
    async fn publish(&self, _sample: &TelemetrySample) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hatchlink_api::DeviceState;
    use time::Duration;

    use super::*;

    fn sample_at(timestamp: OffsetDateTime) -> TelemetrySample {
        let state = DeviceState {
            temperature: 37.5,
            humidity: 55.0,
            heater: true,
            humidifier: false,
            motor_running: false,
            motor_remaining_secs: 600,
            incubation_day: 3,
            pid_output: 12.0,
        };
        TelemetrySample::at(state, DeviceSettings::default(), timestamp)
    }

    #[tokio::test]
    async fn test_range_is_inclusive_and_ordered() {
        let store = MemorySampleStore::new();
        let base = OffsetDateTime::now_utc();

        for offset in [3, 0, 2, 1] {
            store.persist(&sample_at(base + Duration::minutes(offset))).await.unwrap();
        }

        let range = store
            .read_range(base + Duration::minutes(1), base + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(
            range.iter().map(|s| s.timestamp).collect::<Vec<_>>(),
            vec![base + Duration::minutes(1), base + Duration::minutes(2)]
        );
    }

    #[tokio::test]
    async fn test_delete_older_than() {
        let store = MemorySampleStore::new();
        let base = OffsetDateTime::now_utc();

        for offset in 0..5 {
            store.persist(&sample_at(base + Duration::hours(offset))).await.unwrap();
        }

        let removed = store
            .delete_older_than(base + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_settings_store_defaults_then_persists() {
        let store = MemorySettingsStore::new();
        assert_eq!(
            store.load_last_known_settings().await.unwrap(),
            DeviceSettings::default()
        );

        let mut settings = DeviceSettings::default();
        settings.target_temperature = 37.2;
        store.save_settings(&settings).await.unwrap();

        assert_eq!(store.load_last_known_settings().await.unwrap(), settings);
    }
}
