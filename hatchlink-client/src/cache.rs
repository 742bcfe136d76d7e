use hatchlink_api::TelemetrySample;
use tokio::sync::watch;

/// Holds the most recent accepted sample and fans it out to observers.
///
/// New subscribers see the current value immediately through
/// [`watch::Receiver::borrow`].
#[derive(Debug)]
pub struct TelemetryCache {
    tx: watch::Sender<Option<TelemetrySample>>,
}

impl TelemetryCache {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn latest(&self) -> Option<TelemetrySample> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<TelemetrySample>> {
        self.tx.subscribe()
    }

    pub(crate) fn store(&self, sample: TelemetrySample) {
        self.tx.send_replace(Some(sample));
    }
}

impl Default for TelemetryCache {
    fn default() -> Self {
        Self::new()
    }
}
