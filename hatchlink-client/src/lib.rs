//! Host-side link to an incubator controller: connection lifecycle,
//! serialized command exchange and periodic telemetry.

pub mod cache;
pub mod configs;
pub mod error;
pub mod events;
pub mod manager;
pub mod retry;
pub mod session;
pub mod stats;
pub mod storage;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use cache::TelemetryCache;
pub use configs::LinkConfig;
pub use error::{Error, Result};
pub use events::{ErrorChannel, ErrorSubscription};
pub use manager::DeviceLinkManager;
pub use retry::RetryPolicy;
pub use session::{Connector, Endpoint, LinkSession, TcpConnector, TcpSession};
pub use stats::LinkStats;
pub use storage::{
    MemorySampleStore, MemorySettingsStore, NullSink, SampleStore, SettingsStore, TelemetrySink,
};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
