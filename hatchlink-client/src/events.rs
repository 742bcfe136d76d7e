use std::sync::Mutex;

use hatchlink_api::ErrorEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::lock;

const CHANNEL_CAPACITY: usize = 64;

/// Broadcasts classified anomalies; a new subscriber first receives the
/// last event published before it subscribed.
#[derive(Debug)]
pub struct ErrorChannel {
    tx: broadcast::Sender<ErrorEvent>,
    last: Mutex<Option<ErrorEvent>>,
}

impl ErrorChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            last: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> ErrorSubscription {
        let last = lock(&self.last);
        ErrorSubscription {
            replay: last.clone(),
            rx: self.tx.subscribe(),
        }
    }

    pub(crate) fn publish(&self, event: ErrorEvent) {
        tracing::debug!("Publishing {}", event);

        // Held across the send so a concurrent subscribe sees each event once
        let mut last = lock(&self.last);
        *last = Some(event.clone());
        let _ = self.tx.send(event);
    }
}

impl Default for ErrorChannel {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ErrorSubscription {
    replay: Option<ErrorEvent>,
    rx: broadcast::Receiver<ErrorEvent>,
}

impl ErrorSubscription {
    /// Waits for the next event. Returns `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<ErrorEvent> {
        if let Some(event) = self.replay.take() {
            return Some(event);
        }

        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Error subscriber lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<ErrorEvent> {
        if let Some(event) = self.replay.take() {
            return Some(event);
        }

        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}
