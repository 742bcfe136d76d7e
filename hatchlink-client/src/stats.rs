use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by a link manager since it was created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub commands_sent: u64,
    pub replies_received: u64,
    pub timeouts: u64,
    pub parse_errors: u64,
    pub connect_attempts: u64,
    pub connections_established: u64,
    pub samples_accepted: u64,
    pub samples_rejected: u64,
}

impl LinkStats {
    pub fn reply_rate(&self) -> f64 {
        if self.commands_sent == 0 {
            0.0
        } else {
            self.replies_received as f64 / self.commands_sent as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct LinkCounters {
    pub commands_sent: AtomicU64,
    pub replies_received: AtomicU64,
    pub timeouts: AtomicU64,
    pub parse_errors: AtomicU64,
    pub connect_attempts: AtomicU64,
    pub connections_established: AtomicU64,
    pub samples_accepted: AtomicU64,
    pub samples_rejected: AtomicU64,
}

impl LinkCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LinkStats {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        LinkStats {
            commands_sent: read(&self.commands_sent),
            replies_received: read(&self.replies_received),
            timeouts: read(&self.timeouts),
            parse_errors: read(&self.parse_errors),
            connect_attempts: read(&self.connect_attempts),
            connections_established: read(&self.connections_established),
            samples_accepted: read(&self.samples_accepted),
            samples_rejected: read(&self.samples_rejected),
        }
    }
}
