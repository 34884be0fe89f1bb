//! Inactivity watchdog
// (c) 2025 Ross Younger

use std::time::Duration;

use tokio::time::Instant;

/// Tracks when the connection last saw any inbound bytes.
///
/// The watchdog only has a deadline while armed; the transport arms it on entering the
/// connected state.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InactivityWatchdog {
    timeout: Duration,
    last_activity: Instant,
    armed: bool,
}

impl InactivityWatchdog {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_activity: Instant::now(),
            armed: false,
        }
    }

    pub(crate) fn arm(&mut self) {
        self.armed = true;
        self.last_activity = Instant::now();
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }

    pub(crate) fn record_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// When the watchdog will next expire, if armed
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.armed.then(|| self.last_activity + self.timeout)
    }
}
