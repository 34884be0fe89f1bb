//! Stream admission: a FIFO queue in front of a bounded pool of event streams
// (c) 2025 Ross Younger

use std::collections::VecDeque;

/// Holds messages until an event stream is free.
///
/// Privileged (post-connect) messages are admitted ahead of ordinary ones, and before the
/// transport is fully connected. Within each class admission is strictly first-in, first-out.
/// The number of admitted items never exceeds the limit.
#[derive(Debug)]
pub(crate) struct AdmissionQueue<T> {
    pending: VecDeque<T>,
    privileged: VecDeque<T>,
    in_flight: usize,
    limit: usize,
    peak: usize,
}

impl<T> AdmissionQueue<T> {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            privileged: VecDeque::new(),
            in_flight: 0,
            limit,
            peak: 0,
        }
    }

    pub(crate) fn push(&mut self, item: T) {
        self.pending.push_back(item);
    }

    pub(crate) fn push_privileged(&mut self, item: T) {
        self.privileged.push_back(item);
    }

    /// Takes the next item to start, counting it as in flight.
    ///
    /// `general_allowed` says whether ordinary messages may go yet.
    pub(crate) fn pop_admissible(&mut self, general_allowed: bool) -> Option<T> {
        if self.in_flight >= self.limit {
            return None;
        }
        let item = self.privileged.pop_front().or_else(|| {
            if general_allowed {
                self.pending.pop_front()
            } else {
                None
            }
        })?;
        self.in_flight += 1;
        self.peak = self.peak.max(self.in_flight);
        Some(item)
    }

    /// An admitted item has finished
    pub(crate) fn release(&mut self) {
        debug_assert!(self.in_flight > 0, "release without admission");
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Forgets all admitted items and returns everything still queued, privileged first
    pub(crate) fn drain(&mut self) -> Vec<T> {
        self.in_flight = 0;
        self.privileged
            .drain(..)
            .chain(self.pending.drain(..))
            .collect()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub(crate) fn queued(&self) -> usize {
        self.pending.len() + self.privileged.len()
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak
    }
}
