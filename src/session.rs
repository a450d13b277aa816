use std::collections::HashMap;

use tokio::time::Instant;
use uuid::Uuid;

/// Mutable per-run state of one advertising session.
///
/// Created at start, mutated on every tick and subscriber event, and
/// dropped at stop. Owned exclusively by the session task, so no state
/// survives a stop/start boundary and cursors always restart at zero.
#[derive(Debug, Default)]
pub struct SessionState {
    /// Cursor position per data key.
    cursors: HashMap<String, usize>,
    /// Last dispatch time per rate-limited data key.
    last_dispatch: HashMap<String, Instant>,
    /// Last payload written per characteristic, serving read requests.
    payloads: HashMap<Uuid, Vec<u8>>,
    /// Number of centrals currently subscribed.
    subscribers: usize,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self, data_key: &str) -> usize {
        self.cursors.get(data_key).copied().unwrap_or(0)
    }

    pub fn set_cursor(&mut self, data_key: &str, cursor: usize) {
        self.cursors.insert(data_key.to_string(), cursor);
    }

    /// Whether enough time has passed since the last dispatch of a
    /// rate-limited stream. A stream that has never dispatched is due.
    pub fn dispatch_due(&self, data_key: &str, window: std::time::Duration) -> bool {
        match self.last_dispatch.get(data_key) {
            Some(last) => last.elapsed() >= window,
            None => true,
        }
    }

    pub fn mark_dispatched(&mut self, data_key: &str) {
        self.last_dispatch
            .insert(data_key.to_string(), Instant::now());
    }

    pub fn store_payload(&mut self, characteristic: Uuid, payload: Vec<u8>) {
        self.payloads.insert(characteristic, payload);
    }

    pub fn payload(&self, characteristic: Uuid) -> Option<&[u8]> {
        self.payloads.get(&characteristic).map(Vec::as_slice)
    }

    /// Returns the updated subscriber count.
    pub fn subscriber_added(&mut self) -> usize {
        self.subscribers += 1;
        self.subscribers
    }

    /// Clamped at zero; spurious unsubscribe events cannot underflow.
    pub fn subscriber_removed(&mut self) -> usize {
        self.subscribers = self.subscribers.saturating_sub(1);
        self.subscribers
    }
}
