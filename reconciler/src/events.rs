//! Notifications about what the cache did, delivered over a bounded channel
//! owned by whoever constructs the cache.

use crate::types::FlightId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Records fetched from upstream were written to the store.
    RecordsCached {
        kind: &'static str,
        keys: Vec<String>,
    },
    /// Records fetched from upstream could not be written to the store.
    CacheWriteFailed {
        kind: &'static str,
        keys: Vec<String>,
        reason: String,
    },
    FlightsSaved {
        owner: String,
        count: usize,
    },
    FlightsLinked {
        owner: String,
        flight_ids: Vec<FlightId>,
    },
}

/// Sending half of the event channel. Emitting never blocks: when the
/// receiver lags behind, events are dropped and logged.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::Sender<Event>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        EventSink { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (EventSink { tx }, rx)
    }

    pub fn emit(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(?event, "event channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("event receiver gone, dropping event");
            }
        }
    }
}
