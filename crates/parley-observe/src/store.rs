//! In-memory event log and the sink trait producers write through.
//!
//! All writes go through [`EventSink::emit`]. [`EventLog`] assigns a
//! monotonically increasing sequence number, keeps the most recent events
//! in a bounded buffer, and fans each one out to broadcast subscribers.
//!
//! Reads go through [`EventLog::query`], which supports filtering by domain,
//! event type, and sequence cursor.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;

use crate::event::{EventDomain, EventPayload, RecordedEvent};

/// Default number of events retained by an [`EventLog`].
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// Default capacity of the live broadcast channel.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Destination for structured engine events.
pub trait EventSink: Send + Sync {
    fn emit(&self, payload: EventPayload);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _payload: EventPayload) {}
}

/// Filter criteria for querying an [`EventLog`].
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by event domain.
    pub domain: Option<EventDomain>,
    /// Filter by event type string.
    pub event_type: Option<String>,
    /// Return events with a sequence number strictly greater than this.
    pub after_seq: Option<u64>,
    /// Maximum number of events to return (default: 100).
    pub limit: Option<usize>,
}

#[derive(Debug)]
struct LogInner {
    events: VecDeque<RecordedEvent>,
    last_seq: u64,
}

/// Bounded, sequence-numbered event log with live subscribers.
#[derive(Debug)]
pub struct EventLog {
    inner: Mutex<LogInner>,
    capacity: usize,
    tx: broadcast::Sender<RecordedEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self {
            inner: Mutex::new(LogInner {
                events: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
                last_seq: 0,
            }),
            capacity: capacity.max(1),
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("event log lock poisoned, recovering with stale state");
                poisoned.into_inner()
            }
        }
    }

    /// Subscribes to events recorded from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RecordedEvent> {
        self.tx.subscribe()
    }

    /// Returns the sequence number the next event will receive.
    pub fn next_seq(&self) -> u64 {
        self.lock().last_seq + 1
    }

    /// Number of events currently retained.
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records an event and returns the stored record.
    pub fn record(&self, payload: EventPayload) -> RecordedEvent {
        let event = {
            let mut inner = self.lock();
            inner.last_seq += 1;
            let event = RecordedEvent {
                seq: inner.last_seq,
                domain: payload.domain().as_str().to_string(),
                event_type: payload.event_type().to_string(),
                payload,
                occurred_at: chrono::Utc::now().to_rfc3339(),
            };
            if inner.events.len() == self.capacity {
                inner.events.pop_front();
            }
            inner.events.push_back(event.clone());
            event
        };

        // No receivers is the common case for headless sessions.
        let _ = self.tx.send(event.clone());
        event
    }

    /// Queries retained events, oldest first, bounded by `filter.limit`
    /// (default 100). Use `filter.after_seq` as a cursor.
    pub fn query(&self, filter: &EventFilter) -> Vec<RecordedEvent> {
        let limit = filter.limit.unwrap_or(100);
        let inner = self.lock();
        inner
            .events
            .iter()
            .filter(|e| filter.after_seq.map_or(true, |after| e.seq > after))
            .filter(|e| {
                filter
                    .domain
                    .map_or(true, |d| e.payload.domain() == d)
            })
            .filter(|e| {
                filter
                    .event_type
                    .as_deref()
                    .map_or(true, |t| e.event_type == t)
            })
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventLog {
    fn emit(&self, payload: EventPayload) {
        self.record(payload);
    }
}
