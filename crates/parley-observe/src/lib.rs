//! Structured event stream for the Parley conversation engine.
//!
//! The engine and session adapter report what they do as typed events
//! rather than ad-hoc log lines, so a host application can subscribe to
//! turn transitions and transcript scheduling and render or audit them.
//!
//! # Event domains
//!
//! | Domain | Example events |
//! |--------|---------------|
//! | `TURN` | `TURN_CHANGED` |
//! | `TRANSCRIPT` | `TURN_RESET`, `WORD_SCHEDULED`, `WORD_REVEALED`, `TRANSCRIPT_CLEARED`, `FALLBACK_ARMED` |
//! | `SESSION` | `TRANSPORT_CHANGED`, `CONNECT_FAILED` |
//! | `AUDIO` | `AUDIO_ACQUIRED` |
//!
//! # Usage
//!
//! ```rust,ignore
//! use parley_observe::{EventLog, EventPayload, EventSink};
//!
//! let log = EventLog::new();
//! let mut live = log.subscribe();
//! log.emit(EventPayload::FallbackArmed);
//! ```

mod event;
mod store;

pub use event::{
    ClearReason, EventDomain, EventPayload, ParseEventDomainError, RecordedEvent,
    TransitionCause,
};
pub use store::{EventFilter, EventLog, EventSink, NoopSink, DEFAULT_LOG_CAPACITY};

#[cfg(test)]
mod tests;
