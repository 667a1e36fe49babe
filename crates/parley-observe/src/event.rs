//! Event domain, payload, and record types for the engine event stream.

use parley_types::{TransportState, TurnState};
use serde::{Deserialize, Serialize};

/// Observability event domains.
///
/// Each domain groups related event types for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventDomain {
    /// Turn-state transitions.
    #[serde(rename = "TURN")]
    Turn,
    /// Word scheduling, reveals, and transcript clears.
    #[serde(rename = "TRANSCRIPT")]
    Transcript,
    /// Transport lifecycle and connection attempts.
    #[serde(rename = "SESSION")]
    Session,
    /// Remote audio acquisition.
    #[serde(rename = "AUDIO")]
    Audio,
}

impl EventDomain {
    /// Returns the canonical string label for this domain.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Turn => "TURN",
            Self::Transcript => "TRANSCRIPT",
            Self::Session => "SESSION",
            Self::Audio => "AUDIO",
        }
    }
}

impl std::fmt::Display for EventDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventDomain {
    type Err = ParseEventDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TURN" => Ok(Self::Turn),
            "TRANSCRIPT" => Ok(Self::Transcript),
            "SESSION" => Ok(Self::Session),
            "AUDIO" => Ok(Self::Audio),
            _ => Err(ParseEventDomainError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown event domain string.
#[derive(Debug, Clone)]
pub struct ParseEventDomainError(pub String);

impl std::fmt::Display for ParseEventDomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event domain: {}", self.0)
    }
}

impl std::error::Error for ParseEventDomainError {}

/// What drove a turn-state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    BotSpeechStarted,
    BotSpeechStopped,
    UserSpeechStarted,
    /// The settle delay after a user stop elapsed.
    UserSettled,
    /// Audio energy crossed the activity threshold with no start event.
    AudioActivity,
    /// Audio stayed below the threshold for too long with no stop event.
    AudioSilence,
    /// No user activity was seen for too long.
    UserStale,
    Transport,
}

/// Why the transcript was emptied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearReason {
    /// A new user turn began.
    UserTurn,
    /// The pause after the bot finished elapsed.
    AfterBotTurn,
    /// Nothing updated the transcript for too long.
    Stale,
    /// The session ended.
    Disconnect,
}

/// Structured event payloads for each event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    // ── Turn domain ──────────────────────────────────────────────────
    /// The turn state changed.
    TurnChanged {
        from: TurnState,
        to: TurnState,
        cause: TransitionCause,
    },

    // ── Transcript domain ────────────────────────────────────────────
    /// A bot turn began and per-turn transcript state was reset.
    TurnReset {
        /// Words from the previous turn that were discarded.
        dropped_words: usize,
    },

    /// A word was queued for reveal.
    WordScheduled {
        id: u64,
        /// Turn-local index of the word.
        index: usize,
        /// Delay from now until the reveal.
        delay_ms: u64,
    },

    /// A word became visible.
    WordRevealed { id: u64, index: usize },

    /// The transcript was emptied.
    TranscriptCleared { reason: ClearReason },

    /// No primary text arrived in time; fragment text is now displayed.
    FallbackArmed,

    /// Primary text arrived during fallback mode; fragment words were dropped.
    FallbackAbandoned { dropped_words: usize },

    // ── Session domain ───────────────────────────────────────────────
    /// The transport reported a new phase.
    TransportChanged { state: TransportState },

    /// A connection attempt failed.
    ConnectFailed { message: String },

    // ── Audio domain ─────────────────────────────────────────────────
    /// The sampler found its input.
    AudioAcquired {
        /// `true` when no remote signal was found and samples are generated.
        synthetic: bool,
    },
}

impl EventPayload {
    /// Returns the canonical event type string for this payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TurnChanged { .. } => "TURN_CHANGED",
            Self::TurnReset { .. } => "TURN_RESET",
            Self::WordScheduled { .. } => "WORD_SCHEDULED",
            Self::WordRevealed { .. } => "WORD_REVEALED",
            Self::TranscriptCleared { .. } => "TRANSCRIPT_CLEARED",
            Self::FallbackArmed => "FALLBACK_ARMED",
            Self::FallbackAbandoned { .. } => "FALLBACK_ABANDONED",
            Self::TransportChanged { .. } => "TRANSPORT_CHANGED",
            Self::ConnectFailed { .. } => "CONNECT_FAILED",
            Self::AudioAcquired { .. } => "AUDIO_ACQUIRED",
        }
    }

    /// Returns the domain for this payload.
    pub fn domain(&self) -> EventDomain {
        match self {
            Self::TurnChanged { .. } => EventDomain::Turn,
            Self::TurnReset { .. }
            | Self::WordScheduled { .. }
            | Self::WordRevealed { .. }
            | Self::TranscriptCleared { .. }
            | Self::FallbackArmed
            | Self::FallbackAbandoned { .. } => EventDomain::Transcript,
            Self::TransportChanged { .. } | Self::ConnectFailed { .. } => EventDomain::Session,
            Self::AudioAcquired { .. } => EventDomain::Audio,
        }
    }
}

/// A single recorded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Monotonically increasing sequence number within one log.
    pub seq: u64,
    /// The event domain (e.g., `TURN`).
    pub domain: String,
    /// The specific event type (e.g., `TURN_CHANGED`).
    pub event_type: String,
    pub payload: EventPayload,
    /// RFC 3339 timestamp of when the event was recorded.
    pub occurred_at: String,
}
