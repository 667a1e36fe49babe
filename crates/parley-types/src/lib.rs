//! Shared types for the Parley voice widget backend.
//!
//! This crate provides the vocabulary used across all Parley crates: the
//! conversational turn state, the real-time transport phases, streamed
//! transcript words, audio energy samples, and the credential shape the
//! session broker hands back to clients.
//!
//! No crate in the workspace depends on anything *except* `parley-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod voice;
pub use voice::{AgentProfile, SessionCredentials};

/// Who is talking right now.
///
/// Exactly one value holds at any instant. The engine owns the only mutable
/// copy; everything else sees snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// No session, or connected with nobody speaking yet.
    #[default]
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// The remote agent is speaking.
    BotSpeaking,
    /// The local user is speaking.
    UserSpeaking,
    /// A turn just ended and the next one is expected.
    WaitingForResponse,
}

impl TurnState {
    /// Returns the canonical string label for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::BotSpeaking => "bot_speaking",
            Self::UserSpeaking => "user_speaking",
            Self::WaitingForResponse => "waiting_for_response",
        }
    }

    /// Returns `true` when either party is speaking.
    pub fn is_speaking(self) -> bool {
        matches!(self, Self::BotSpeaking | Self::UserSpeaking)
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connectivity phase of the underlying real-time session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Ready,
    Error,
}

impl TransportState {
    /// Returns the canonical string label for this phase.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    /// `connected` and `ready` both count as a live session.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Ready)
    }

    /// Returns `true` for phases that end a session.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown transport state string.
#[derive(Debug, Clone, Error)]
#[error("unknown transport state: {0}")]
pub struct ParseTransportStateError(pub String);

impl std::str::FromStr for TransportState {
    type Err = ParseTransportStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(Self::Disconnected),
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            _ => Err(ParseTransportStateError(s.to_string())),
        }
    }
}

/// One word of the bot's transcript, keyed for stable display.
///
/// `id` increases strictly within a turn and restarts at 0 after a turn reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamedWord {
    pub word: String,
    pub id: u64,
}

impl StreamedWord {
    pub fn new(word: impl Into<String>, id: u64) -> Self {
        Self {
            word: word.into(),
            id,
        }
    }
}

/// Most recent energy reading of the remote audio signal, on a 0..=255 scale.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VolumeSample {
    pub level: f32,
    /// Set when the reading is generated rather than measured (degraded mode).
    /// Synthetic samples feed the meter only.
    #[serde(default)]
    pub synthetic: bool,
}

impl VolumeSample {
    /// Highest value a sample can take.
    pub const MAX: f32 = 255.0;

    /// A measured sample, clamped into range.
    pub fn measured(level: f32) -> Self {
        Self {
            level: level.clamp(0.0, Self::MAX),
            synthetic: false,
        }
    }

    /// A generated sample for the degraded visualizer.
    pub fn synthetic(level: f32) -> Self {
        Self {
            level: level.clamp(0.0, Self::MAX),
            synthetic: true,
        }
    }
}
