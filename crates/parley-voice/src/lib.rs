//! Voice session plumbing for Parley.
//!
//! Connects a client to a remote conversational agent: credentials come from
//! the session broker relay, media and events flow over a
//! [`SessionTransport`], and a single driver task feeds everything the
//! session reports into the turn-state engine. The resulting
//! [`ConversationSnapshot`](parley_engine::ConversationSnapshot) is published
//! on a watch channel for the UI layer.
//!
//! The audio sampler taps the remote audio the transport is already playing
//! and never opens a second playback path. If no remote audio shows up, it
//! falls back to a synthetic meter instead of failing the call.

pub mod broker;
pub mod config;
pub mod error;
pub mod sampler;
pub mod session;
pub mod transport;

pub use broker::{BrokerClient, CredentialBroker};
pub use config::{BrokerConfig, SamplerConfig, SessionConfig};
pub use error::VoiceError;
pub use sampler::{spawn_sampler, SpectrumAnalyser};
pub use session::VoiceSession;
pub use transport::{AudioTap, ChannelEvent, InMemoryTransport, RemoteAudioSignal, SessionTransport};
