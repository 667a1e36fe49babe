//! Turn-state estimation and transcript scheduling for a voice session.
//!
//! The remote agent reports speech start/stop, two competing text streams,
//! and raw audio. Any of these may arrive late or not at all. The
//! [`ConversationEngine`] folds them into one monotonic view: whose turn it
//! is, and which words of the bot's reply should be on screen right now.
//!
//! Words are revealed at a fixed cadence measured from when the bot started
//! speaking, not from when the text arrived, so bursty delivery still reads
//! at a steady pace. Missing events are covered by audio-energy and timer
//! based fallbacks.
//!
//! The engine is synchronous and clock-explicit. Hosts feed it inputs with
//! the instant they happened and call [`ConversationEngine::advance`] at
//! [`ConversationEngine::next_deadline`].

pub mod config;
mod engine;
mod timers;
mod transcript;

pub use config::EngineConfig;
pub use engine::{ConversationEngine, ConversationSnapshot};
pub use transcript::TranscriptScheduler;
