//! The conversation engine: turn-state estimation plus transcript timing.
//!
//! [`ConversationEngine`] is a plain state object. It never reads a clock and
//! never spawns anything; every input carries the instant it happened at, and
//! the host calls [`ConversationEngine::advance`] when
//! [`ConversationEngine::next_deadline`] passes. That keeps all mutation on
//! whichever single task owns the engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parley_observe::{ClearReason, EventPayload, EventSink, TransitionCause};
use parley_types::{StreamedWord, TransportState, TurnState, VolumeSample};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::timers::{TimerHandle, TimerQueue};
use crate::transcript::TranscriptScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    RevealWord { index: usize },
    ClearTranscript { reason: ClearReason },
    ArmFallback,
    UserSettle,
}

/// Point-in-time view of the conversation for rendering.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ConversationSnapshot {
    pub turn: TurnState,
    /// Trailing display window of the bot transcript.
    pub words: Vec<StreamedWord>,
    /// Full text revealed this turn.
    pub text: Option<String>,
    /// Latest meter level, 0..=255.
    pub volume: f32,
    pub connected: bool,
    /// Message from the last failed connection attempt.
    pub error: Option<String>,
}

pub struct ConversationEngine {
    config: EngineConfig,
    sink: Arc<dyn EventSink>,
    state: TurnState,
    transcript: TranscriptScheduler,
    timers: TimerQueue<Timer>,
    clear_timer: Option<TimerHandle>,
    arm_timer: Option<TimerHandle>,
    settle_timer: Option<TimerHandle>,
    connected: bool,
    volume: f32,
    last_bot_audio: Option<Instant>,
    last_user_activity: Option<Instant>,
    /// The current bot turn was started by audio energy, not by an event.
    audio_started_turn: bool,
}

impl std::fmt::Debug for ConversationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationEngine")
            .field("state", &self.state)
            .field("connected", &self.connected)
            .field("transcript", &self.transcript)
            .field("pending_timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

impl ConversationEngine {
    pub fn new(config: EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        let transcript = TranscriptScheduler::new(config.display_window);
        Self {
            config,
            sink,
            state: TurnState::Idle,
            transcript,
            timers: TimerQueue::new(),
            clear_timer: None,
            arm_timer: None,
            settle_timer: None,
            connected: false,
            volume: 0.0,
            last_bot_audio: None,
            last_user_activity: None,
            audio_started_turn: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn transcript(&self) -> &TranscriptScheduler {
        &self.transcript
    }

    /// The trailing display window.
    pub fn display(&self) -> &[StreamedWord] {
        self.transcript.display()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            turn: self.state,
            words: self.transcript.display().to_vec(),
            text: self.transcript.text(),
            volume: self.volume,
            connected: self.connected,
            error: None,
        }
    }

    /// Earliest instant at which [`advance`](Self::advance) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Fires every timer due at or before `now`, in deadline order.
    pub fn advance(&mut self, now: Instant) {
        self.run_due(now);
    }

    // ── Speech events ────────────────────────────────────────────────

    pub fn on_bot_speech_start(&mut self, now: Instant) {
        self.run_due(now);
        if self.audio_started_turn && self.state == TurnState::BotSpeaking {
            self.audio_started_turn = false;
            self.last_bot_audio = Some(now);
            tracing::debug!("bot start event adopted audio-detected turn");
            return;
        }
        self.audio_started_turn = false;
        self.begin_bot_turn(now, TransitionCause::BotSpeechStarted);
        self.run_due(now);
    }

    pub fn on_bot_speech_stop(&mut self, now: Instant) {
        self.run_due(now);
        self.audio_started_turn = false;
        self.cancel_arm();
        if self.state == TurnState::UserSpeaking {
            tracing::debug!("bot stop arrived during user turn, ignoring");
            return;
        }

        // Hold the transcript until the last scheduled word has had its slot,
        // then pause before clearing. The hold ends at the last word's own
        // slot, so five words stopped at 1000ms are cleared by 3100ms.
        let scheduled = self.transcript.scheduled();
        let remaining = match self.transcript.anchor() {
            Some(anchor) if scheduled > 0 => {
                (anchor + self.word_offset(scheduled - 1)).saturating_duration_since(now)
            }
            _ => Duration::ZERO,
        };
        self.transcript.close_turn();
        self.schedule_clear(
            now + remaining + self.config.clear_pause(),
            ClearReason::AfterBotTurn,
        );
        self.transition(
            TurnState::WaitingForResponse,
            TransitionCause::BotSpeechStopped,
        );
        self.run_due(now);
    }

    pub fn on_user_speech_start(&mut self, now: Instant) {
        self.run_due(now);
        self.cancel_settle();
        self.cancel_arm();
        self.audio_started_turn = false;
        self.last_user_activity = Some(now);
        self.clear_transcript(ClearReason::UserTurn);
        self.transition(TurnState::UserSpeaking, TransitionCause::UserSpeechStarted);
    }

    pub fn on_user_speech_stop(&mut self, now: Instant) {
        self.run_due(now);
        self.last_user_activity = Some(now);
        self.cancel_settle();
        let handle = self
            .timers
            .schedule(now + self.config.user_settle(), Timer::UserSettle);
        self.settle_timer = Some(handle);
        self.run_due(now);
    }

    // ── Transcript sources ───────────────────────────────────────────

    /// Primary source callback: cumulative or incremental turn text.
    pub fn on_primary_text(&mut self, text: &str, now: Instant) {
        self.run_due(now);
        if text.trim().is_empty() {
            return;
        }
        if self.transcript.in_fallback() {
            self.cancel_reveals();
            let dropped = self.transcript.abandon_fallback(now);
            tracing::debug!(dropped, "primary text arrived after fallback armed");
            self.sink.emit(EventPayload::FallbackAbandoned {
                dropped_words: dropped,
            });
        }
        self.transcript.merge_primary(text, now);
        self.cancel_arm();
        if self.state == TurnState::BotSpeaking {
            self.schedule_pending_words(now);
        }
        self.run_due(now);
    }

    /// Fallback source callback: a fragment of synthesized text.
    ///
    /// Fragments are shown only while the bot is speaking and the fallback
    /// has been armed for the current turn.
    pub fn on_fragment_text(&mut self, text: &str, now: Instant) {
        self.run_due(now);
        if self.state != TurnState::BotSpeaking || !self.transcript.in_fallback() {
            return;
        }
        for word in self.transcript.push_fragment(text, now) {
            self.sink.emit(EventPayload::WordRevealed {
                id: word.id,
                index: word.id as usize,
            });
        }
    }

    // ── Secondary signals ────────────────────────────────────────────

    /// Feeds one meter reading. Measured readings also drive self-healing
    /// of missed bot start and stop events.
    pub fn on_volume(&mut self, sample: VolumeSample, now: Instant) {
        self.run_due(now);
        self.volume = sample.level;
        if sample.synthetic || !self.connected {
            return;
        }

        if sample.level > self.config.activity_threshold {
            self.last_bot_audio = Some(now);
            if !self.state.is_speaking() {
                tracing::warn!(
                    level = sample.level,
                    "audio activity without bot start event, forcing bot turn"
                );
                self.begin_bot_turn(now, TransitionCause::AudioActivity);
                self.audio_started_turn = true;
            }
        } else if self.state == TurnState::BotSpeaking {
            let silent_for = self
                .last_bot_audio
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or_default();
            if silent_for > self.config.bot_silence() {
                tracing::warn!(
                    silent_ms = silent_for.as_millis() as u64,
                    "bot audio silent without stop event, ending bot turn"
                );
                self.audio_started_turn = false;
                self.cancel_arm();
                self.transcript.close_turn();
                self.transition(
                    TurnState::WaitingForResponse,
                    TransitionCause::AudioSilence,
                );
                if self.clear_timer.is_none() {
                    self.schedule_clear(
                        now + self.config.forced_stop_clear(),
                        ClearReason::AfterBotTurn,
                    );
                }
            }
        }
        self.run_due(now);
    }

    /// Periodic stale-state check.
    pub fn on_janitor_tick(&mut self, now: Instant) {
        self.run_due(now);

        if self.state == TurnState::UserSpeaking {
            let idle_for = self
                .last_user_activity
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or_default();
            if idle_for > self.config.user_stale() {
                tracing::warn!(
                    idle_ms = idle_for.as_millis() as u64,
                    "user turn went stale, releasing it"
                );
                self.cancel_settle();
                self.transition(TurnState::WaitingForResponse, TransitionCause::UserStale);
            }
        }

        if !self.transcript.is_empty() && !self.state.is_speaking() {
            let stale = self
                .transcript
                .updated_at()
                .is_some_and(|at| now.saturating_duration_since(at) > self.config.transcript_stale());
            if stale {
                tracing::warn!(
                    words = self.transcript.revealed(),
                    "transcript went stale, clearing"
                );
                self.clear_transcript(ClearReason::Stale);
            }
        }
    }

    pub fn on_transport_state(&mut self, state: TransportState, now: Instant) {
        self.run_due(now);
        self.sink.emit(EventPayload::TransportChanged { state });
        match state {
            TransportState::Connecting => {
                self.connected = false;
                self.transition(TurnState::Connecting, TransitionCause::Transport);
            }
            TransportState::Connected | TransportState::Ready => {
                self.connected = true;
                if self.state == TurnState::Connecting {
                    self.transition(TurnState::Idle, TransitionCause::Transport);
                }
            }
            TransportState::Disconnected | TransportState::Error => self.reset(),
        }
    }

    /// Cancels every timer and returns to a fresh, disconnected `Idle`.
    pub fn reset(&mut self) {
        self.timers.clear();
        self.clear_timer = None;
        self.arm_timer = None;
        self.settle_timer = None;
        if self.transcript.reset() {
            self.sink.emit(EventPayload::TranscriptCleared {
                reason: ClearReason::Disconnect,
            });
        }
        self.connected = false;
        self.volume = 0.0;
        self.last_bot_audio = None;
        self.last_user_activity = None;
        self.audio_started_turn = false;
        self.transition(TurnState::Idle, TransitionCause::Transport);
    }

    // ── Internals ────────────────────────────────────────────────────

    fn transition(&mut self, to: TurnState, cause: TransitionCause) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::debug!(%from, %to, ?cause, "turn state changed");
        self.sink.emit(EventPayload::TurnChanged { from, to, cause });
    }

    fn begin_bot_turn(&mut self, now: Instant, cause: TransitionCause) {
        self.cancel_reveals();
        self.cancel_clear();
        self.cancel_arm();
        self.cancel_settle();

        let dropped = self.transcript.begin_turn(now);
        self.sink.emit(EventPayload::TurnReset {
            dropped_words: dropped,
        });
        self.last_bot_audio = Some(now);
        self.transition(TurnState::BotSpeaking, cause);

        if self.transcript.primary_seen() {
            self.schedule_pending_words(now);
        } else {
            let handle = self
                .timers
                .schedule(now + self.config.fallback_arm(), Timer::ArmFallback);
            self.arm_timer = Some(handle);
        }
    }

    /// Schedules every ingested-but-unscheduled word against the turn anchor.
    /// Without an anchor the text stays buffered until the next bot turn.
    fn schedule_pending_words(&mut self, now: Instant) {
        let Some(anchor) = self.transcript.anchor() else {
            return;
        };
        let pending = self.transcript.unscheduled();
        if pending.is_empty() {
            return;
        }
        self.transcript.mark_scheduled(pending.end);

        for index in pending {
            let at = (anchor + self.word_offset(index)).max(now);
            self.sink.emit(EventPayload::WordScheduled {
                id: index as u64,
                index,
                delay_ms: at.saturating_duration_since(now).as_millis() as u64,
            });
            if index == 0 {
                // The first word of a turn never waits.
                self.reveal_word(0, now);
            } else {
                self.timers.schedule(at, Timer::RevealWord { index });
            }
        }
    }

    fn word_offset(&self, index: usize) -> Duration {
        let index = u32::try_from(index).unwrap_or(u32::MAX);
        self.config.word_cadence().saturating_mul(index)
    }

    fn reveal_word(&mut self, index: usize, at: Instant) {
        if let Some(word) = self.transcript.reveal(index, at) {
            self.sink.emit(EventPayload::WordRevealed { id: word.id, index });
        }
    }

    fn clear_transcript(&mut self, reason: ClearReason) {
        self.cancel_reveals();
        self.cancel_clear();
        // A user turn supersedes any reply buffered for the next bot turn.
        let had_words = match reason {
            ClearReason::UserTurn => self.transcript.reset(),
            _ => self.transcript.clear(),
        };
        if had_words {
            tracing::debug!(?reason, "transcript cleared");
            self.sink.emit(EventPayload::TranscriptCleared { reason });
        }
    }

    fn schedule_clear(&mut self, at: Instant, reason: ClearReason) {
        self.cancel_clear();
        let handle = self.timers.schedule(at, Timer::ClearTranscript { reason });
        self.clear_timer = Some(handle);
    }

    fn cancel_reveals(&mut self) {
        self.timers
            .retain(|timer| !matches!(timer, Timer::RevealWord { .. }));
    }

    fn cancel_clear(&mut self) {
        if let Some(handle) = self.clear_timer.take() {
            self.timers.cancel(handle);
        }
    }

    fn cancel_arm(&mut self) {
        if let Some(handle) = self.arm_timer.take() {
            self.timers.cancel(handle);
        }
    }

    fn cancel_settle(&mut self) {
        if let Some(handle) = self.settle_timer.take() {
            self.timers.cancel(handle);
        }
    }

    fn run_due(&mut self, now: Instant) {
        while let Some((at, timer)) = self.timers.pop_due(now) {
            self.fire(timer, at);
        }
    }

    fn fire(&mut self, timer: Timer, at: Instant) {
        match timer {
            Timer::RevealWord { index } => self.reveal_word(index, at),
            Timer::ClearTranscript { reason } => {
                self.clear_timer = None;
                if !self.state.is_speaking() {
                    self.clear_transcript(reason);
                }
            }
            Timer::ArmFallback => {
                self.arm_timer = None;
                if self.state == TurnState::BotSpeaking
                    && !self.transcript.primary_seen()
                    && self.transcript.scheduled() == 0
                {
                    tracing::debug!("no primary text yet, showing synthesis fragments");
                    self.transcript.enter_fallback();
                    self.sink.emit(EventPayload::FallbackArmed);
                }
            }
            Timer::UserSettle => {
                self.settle_timer = None;
                // A bot turn that started during the settle delay wins.
                if self.state == TurnState::UserSpeaking {
                    self.transition(
                        TurnState::WaitingForResponse,
                        TransitionCause::UserSettled,
                    );
                }
            }
        }
    }
}
