//! The real-time session collaborator contract.
//!
//! A [`SessionTransport`] is the opaque media and event channel to the remote
//! agent. The adapter only needs to join and leave it, watch its events, and
//! read a tap of the remote audio it is already playing.
//!
//! [`InMemoryTransport`] implements the contract without any networking, for
//! tests and local demos.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use parley_types::{SessionCredentials, TransportState};
use tokio::sync::broadcast;

use crate::error::VoiceError;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events the remote session reports.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    BotStartedSpeaking,
    BotStoppedSpeaking,
    UserStartedSpeaking,
    UserStoppedSpeaking,
    /// Cumulative or incremental text from the agent's language model.
    BotLlmText(String),
    /// Text fragments as speech is synthesized.
    BotTtsText(String),
    TransportStateChanged(TransportState),
    /// A remote audio track became readable.
    RemoteAudioAvailable,
}

/// Read-only view of the remote audio the session is already playing.
///
/// Implementations must not create a second playback path.
pub trait RemoteAudioSignal: Send + Sync {
    /// Copies the most recent samples into `out`, oldest first, and returns
    /// how many were written.
    fn read_frame(&self, out: &mut [f32]) -> usize;
}

#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn join(&self, credentials: &SessionCredentials) -> Result<(), VoiceError>;

    async fn leave(&self) -> Result<(), VoiceError>;

    fn state(&self) -> TransportState;

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;

    /// The first inbound audio signal, if one is available yet.
    fn remote_audio_signal(&self) -> Option<Arc<dyn RemoteAudioSignal>>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("transport lock poisoned, recovering with stale state");
            poisoned.into_inner()
        }
    }
}

/// Ring buffer of the most recent PCM samples of a playing stream.
#[derive(Debug)]
pub struct AudioTap {
    samples: Mutex<VecDeque<f32>>,
    capacity: usize,
}

impl AudioTap {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Records samples handed to the playback sink.
    pub fn push(&self, pcm: &[f32]) {
        let mut samples = lock(&self.samples);
        for &sample in pcm {
            if samples.len() == self.capacity {
                samples.pop_front();
            }
            samples.push_back(sample);
        }
    }
}

impl RemoteAudioSignal for AudioTap {
    fn read_frame(&self, out: &mut [f32]) -> usize {
        let samples = lock(&self.samples);
        let n = out.len().min(samples.len());
        let skip = samples.len() - n;
        for (slot, &sample) in out.iter_mut().zip(samples.iter().skip(skip)) {
            *slot = sample;
        }
        n
    }
}

/// Transport with no network behind it. Remote behavior is scripted through
/// [`emit`](Self::emit) and [`attach_audio`](Self::attach_audio).
pub struct InMemoryTransport {
    events: broadcast::Sender<ChannelEvent>,
    state: Mutex<TransportState>,
    audio: Mutex<Option<Arc<AudioTap>>>,
    joined_with: Mutex<Option<SessionCredentials>>,
    fail_next_join: Mutex<Option<String>>,
    joins: AtomicUsize,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events,
            state: Mutex::new(TransportState::Disconnected),
            audio: Mutex::new(None),
            joined_with: Mutex::new(None),
            fail_next_join: Mutex::new(None),
            joins: AtomicUsize::new(0),
        }
    }

    /// Delivers an event as if the remote session sent it.
    pub fn emit(&self, event: ChannelEvent) {
        if let ChannelEvent::TransportStateChanged(state) = event {
            *lock(&self.state) = state;
        }
        // No subscribers just means nobody is listening yet.
        let _ = self.events.send(event);
    }

    /// Exposes a remote audio tap and announces it.
    pub fn attach_audio(&self, tap: Arc<AudioTap>) {
        *lock(&self.audio) = Some(tap);
        self.emit(ChannelEvent::RemoteAudioAvailable);
    }

    /// Makes the next [`join`](SessionTransport::join) fail with `message`.
    pub fn fail_next_join(&self, message: impl Into<String>) {
        *lock(&self.fail_next_join) = Some(message.into());
    }

    pub fn joined_with(&self) -> Option<SessionCredentials> {
        lock(&self.joined_with).clone()
    }

    pub fn join_count(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: TransportState) {
        self.emit(ChannelEvent::TransportStateChanged(state));
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionTransport for InMemoryTransport {
    async fn join(&self, credentials: &SessionCredentials) -> Result<(), VoiceError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        self.set_state(TransportState::Connecting);

        let failure = lock(&self.fail_next_join).take();
        if let Some(message) = failure {
            self.set_state(TransportState::Error);
            return Err(VoiceError::Transport(message));
        }

        *lock(&self.joined_with) = Some(credentials.clone());
        self.set_state(TransportState::Connected);
        self.set_state(TransportState::Ready);
        Ok(())
    }

    async fn leave(&self) -> Result<(), VoiceError> {
        *lock(&self.joined_with) = None;
        *lock(&self.audio) = None;
        if *lock(&self.state) != TransportState::Disconnected {
            self.set_state(TransportState::Disconnected);
        }
        Ok(())
    }

    fn state(&self) -> TransportState {
        *lock(&self.state)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    fn remote_audio_signal(&self) -> Option<Arc<dyn RemoteAudioSignal>> {
        lock(&self.audio)
            .clone()
            .map(|tap| tap as Arc<dyn RemoteAudioSignal>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tap_returns_most_recent_samples() {
        let tap = AudioTap::new(4);
        tap.push(&[1.0, 2.0, 3.0]);
        tap.push(&[4.0, 5.0]);

        let mut out = [0.0; 3];
        assert_eq!(tap.read_frame(&mut out), 3);
        assert_eq!(out, [3.0, 4.0, 5.0]);

        let mut wide = [0.0; 8];
        assert_eq!(tap.read_frame(&mut wide), 4);
        assert_eq!(&wide[..4], &[2.0, 3.0, 4.0, 5.0]);
    }

    #[tokio::test]
    async fn join_walks_through_connect_phases() {
        let transport = InMemoryTransport::new();
        let mut events = transport.subscribe();
        let credentials = SessionCredentials {
            room_url: "https://rooms.example/abc".to_string(),
            token: "tok".to_string(),
            ..Default::default()
        };

        transport.join(&credentials).await.unwrap();
        assert_eq!(transport.state(), TransportState::Ready);
        assert_eq!(transport.joined_with(), Some(credentials));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                ChannelEvent::TransportStateChanged(TransportState::Connecting),
                ChannelEvent::TransportStateChanged(TransportState::Connected),
                ChannelEvent::TransportStateChanged(TransportState::Ready),
            ]
        );

        transport.leave().await.unwrap();
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn scripted_join_failure_reports_error() {
        let transport = InMemoryTransport::new();
        transport.fail_next_join("room closed");

        let err = transport
            .join(&SessionCredentials::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::Transport(ref m) if m == "room closed"));
        assert_eq!(transport.state(), TransportState::Error);
        assert!(transport.joined_with().is_none());
    }
}
