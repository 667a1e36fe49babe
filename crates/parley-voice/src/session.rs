//! Session channel adapter.
//!
//! [`VoiceSession`] owns one real-time session bound to one agent. It asks
//! the broker for credentials, joins the transport, and runs a single driver
//! task that owns the [`ConversationEngine`]. Every engine input (channel
//! events, volume samples, janitor ticks, timer deadlines) is applied on
//! that task, so the engine is never shared or locked.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use parley_engine::{ConversationEngine, ConversationSnapshot};
use parley_observe::{EventPayload, EventSink};
use parley_types::{AgentProfile, TransportState, VolumeSample};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::broker::CredentialBroker;
use crate::config::SessionConfig;
use crate::error::VoiceError;
use crate::sampler::spawn_sampler;
use crate::transport::{ChannelEvent, SessionTransport};

const VOLUME_CHANNEL_CAPACITY: usize = 64;

struct SessionTasks {
    driver: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
    sampler: Option<JoinHandle<()>>,
}

pub struct VoiceSession {
    config: SessionConfig,
    broker: Arc<dyn CredentialBroker>,
    transport: Arc<dyn SessionTransport>,
    sink: Arc<dyn EventSink>,
    connecting: AtomicBool,
    /// Bumped by every connect attempt and every disconnect. An attempt
    /// whose generation is no longer current has been cancelled.
    generation: AtomicU64,
    snapshots: watch::Sender<ConversationSnapshot>,
    tasks: Mutex<Option<SessionTasks>>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        broker: Arc<dyn CredentialBroker>,
        transport: Arc<dyn SessionTransport>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (snapshots, _) = watch::channel(ConversationSnapshot::default());
        Self {
            config,
            broker,
            transport,
            sink,
            connecting: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            snapshots,
            tasks: Mutex::new(None),
        }
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.state().is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::Acquire)
    }

    /// The latest published view of the conversation.
    pub fn snapshot(&self) -> ConversationSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.snapshots.subscribe()
    }

    /// Connects to `agent`. Does nothing if a session is live or an attempt
    /// is already in flight.
    ///
    /// On failure the session is left disconnected, the error message is
    /// published in the snapshot, and the error is returned. A
    /// [`disconnect`](Self::disconnect) during the attempt cancels it: the
    /// transport is left and [`VoiceError::Cancelled`] is returned.
    pub async fn connect(&self, agent: &AgentProfile) -> Result<(), VoiceError> {
        if self.is_connected() {
            tracing::debug!(agent = %agent.id, "already connected, ignoring connect");
            return Ok(());
        }
        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(agent = %agent.id, "connection attempt in flight, ignoring connect");
            return Ok(());
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        // A transport that dropped on its own leaves its tasks behind.
        self.stop_tasks().await;

        let result = match self.establish(agent, generation).await {
            Err(_) if !self.is_current(generation) => Err(VoiceError::Cancelled),
            other => other,
        };
        match &result {
            Err(VoiceError::Cancelled) => {
                // disconnect() already tore down and released the flag.
                tracing::info!(agent = %agent.id, "connection attempt cancelled by disconnect");
                return Err(VoiceError::Cancelled);
            }
            Err(err) => {
                tracing::error!(agent = %agent.id, error = %err, "connection attempt failed");
                self.stop_tasks().await;
                if let Err(leave_err) = self.transport.leave().await {
                    tracing::warn!(error = %leave_err, "leave after failed connect also failed");
                }
                self.sink.emit(EventPayload::ConnectFailed {
                    message: err.to_string(),
                });
                self.snapshots.send_replace(ConversationSnapshot {
                    error: Some(err.to_string()),
                    ..Default::default()
                });
            }
            Ok(()) => {}
        }
        if self.is_current(generation) {
            self.connecting.store(false, Ordering::Release);
        }
        result
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    async fn establish(&self, agent: &AgentProfile, generation: u64) -> Result<(), VoiceError> {
        let engine = ConversationEngine::new(self.config.engine.clone(), self.sink.clone());
        let events = self.transport.subscribe();
        let (volume_tx, volume_rx) = mpsc::channel(VOLUME_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let driver = tokio::spawn(drive(
            engine,
            events,
            volume_rx,
            self.snapshots.clone(),
            shutdown_rx,
        ));
        {
            let mut tasks = self.lock_tasks();
            if !self.is_current(generation) {
                let _ = shutdown_tx.send(());
                return Err(VoiceError::Cancelled);
            }
            *tasks = Some(SessionTasks {
                driver,
                shutdown: shutdown_tx,
                sampler: None,
            });
        }

        let credentials = self.broker.request_credentials(agent).await?;
        if !self.is_current(generation) {
            return Err(VoiceError::Cancelled);
        }
        tracing::info!(
            agent = %agent.id,
            session_id = credentials.session_id.as_deref().unwrap_or("-"),
            "credentials issued, joining session"
        );
        self.transport.join(&credentials).await?;

        // The sampler is attached under the task lock so a concurrent
        // disconnect either sees it and aborts it, or cancels this attempt.
        let attached = {
            let mut tasks = self.lock_tasks();
            match tasks.as_mut() {
                Some(running) if self.is_current(generation) => {
                    running.sampler = Some(spawn_sampler(
                        self.config.sampler.clone(),
                        self.transport.clone(),
                        volume_tx,
                        self.sink.clone(),
                    ));
                    true
                }
                _ => false,
            }
        };
        if attached {
            return Ok(());
        }
        tracing::debug!(agent = %agent.id, "disconnected while joining, leaving again");
        if let Err(err) = self.transport.leave().await {
            tracing::warn!(error = %err, "leave after cancelled connect failed");
        }
        Err(VoiceError::Cancelled)
    }

    /// Tears the session down. Safe to call at any time, any number of times.
    pub async fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.connecting.store(false, Ordering::Release);
        let had_tasks = self.stop_tasks().await;
        if !had_tasks && self.transport.state() == TransportState::Disconnected {
            return;
        }
        if let Err(err) = self.transport.leave().await {
            tracing::warn!(error = %err, "transport leave failed");
        }
        self.snapshots.send_replace(ConversationSnapshot::default());
        tracing::info!("session disconnected");
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Option<SessionTasks>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("session task lock poisoned, recovering with stale state");
                poisoned.into_inner()
            }
        }
    }

    /// Stops the sampler and lets the driver reset the engine. Returns
    /// whether anything was running.
    async fn stop_tasks(&self) -> bool {
        let Some(tasks) = self.lock_tasks().take() else {
            return false;
        };
        if let Some(sampler) = tasks.sampler {
            sampler.abort();
        }
        let _ = tasks.shutdown.send(());
        if let Err(err) = tasks.driver.await {
            if !err.is_cancelled() {
                tracing::error!(error = %err, "session driver panicked");
            }
        }
        true
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

fn publish(engine: &ConversationEngine, snapshots: &watch::Sender<ConversationSnapshot>) {
    let next = engine.snapshot();
    snapshots.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

fn apply(engine: &mut ConversationEngine, event: ChannelEvent) {
    let at = now();
    match event {
        ChannelEvent::BotStartedSpeaking => engine.on_bot_speech_start(at),
        ChannelEvent::BotStoppedSpeaking => engine.on_bot_speech_stop(at),
        ChannelEvent::UserStartedSpeaking => engine.on_user_speech_start(at),
        ChannelEvent::UserStoppedSpeaking => engine.on_user_speech_stop(at),
        ChannelEvent::BotLlmText(text) => engine.on_primary_text(&text, at),
        ChannelEvent::BotTtsText(text) => engine.on_fragment_text(&text, at),
        ChannelEvent::TransportStateChanged(state) => engine.on_transport_state(state, at),
        ChannelEvent::RemoteAudioAvailable => {}
    }
}

async fn drive(
    mut engine: ConversationEngine,
    mut events: broadcast::Receiver<ChannelEvent>,
    mut volume: mpsc::Receiver<VolumeSample>,
    snapshots: watch::Sender<ConversationSnapshot>,
    mut shutdown: oneshot::Receiver<()>,
) {
    engine.on_transport_state(TransportState::Connecting, now());
    publish(&engine, &snapshots);

    let mut janitor = tokio::time::interval(engine.config().janitor_interval());
    janitor.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut volume_open = true;

    loop {
        let deadline = engine.next_deadline().map(Instant::from_std);
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = &mut shutdown => {
                engine.reset();
                publish(&engine, &snapshots);
                break;
            }
            event = events.recv() => match event {
                Ok(event) => apply(&mut engine, event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "session driver fell behind channel events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    engine.reset();
                    publish(&engine, &snapshots);
                    break;
                }
            },
            sample = volume.recv(), if volume_open => match sample {
                Some(sample) => engine.on_volume(sample, now()),
                None => volume_open = false,
            },
            _ = janitor.tick() => engine.on_janitor_tick(now()),
            _ = timer => engine.advance(now()),
        }
        publish(&engine, &snapshots);
    }
    tracing::debug!("session driver stopped");
}
