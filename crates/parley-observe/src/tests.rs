//! Unit tests for the engine event log.

use parley_types::TurnState;

use crate::event::{ClearReason, EventDomain, EventPayload, TransitionCause};
use crate::store::{EventFilter, EventLog, EventSink};

fn turn_changed(to: TurnState) -> EventPayload {
    EventPayload::TurnChanged {
        from: TurnState::Idle,
        to,
        cause: TransitionCause::BotSpeechStarted,
    }
}

// ── record tests ─────────────────────────────────────────────────────

#[test]
fn record_assigns_increasing_seq() {
    let log = EventLog::new();
    assert_eq!(log.next_seq(), 1);

    let first = log.record(EventPayload::FallbackArmed);
    let second = log.record(turn_changed(TurnState::BotSpeaking));

    assert_eq!(first.seq, 1);
    assert_eq!(second.seq, 2);
    assert_eq!(log.next_seq(), 3);
    assert_eq!(second.domain, "TURN");
    assert_eq!(second.event_type, "TURN_CHANGED");
}

#[test]
fn log_drops_oldest_past_capacity() {
    let log = EventLog::with_capacity(3);
    for id in 0..5u64 {
        log.emit(EventPayload::WordRevealed {
            id,
            index: id as usize,
        });
    }

    assert_eq!(log.len(), 3);
    let events = log.query(&EventFilter::default());
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![3, 4, 5]);
}

// ── query tests ──────────────────────────────────────────────────────

#[test]
fn query_filters_by_domain_and_type() {
    let log = EventLog::new();
    log.emit(turn_changed(TurnState::BotSpeaking));
    log.emit(EventPayload::WordScheduled {
        id: 0,
        index: 0,
        delay_ms: 0,
    });
    log.emit(EventPayload::TranscriptCleared {
        reason: ClearReason::Stale,
    });

    let transcript = log.query(&EventFilter {
        domain: Some(EventDomain::Transcript),
        ..Default::default()
    });
    assert_eq!(transcript.len(), 2);

    let cleared = log.query(&EventFilter {
        event_type: Some("TRANSCRIPT_CLEARED".to_string()),
        ..Default::default()
    });
    assert_eq!(cleared.len(), 1);
    assert_eq!(
        cleared[0].payload,
        EventPayload::TranscriptCleared {
            reason: ClearReason::Stale
        }
    );
}

#[test]
fn query_respects_cursor_and_limit() {
    let log = EventLog::new();
    for _ in 0..10 {
        log.emit(EventPayload::FallbackArmed);
    }

    let page = log.query(&EventFilter {
        after_seq: Some(4),
        limit: Some(3),
        ..Default::default()
    });
    let seqs: Vec<u64> = page.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![5, 6, 7]);
}

// ── payload tests ────────────────────────────────────────────────────

#[test]
fn payload_serializes_with_event_tag() {
    let json = serde_json::to_value(turn_changed(TurnState::UserSpeaking)).unwrap();
    assert_eq!(json["event"], "TURN_CHANGED");
    assert_eq!(json["to"], "user_speaking");
    assert_eq!(json["cause"], "bot_speech_started");
}

#[test]
fn domain_labels_parse() {
    for domain in [
        EventDomain::Turn,
        EventDomain::Transcript,
        EventDomain::Session,
        EventDomain::Audio,
    ] {
        assert_eq!(domain.as_str().parse::<EventDomain>().unwrap(), domain);
    }
    assert!("IDENTITY".parse::<EventDomain>().is_err());
}

#[tokio::test]
async fn subscribers_receive_recorded_events() {
    let log = EventLog::new();
    let mut rx = log.subscribe();

    log.emit(EventPayload::AudioAcquired { synthetic: true });

    let event = rx.recv().await.expect("should receive event");
    assert_eq!(event.seq, 1);
    assert_eq!(event.event_type, "AUDIO_ACQUIRED");
}
