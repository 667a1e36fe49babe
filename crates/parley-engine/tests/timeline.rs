use std::sync::Arc;
use std::time::{Duration, Instant};

use parley_engine::{ConversationEngine, EngineConfig};
use parley_observe::NoopSink;
use parley_types::{TransportState, TurnState};

fn shown(engine: &ConversationEngine) -> Vec<&str> {
    engine.display().iter().map(|w| w.word.as_str()).collect()
}

#[test]
fn bot_reply_reveals_at_cadence_then_clears_after_pause() {
    let base = Instant::now();
    let at = |ms: u64| base + Duration::from_millis(ms);
    let mut engine = ConversationEngine::new(EngineConfig::default(), Arc::new(NoopSink));

    engine.on_transport_state(TransportState::Connecting, at(0));
    engine.on_transport_state(TransportState::Ready, at(0));
    engine.on_bot_speech_start(at(0));
    engine.on_primary_text("Hello there how are you", at(0));
    assert_eq!(shown(&engine), vec!["Hello"]);

    engine.advance(at(250));
    assert_eq!(shown(&engine), vec!["Hello", "there"]);

    engine.advance(at(1000));
    assert_eq!(shown(&engine), vec!["Hello", "there", "how", "are", "you"]);

    engine.on_bot_speech_stop(at(1000));
    assert_eq!(engine.state(), TurnState::WaitingForResponse);

    engine.advance(at(2900));
    assert_eq!(shown(&engine).len(), 5);

    engine.advance(at(3100));
    assert!(engine.display().is_empty());
    assert!(engine.transcript().text().is_none());
    assert_eq!(engine.state(), TurnState::WaitingForResponse);
}

#[test]
fn deadlines_drive_the_host_loop() {
    let base = Instant::now();
    let mut engine = ConversationEngine::new(EngineConfig::default(), Arc::new(NoopSink));
    engine.on_transport_state(TransportState::Ready, base);
    engine.on_bot_speech_start(base);
    engine.on_primary_text("one two three", base);

    let mut wakeups = 0;
    while let Some(deadline) = engine.next_deadline() {
        engine.advance(deadline);
        wakeups += 1;
    }
    assert_eq!(wakeups, 2);
    assert_eq!(shown(&engine), vec!["one", "two", "three"]);
}
