//! End-to-end conversation scenarios against scripted providers.
//!
//! Time is paused, so frame pacing and provider delays are deterministic.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{
    LOUD, OutputCall, Reply, Rig, SILENCE, ScriptedGenerator, ScriptedRecognizer,
    ScriptedSynthesizer, Session, frame, test_config,
};
use parley_core::{
    CapabilitySignalProvider, ContextConfig, ContextSeed, DiscardReason, EngineError,
    EngineEvent, LatencyKind, MessageRole, ProviderError, QualityTier, RuntimeSignals, Speaker,
    Stage, SuppressReason, ThermalLevel, TimeoutKind, Turn, TurnState,
};
use parley_engine::ConversationEngine;
use parley_engine::quality::directive_for;
use tokio::time::sleep;

fn is_state(to: TurnState) -> impl Fn(&EngineEvent) -> bool {
    move |e| matches!(e, EngineEvent::StateChanged { to: t, .. } if *t == to)
}

fn paced(chunks: usize, pace_ms: u64) -> ScriptedSynthesizer {
    ScriptedSynthesizer::new(chunks, Duration::from_millis(pace_ms))
}

#[tokio::test(start_paused = true)]
async fn full_turn_cycle_commits_both_turns() {
    let rig = Rig::new(
        ScriptedRecognizer::new(&["what time is it"]),
        ScriptedGenerator::new(vec![Reply::Tokens(vec!["It is ", "noon. ", "Anything else?"])]),
        paced(2, 50),
    );
    let mut session = rig.start(test_config());

    assert!(session.utterance(Duration::from_millis(300)).await);

    assert_eq!(
        session.transitions(),
        vec![
            (TurnState::Idle, TurnState::UserSpeaking),
            (TurnState::UserSpeaking, TurnState::ProcessingUtterance),
            (TurnState::ProcessingUtterance, TurnState::Generating),
            (TurnState::Generating, TurnState::Speaking),
            (TurnState::Speaking, TurnState::Idle),
        ]
    );
    assert!(session.has(|e| matches!(e, EngineEvent::TranscriptPartial { text, .. } if text == "what")));

    let turns = rig.sink.turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].speaker(), Speaker::User);
    assert_eq!(turns[0].text(), "what time is it");
    assert!(turns[0].latency(LatencyKind::CaptureToTranscript).is_some());

    assert_eq!(turns[1].speaker(), Speaker::System);
    assert_eq!(turns[1].text(), "It is noon. Anything else?");
    assert!(!turns[1].is_interrupted());
    assert!(turns[1].latency(LatencyKind::TranscriptToFirstToken).is_some());
    assert!(turns[1].latency(LatencyKind::FirstTokenToFirstAudio).is_some());

    let spoken: Vec<String> = rig.synthesizer.requests().into_iter().map(|r| r.text).collect();
    assert_eq!(spoken, vec!["It is noon.", "Anything else?"]);
    let plays = rig
        .output
        .calls()
        .iter()
        .filter(|c| matches!(c, OutputCall::Play(_)))
        .count();
    assert_eq!(plays, 4);
    assert_eq!(session.handle.stats().committed_turns, 2);

    let (events, result) = session.finish().await;
    assert!(result.is_ok());
    assert_eq!(events.last(), Some(&EngineEvent::Ended));
}

/// Reach `Speaking` for the first reply and let its first audio play.
async fn speak_first_reply(session: &mut Session) {
    session.feed(LOUD, Duration::from_millis(300)).await;
    assert!(
        session
            .feed_until(SILENCE, Duration::from_secs(2), is_state(TurnState::Speaking))
            .await
    );
    session.feed(SILENCE, Duration::from_millis(140)).await;
}

#[tokio::test(start_paused = true)]
async fn barge_in_flushes_playback_and_drops_stale_audio() {
    let rig = Rig::new(
        ScriptedRecognizer::new(&["what time is it", "stop"]),
        ScriptedGenerator::new(vec![Reply::Tokens(vec![
            "It is noon. ",
            "The weather is clear. ",
            "Enjoy your day.",
        ])]),
        paced(3, 100),
    );
    let mut session = rig.start(test_config());
    speak_first_reply(&mut session).await;

    assert!(
        session
            .feed_until(LOUD, Duration::from_secs(1), |e| matches!(e, EngineEvent::BargeIn { .. }))
            .await
    );
    assert_eq!(session.handle.current_state(), TurnState::UserSpeaking);
    assert!(session.has(|e| matches!(e, EngineEvent::PlaybackFlushed { .. })));

    let transitions = session.transitions();
    assert!(transitions.contains(&(TurnState::Speaking, TurnState::Interrupted)));
    assert!(transitions.contains(&(TurnState::Interrupted, TurnState::UserSpeaking)));

    // Give the cancelled synthesis every chance to deliver late audio.
    session.feed(LOUD, Duration::from_millis(400)).await;

    let interrupted = rig
        .sink
        .turns()
        .into_iter()
        .find(Turn::is_interrupted)
        .expect("interrupted system turn committed");
    assert_eq!(interrupted.speaker(), Speaker::System);
    assert!(interrupted.text().starts_with("It is noon."));

    let calls = rig.output.calls();
    let flush_at = calls
        .iter()
        .position(|c| *c == OutputCall::Flush)
        .expect("playback flushed");
    assert!(calls[..flush_at].contains(&OutputCall::Play(interrupted.id())));
    assert!(!calls[flush_at..].contains(&OutputCall::Play(interrupted.id())));
    assert_eq!(session.handle.stats().barge_ins, 1);
}

#[tokio::test(start_paused = true)]
async fn second_barge_in_within_cooldown_is_suppressed() {
    let rig = Rig::new(
        ScriptedRecognizer::new(&["what time is it", "stop"]),
        ScriptedGenerator::new(vec![
            Reply::Tokens(vec!["It is noon. ", "Enjoy your day."]),
            Reply::Tokens(vec!["Stopping now. ", "Bye."]),
        ]),
        paced(3, 100),
    );
    let mut session = rig.start(test_config());
    speak_first_reply(&mut session).await;

    assert!(
        session
            .feed_until(LOUD, Duration::from_secs(1), |e| matches!(e, EngineEvent::BargeIn { .. }))
            .await
    );
    assert!(
        session
            .feed_until(SILENCE, Duration::from_secs(1), is_state(TurnState::Speaking))
            .await
    );
    session.feed(SILENCE, Duration::from_millis(100)).await;

    assert!(
        session
            .feed_until(LOUD, Duration::from_millis(500), |e| {
                matches!(e, EngineEvent::BargeInSuppressed { reason: SuppressReason::Cooldown, .. })
            })
            .await
    );
    assert_eq!(session.handle.current_state(), TurnState::Speaking);
    assert_eq!(session.count(|e| matches!(e, EngineEvent::BargeIn { .. })), 1);
    assert_eq!(
        session.count(|e| matches!(e, EngineEvent::PlaybackFlushed { .. })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn pause_is_idempotent_and_resume_replays_interrupted_chunk() {
    let rig = Rig::new(
        ScriptedRecognizer::new(&["read it to me"]),
        ScriptedGenerator::new(vec![Reply::Tokens(vec!["One moment. ", "Here it is."])]),
        paced(3, 100),
    );
    let mut session = rig.start(test_config());
    speak_first_reply(&mut session).await;

    session.handle.pause();
    session.handle.pause();
    session.feed(LOUD, Duration::from_millis(200)).await;

    assert_eq!(session.handle.current_state(), TurnState::Paused);
    assert_eq!(session.count(is_state(TurnState::Paused)), 1);
    assert!(rig.output.calls().contains(&OutputCall::Flush));

    session.handle.resume();
    assert!(
        session
            .feed_until(SILENCE, Duration::from_secs(3), is_state(TurnState::Idle))
            .await
    );

    let spoken: Vec<String> = rig.synthesizer.requests().into_iter().map(|r| r.text).collect();
    assert_eq!(spoken, vec!["One moment.", "One moment.", "Here it is."]);
    assert_eq!(rig.generator.requests().len(), 1);

    let reply = rig.sink.turns().pop().unwrap();
    assert_eq!(reply.text(), "One moment. Here it is.");
    assert!(!reply.is_interrupted());
}

#[tokio::test(start_paused = true)]
async fn resume_restarts_generation_when_provider_cannot_continue() {
    let rig = Rig::new(
        ScriptedRecognizer::new(&["tell me a story"]),
        ScriptedGenerator::new(vec![
            Reply::Stall(vec!["Once upon a time. "]),
            Reply::Tokens(vec!["A short one. "]),
        ]),
        paced(3, 100),
    );
    let mut session = rig.start(test_config());
    speak_first_reply(&mut session).await;

    session.handle.pause();
    session.feed(SILENCE, Duration::from_millis(40)).await;
    session.handle.resume();
    assert!(
        session
            .feed_until(SILENCE, Duration::from_secs(3), is_state(TurnState::Idle))
            .await
    );

    assert!(session.has(|e| matches!(
        e,
        EngineEvent::TurnDiscarded { reason: DiscardReason::ResumeRestart, .. }
    )));
    let requests = rig.generator.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].resume_from, None);
    assert_eq!(requests[1].messages, requests[0].messages);
    assert_eq!(rig.sink.turns().pop().unwrap().text(), "A short one.");
}

#[tokio::test(start_paused = true)]
async fn resume_continues_from_generated_text_when_supported() {
    let rig = Rig::new(
        ScriptedRecognizer::new(&["tell me a story"]),
        ScriptedGenerator::new(vec![
            Reply::Stall(vec!["Once upon a time. "]),
            Reply::Tokens(vec!["The end."]),
        ])
        .resumable(),
        paced(3, 100),
    );
    let mut session = rig.start(test_config());
    speak_first_reply(&mut session).await;

    session.handle.pause();
    session.feed(SILENCE, Duration::from_millis(40)).await;
    session.handle.resume();
    assert!(
        session
            .feed_until(SILENCE, Duration::from_secs(3), is_state(TurnState::Idle))
            .await
    );

    assert!(!session.has(|e| matches!(e, EngineEvent::TurnDiscarded { .. })));
    let requests = rig.generator.requests();
    assert_eq!(requests[1].resume_from.as_deref(), Some("Once upon a time. "));
    assert_eq!(
        rig.sink.turns().pop().unwrap().text(),
        "Once upon a time. The end."
    );
}

#[tokio::test(start_paused = true)]
async fn transient_generation_failure_is_retried() {
    let rig = Rig::new(
        ScriptedRecognizer::new(&["hello"]),
        ScriptedGenerator::new(vec![
            Reply::Fail(ProviderError::transient("upstream 503")),
            Reply::Tokens(vec!["Hi there."]),
        ]),
        paced(1, 50),
    );
    let mut session = rig.start(test_config());

    assert!(session.utterance(Duration::from_millis(200)).await);

    assert!(session.has(|e| *e
        == EngineEvent::Retrying {
            stage: Stage::Generation,
            attempt: 1,
        }));
    assert!(!session.has(|e| matches!(e, EngineEvent::RecoverableError { .. })));
    assert_eq!(rig.sink.turns().pop().unwrap().text(), "Hi there.");
}

#[tokio::test(start_paused = true)]
async fn repeated_synthesis_failure_returns_to_idle() {
    let rig = Rig::new(
        ScriptedRecognizer::new(&["hello"]),
        ScriptedGenerator::new(vec![Reply::Tokens(vec!["Hi there."])]),
        paced(1, 50)
            .fail_next(ProviderError::transient("voice busy"))
            .fail_next(ProviderError::transient("voice busy")),
    );
    let mut session = rig.start(test_config());

    assert!(session.utterance(Duration::from_millis(200)).await);

    assert!(session.has(|e| matches!(
        e,
        EngineEvent::RecoverableError { stage: Stage::Synthesis, .. }
    )));
    assert!(session.has(|e| matches!(
        e,
        EngineEvent::TurnDiscarded { reason: DiscardReason::Failed, .. }
    )));
    assert_eq!(rig.sink.turns().len(), 1);
    assert_eq!(session.handle.stats().recoverable_errors, 1);

    // The engine is still usable.
    assert_eq!(session.handle.current_state(), TurnState::Idle);
    assert!(session.handle.push_frame(frame(SILENCE)).is_ok());
}

#[tokio::test(start_paused = true)]
async fn fatal_provider_failure_ends_conversation() {
    let rig = Rig::new(
        ScriptedRecognizer::new(&["hello"]),
        ScriptedGenerator::new(vec![Reply::Tokens(vec!["Hi there."])]),
        paced(1, 50).fail_next(ProviderError::fatal("voice not licensed")),
    );
    let mut session = rig.start(test_config());

    session.feed(LOUD, Duration::from_millis(200)).await;
    assert!(
        session
            .feed_until(SILENCE, Duration::from_secs(2), |e| *e == EngineEvent::Ended)
            .await
    );
    assert!(session.has(|e| matches!(e, EngineEvent::Fatal { stage: Stage::Synthesis, .. })));

    let result = session.task.await.unwrap();
    assert!(matches!(
        result,
        Err(EngineError::FatalProvider { stage: Stage::Synthesis, .. })
    ));
    assert!(matches!(
        session.handle.push_frame(frame(SILENCE)),
        Err(EngineError::Closed)
    ));
}

#[tokio::test(start_paused = true)]
async fn generation_time_budget_is_enforced() {
    let rig = Rig::new(
        ScriptedRecognizer::new(&["hello"]),
        ScriptedGenerator::new(vec![Reply::Silent]),
        paced(1, 50),
    );
    let mut config = test_config();
    config.turn.max_generation_ms = 2_000;
    let mut session = rig.start(config);

    assert!(session.utterance(Duration::from_millis(200)).await);

    let timeouts = session.count(|e| {
        *e == EngineEvent::TimeoutExceeded {
            stage: Stage::Generation,
            kind: TimeoutKind::Generation,
        }
    });
    assert_eq!(timeouts, 1);
    assert!(session.has(|e| matches!(
        e,
        EngineEvent::TurnDiscarded { reason: DiscardReason::TimedOut, .. }
    )));
    assert_eq!(session.handle.stats().timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn stream_setup_timeout_abandons_the_turn() {
    let rig = Rig::new(
        ScriptedRecognizer::hanging(),
        ScriptedGenerator::new(vec![]),
        paced(1, 50),
    );
    let mut session = rig.start(test_config());

    assert!(session.utterance(Duration::from_millis(200)).await);

    assert!(session.has(|e| *e
        == EngineEvent::TimeoutExceeded {
            stage: Stage::Transcription,
            kind: TimeoutKind::StreamSetup,
        }));
    assert!(rig.sink.turns().is_empty());
    assert!(rig.generator.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn capture_overrun_drops_oldest_frames() {
    let rig = Rig::new(
        ScriptedRecognizer::new(&[]),
        ScriptedGenerator::new(vec![]),
        paced(1, 50),
    );
    let mut config = test_config();
    config.frame_queue_capacity = 4;
    let mut session = rig.start(config);

    // The coordinator cannot run until this task yields.
    for _ in 0..12 {
        session.handle.push_frame(frame(SILENCE)).unwrap();
    }
    sleep(Duration::from_millis(20)).await;
    session.collect();

    assert!(session.has(|e| *e == EngineEvent::InputOverrun { dropped: 8 }));
    assert_eq!(session.handle.stats().frames_dropped, 8);
}

#[tokio::test(start_paused = true)]
async fn quality_override_reconfigures_output_and_synthesis() {
    let rig = Rig::new(
        ScriptedRecognizer::new(&["hello"]),
        ScriptedGenerator::new(vec![Reply::Tokens(vec!["Hi there."])]),
        paced(1, 50),
    );
    let config = test_config();
    let low = directive_for(&config.quality, QualityTier::Low);
    let mut session = rig.start(config);

    session.handle.set_quality_directive(low);
    session.handle.set_quality_directive(low);
    assert!(session.utterance(Duration::from_millis(200)).await);

    assert_eq!(
        session.count(|e| matches!(e, EngineEvent::QualityChanged { .. })),
        1
    );
    assert!(rig.output.calls().contains(&OutputCall::Reconfigure(low)));
    assert_eq!(rig.synthesizer.requests()[0].sample_rate, low.sample_rate);
    assert!(!rig.generator.requests()[0].allow_local_inference);
}

struct Overheated;

#[async_trait]
impl CapabilitySignalProvider for Overheated {
    async fn sample(&self) -> Result<RuntimeSignals, ProviderError> {
        Ok(RuntimeSignals {
            thermal: ThermalLevel::Critical,
            ..RuntimeSignals::default()
        })
    }
}

#[tokio::test(start_paused = true)]
async fn critical_thermal_signal_drops_to_low_tier() {
    let rig = Rig::new(
        ScriptedRecognizer::new(&[]),
        ScriptedGenerator::new(vec![]),
        paced(1, 50),
    );
    let providers = rig.providers().with_signals(Arc::new(Overheated));
    let engine = ConversationEngine::new(test_config(), providers).unwrap();
    let mut session = Session::spawn(engine);

    assert!(
        session
            .feed_until(SILENCE, Duration::from_secs(1), |e| matches!(
                e,
                EngineEvent::QualityChanged { directive } if directive.tier == QualityTier::Low
            ))
            .await
    );
    assert_eq!(session.handle.quality_directive().tier, QualityTier::Low);
}

#[tokio::test(start_paused = true)]
async fn seeded_history_reaches_the_generator_and_is_compressed() {
    let rig = Rig::new(
        ScriptedRecognizer::new(&["what time is it"]),
        ScriptedGenerator::new(vec![Reply::Tokens(vec!["Noon."])]),
        paced(1, 50),
    );
    let mut config = test_config();
    config.context = ContextConfig {
        ceiling: 14,
        pinned_recent_turns: 2,
        chars_per_unit: 4,
        max_turns: None,
    };
    let oldest = Turn::from_text(Speaker::User, "twenty characters!!!");
    let seed = ContextSeed {
        system_context: Some("Be brief.".to_string()),
        history: vec![oldest.clone(), Turn::from_text(Speaker::System, "sure")],
    };
    let engine = ConversationEngine::new(config, rig.providers())
        .unwrap()
        .with_seed(seed);
    let mut session = Session::spawn(engine);

    assert!(session.utterance(Duration::from_millis(200)).await);

    // 3 (system) + 5 + 1 + 4 (new user turn) = 13 fits; the reply pushes it
    // over and evicts the oldest unpinned turn.
    let first = &rig.generator.requests()[0].messages;
    assert_eq!(first[0].role, MessageRole::System);
    assert_eq!(first[0].content, "Be brief.");
    assert_eq!(first.len(), 4);

    assert!(session.has(|e| matches!(
        e,
        EngineEvent::ContextEvicted { turn_ids, .. } if turn_ids == &vec![oldest.id()]
    )));
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_closes_the_handle() {
    let rig = Rig::new(
        ScriptedRecognizer::new(&[]),
        ScriptedGenerator::new(vec![]),
        paced(1, 50),
    );
    let session = rig.start(test_config());
    let handle = session.handle.clone();

    handle.stop();
    handle.stop();
    sleep(Duration::from_millis(20)).await;

    let (events, result) = session.finish().await;
    assert!(result.is_ok());
    assert_eq!(events.iter().filter(|e| **e == EngineEvent::Ended).count(), 1);
    assert!(matches!(handle.push_frame(frame(LOUD)), Err(EngineError::Closed)));
}
