//! The turn coordinator.
//!
//! [`TurnCoordinator`] is the single writer of conversation state. It runs as
//! one task and reacts to four inputs: capture frames, tagged stage messages
//! from the stream pumps, host control commands, and quality directives.
//! Every handler is synchronous and runs to completion, so two transitions
//! never interleave.
//!
//! Liveness: every stream is tagged with the generation counter it was
//! started under plus a per-stage sequence id. Interruptions, pauses, stops
//! and aborts bump the counter, which turns every in-flight message from the
//! abandoned streams into a no-op.

mod control;
mod stages;

use std::collections::VecDeque;
use std::sync::Arc;

use parley_core::{
    AudioFormat, AudioFrame, AudioOutput, ContextMessage, ContextSeed, DiscardReason,
    EngineConfig, EngineError, EngineEvent, GenerationRequest, QualityDirective, SessionStats,
    SpeechRecognizer, SpeechSynthesizer, SuppressReason, TextGenerator, TurnConfig, TurnDraft,
    TurnId, TurnSink, TurnState,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::chunker::SentenceChunker;
use crate::context::ConversationContext;
use crate::frame_queue::FrameQueue;
use crate::stream::{
    GenerationStream, StageMessage, StreamHandle, StreamTimeouts, SynthesisStream,
    TranscriptionHandle, TranscriptionStream,
};
use crate::vad::{VadEvent, VoiceActivityDetector};

/// Frames kept from before a speech start so the recognizer hears the onset.
const PREROLL_FRAMES: usize = 16;

/// Host commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Pause,
    Resume,
    Stop,
}

/// Everything a coordinator is built from.
pub struct CoordinatorParts {
    pub config: EngineConfig,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub generator: Arc<dyn TextGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub output: Arc<dyn AudioOutput>,
    pub turn_sink: Arc<dyn TurnSink>,
    pub seed: ContextSeed,
    pub events: broadcast::Sender<EngineEvent>,
    pub state: watch::Sender<TurnState>,
    pub stats: watch::Sender<SessionStats>,
    pub directive: QualityDirective,
}

/// The user turn being captured.
struct UserTurn {
    draft: TurnDraft,
    format: AudioFormat,
    /// Every frame sent to the recognizer, kept for retry and resume.
    frames: Vec<AudioFrame>,
    stream: Option<TranscriptionHandle>,
    finalize_requested: bool,
    retries: u32,
}

/// The system turn being generated and spoken.
struct SystemTurn {
    draft: TurnDraft,
    messages: Vec<ContextMessage>,
    transcript_at: Instant,
    first_token_at: Option<Instant>,
    generation: Option<StreamHandle>,
    generation_done: bool,
    generation_output_seen: bool,
    generation_retries: u32,
    tokens: usize,
    /// Flushed text waiting for synthesis, in order.
    pending: VecDeque<String>,
    synthesis: Option<ActiveSynthesis>,
}

struct ActiveSynthesis {
    handle: StreamHandle,
    text: String,
    audio_seen: bool,
    retries: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct Deadlines {
    utterance: Option<Instant>,
    finalize: Option<Instant>,
    generation: Option<Instant>,
}

impl Deadlines {
    fn next(&self) -> Option<Instant> {
        [self.utterance, self.finalize, self.generation]
            .into_iter()
            .flatten()
            .min()
    }
}

pub struct TurnCoordinator {
    config: EngineConfig,
    state: TurnState,
    generation: u64,

    vad: VoiceActivityDetector,
    context: ConversationContext,
    chunker: SentenceChunker,
    preroll: VecDeque<AudioFrame>,

    transcription: TranscriptionStream,
    generator: GenerationStream,
    synthesis: SynthesisStream,
    output: Arc<dyn AudioOutput>,
    turn_sink: Arc<dyn TurnSink>,

    events: broadcast::Sender<EngineEvent>,
    state_tx: watch::Sender<TurnState>,
    stats_tx: watch::Sender<SessionStats>,
    stats: SessionStats,
    directive: QualityDirective,

    user: Option<UserTurn>,
    system: Option<SystemTurn>,
    paused_from: Option<TurnState>,
    last_barge_in: Option<Instant>,
    /// Set while the current overlapping speech was refused for low confidence.
    soft_onset: bool,
    deadlines: Deadlines,
    playback_seq: u64,
    fatal: Option<EngineError>,
}

impl TurnCoordinator {
    /// Build a coordinator. Returns the receiving end of the stage inbox,
    /// which must be passed to [`TurnCoordinator::run`].
    pub fn new(parts: CoordinatorParts) -> (Self, mpsc::UnboundedReceiver<StageMessage>) {
        let CoordinatorParts {
            config,
            recognizer,
            generator,
            synthesizer,
            output,
            turn_sink,
            seed,
            events,
            state,
            stats,
            directive,
        } = parts;

        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let timeouts = StreamTimeouts {
            setup: config.turn.stream_setup_timeout(),
            cancel_ack: config.turn.cancel_ack_timeout(),
        };

        let coordinator = Self {
            state: TurnState::Idle,
            generation: 0,
            vad: VoiceActivityDetector::new(config.vad.clone()),
            context: ConversationContext::from_history(config.context.clone(), seed),
            chunker: SentenceChunker::new(config.turn.flush_policy, config.turn.flush_max_tokens),
            preroll: VecDeque::with_capacity(PREROLL_FRAMES),
            transcription: TranscriptionStream::new(recognizer, inbox.clone(), timeouts),
            generator: GenerationStream::new(generator, inbox.clone(), timeouts),
            synthesis: SynthesisStream::new(synthesizer, inbox, timeouts),
            output,
            turn_sink,
            events,
            state_tx: state,
            stats_tx: stats,
            stats: SessionStats::default(),
            directive,
            user: None,
            system: None,
            paused_from: None,
            last_barge_in: None,
            soft_onset: false,
            deadlines: Deadlines::default(),
            playback_seq: 0,
            fatal: None,
            config,
        };
        (coordinator, inbox_rx)
    }

    /// Drive the conversation until it ends.
    ///
    /// Returns `Err` only when a provider failed fatally.
    pub async fn run(
        mut self,
        frames: Arc<FrameQueue>,
        mut inbox: mpsc::UnboundedReceiver<StageMessage>,
        mut control: mpsc::UnboundedReceiver<Control>,
        mut directives: watch::Receiver<QualityDirective>,
    ) -> Result<(), EngineError> {
        info!(
            context_turns = self.context.len(),
            context_weight = self.context.total_weight(),
            "Conversation engine started"
        );

        loop {
            if let Some(error) = self.fatal.take() {
                return Err(error);
            }
            if self.state.is_terminal() {
                info!(stats = ?self.stats, "Conversation engine stopped");
                return Ok(());
            }

            let deadline = self.deadlines.next();

            tokio::select! {
                biased;

                command = control.recv() => {
                    // All handles dropped: nobody can steer the engine any more.
                    self.on_control(command.unwrap_or(Control::Stop), Instant::now());
                }

                Some(message) = inbox.recv() => {
                    self.on_stage_message(message, Instant::now());
                }

                Ok(()) = directives.changed() => {
                    let directive = *directives.borrow_and_update();
                    self.on_directive(directive);
                }

                () = sleep_until_deadline(deadline) => {
                    self.on_deadline(Instant::now());
                }

                frame = frames.pop() => {
                    let dropped = frames.take_dropped();
                    if dropped > 0 {
                        self.on_overrun(dropped);
                    }
                    match frame {
                        Some(frame) => self.on_frame(frame, Instant::now()),
                        None => self.on_control(Control::Stop, Instant::now()),
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    fn on_frame(&mut self, frame: AudioFrame, now: Instant) {
        if matches!(self.state, TurnState::Paused | TurnState::Ended) {
            return;
        }

        let event = self.vad.process_frame(&frame);

        match self.user.as_mut() {
            // Once finalize is requested the recognizer gets no more audio;
            // later frames only feed the pre-roll of the next utterance.
            Some(user) if !user.finalize_requested => {
                if let Some(stream) = &user.stream {
                    stream.feed(frame.clone());
                }
                user.frames.push(frame);
            }
            _ => {
                if self.preroll.len() == PREROLL_FRAMES {
                    self.preroll.pop_front();
                }
                self.preroll.push_back(frame);
            }
        }

        match event {
            Some(VadEvent::SpeechStart { confidence }) => self.on_speech_start(confidence, now),
            Some(VadEvent::SpeechEnd) => {
                self.soft_onset = false;
                self.on_speech_end(now);
            }
            None => self.recheck_soft_onset(now),
        }
    }

    /// A soft onset that was refused as a barge-in disarms the detector, so
    /// no further speech-start arrives while the user keeps talking. Keep
    /// checking the live confidence until it clears the barge-in threshold.
    fn recheck_soft_onset(&mut self, now: Instant) {
        if !self.soft_onset || !self.state.accepts_barge_in() || !self.vad.in_speech() {
            return;
        }
        let confidence = self.vad.last_confidence();
        if confidence >= self.config.turn.barge_in_threshold {
            self.soft_onset = false;
            self.try_barge_in(confidence, now);
        }
    }

    fn on_speech_start(&mut self, confidence: f32, now: Instant) {
        match self.state {
            TurnState::Idle => self.start_user_turn(now),
            state if state.accepts_barge_in() => self.try_barge_in(confidence, now),
            _ => debug!(state = ?self.state, "Speech start ignored"),
        }
    }

    fn on_speech_end(&mut self, now: Instant) {
        if self.state != TurnState::UserSpeaking {
            return;
        }
        let Some(user) = self.user.as_mut() else {
            return;
        };
        if user.finalize_requested {
            return;
        }
        user.finalize_requested = true;
        if let Some(stream) = &user.stream {
            stream.finalize();
        }
        self.deadlines.finalize = Some(now + self.config.turn.finalize_timeout());
        debug!(turn_id = %user.draft.id(), frames = user.frames.len(), "End of utterance");
    }

    fn on_directive(&mut self, directive: QualityDirective) {
        if directive == self.directive {
            return;
        }
        info!(
            tier = ?directive.tier,
            sample_rate = directive.sample_rate,
            buffer_size = directive.buffer_size,
            allow_local_inference = directive.allow_local_inference,
            "Applying quality directive"
        );
        self.directive = directive;
        self.output.reconfigure(&directive);
        self.emit(EngineEvent::QualityChanged { directive });
    }

    fn on_overrun(&mut self, dropped: u64) {
        warn!(error = %EngineError::InputOverrun { dropped }, "Capture queue overrun");
        self.bump(|stats| stats.frames_dropped += dropped);
        self.emit(EngineEvent::InputOverrun { dropped });
    }

    // ------------------------------------------------------------------
    // Barge-in
    // ------------------------------------------------------------------

    fn try_barge_in(&mut self, confidence: f32, now: Instant) {
        let turn = &self.config.turn;
        let reason = if confidence < turn.barge_in_threshold {
            Some(SuppressReason::LowConfidence)
        } else if self
            .last_barge_in
            .is_some_and(|last| now.saturating_duration_since(last) < turn.barge_in_cooldown())
        {
            Some(SuppressReason::Cooldown)
        } else {
            None
        };

        if let Some(reason) = reason {
            self.soft_onset = reason == SuppressReason::LowConfidence;
            debug!(confidence, ?reason, "Barge-in suppressed");
            self.bump(|stats| stats.barge_ins_suppressed += 1);
            self.emit(EngineEvent::BargeInSuppressed { confidence, reason });
            return;
        }

        self.soft_onset = false;
        self.generation += 1;
        self.last_barge_in = Some(now);
        info!(generation = self.generation, confidence, state = ?self.state, "Barge-in");
        self.bump(|stats| stats.barge_ins += 1);
        self.emit(EngineEvent::BargeIn {
            generation: self.generation,
            confidence,
        });

        self.end_system_turn(TurnState::Interrupted, DiscardReason::NoOutput);
        self.start_user_turn(now);
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    fn set_state(&mut self, to: TurnState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!(?from, ?to, generation = self.generation, "Turn state transition");
        self.state = to;
        self.state_tx.send_replace(to);
        self.emit(EngineEvent::StateChanged { from, to });
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn bump(&mut self, update: impl FnOnce(&mut SessionStats)) {
        update(&mut self.stats);
        self.stats_tx.send_replace(self.stats);
    }

    fn commit_turn(&mut self, draft: TurnDraft) {
        let turn = draft.commit();
        info!(
            turn_id = %turn.id(),
            speaker = ?turn.speaker(),
            chars = turn.text().len(),
            interrupted = turn.is_interrupted(),
            "Turn committed"
        );
        self.turn_sink.turn_committed(&turn);
        self.emit(EngineEvent::TurnCommitted { turn: turn.clone() });
        self.bump(|stats| stats.committed_turns += 1);

        let evicted = self.context.commit(turn);
        if !evicted.is_empty() {
            let count = evicted.len() as u64;
            let turn_ids: Vec<TurnId> = evicted.iter().map(|t| t.id()).collect();
            debug!(
                evicted = turn_ids.len(),
                remaining_weight = self.context.total_weight(),
                "Context compressed"
            );
            self.bump(|stats| stats.evicted_turns += count);
            self.emit(EngineEvent::ContextEvicted {
                turn_ids,
                remaining_weight: self.context.total_weight(),
            });
        }
    }

    fn discard_turn(&self, turn_id: TurnId, reason: DiscardReason) {
        debug!(%turn_id, ?reason, "Turn discarded");
        self.emit(EngineEvent::TurnDiscarded { turn_id, reason });
    }

    fn flush_playback(&self) {
        self.output.flush();
        self.emit(EngineEvent::PlaybackFlushed {
            generation: self.generation,
        });
    }

    /// Cancel the system turn's streams, flush playback and close the turn:
    /// text already generated is committed as interrupted, an empty draft is
    /// discarded with `empty_reason`. Passes through `via` on the way.
    fn end_system_turn(&mut self, via: TurnState, empty_reason: DiscardReason) {
        self.deadlines.generation = None;
        self.chunker.clear();
        let Some(mut system) = self.system.take() else {
            return;
        };
        system.cancel_streams();
        self.flush_playback();
        self.set_state(via);

        system.draft.mark_interrupted();
        if system.draft.is_empty() {
            self.discard_turn(system.draft.id(), empty_reason);
        } else {
            self.commit_turn(system.draft);
        }
    }

    fn generation_request(&self, messages: Vec<ContextMessage>, resume_from: Option<String>) -> GenerationRequest {
        build_request(messages, resume_from, &self.directive, &self.config.turn)
    }
}

impl UserTurn {
    fn cancel_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.cancel();
        }
    }
}

impl SystemTurn {
    fn cancel_streams(&mut self) {
        if let Some(mut handle) = self.generation.take() {
            handle.cancel();
        }
        if let Some(mut active) = self.synthesis.take() {
            active.handle.cancel();
        }
    }

    fn is_finished(&self) -> bool {
        self.generation_done && self.synthesis.is_none() && self.pending.is_empty()
    }
}

fn build_request(
    messages: Vec<ContextMessage>,
    resume_from: Option<String>,
    directive: &QualityDirective,
    turn: &TurnConfig,
) -> GenerationRequest {
    GenerationRequest {
        messages,
        resume_from,
        allow_local_inference: directive.allow_local_inference,
        max_tokens: turn.max_generation_tokens,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
