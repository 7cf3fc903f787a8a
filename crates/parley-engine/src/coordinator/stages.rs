//! Stage message handling: transcripts in, tokens through, audio out.

use std::collections::VecDeque;

use parley_core::{
    AudioFormat, DiscardReason, EngineEvent, LatencyKind, PlaybackChunk, ProviderError, Speaker,
    Stage, SynthesisRequest, TimeoutKind, TranscriptEvent, TurnDraft, TurnState,
};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::{ActiveSynthesis, Deadlines, SystemTurn, TurnCoordinator, UserTurn, build_request};
use crate::stream::{StageMessage, StagePayload};

/// Transient failures are retried this many times per stream.
const MAX_RETRIES: u32 = 1;

impl TurnCoordinator {
    pub(super) fn on_stage_message(&mut self, message: StageMessage, now: Instant) {
        if !self.is_live(&message) {
            trace!(
                stage = %message.stage,
                seq = message.seq,
                generation = message.generation,
                current = self.generation,
                "Discarding stale stage message"
            );
            self.bump(|stats| stats.stale_events += 1);
            return;
        }

        match message.stage {
            Stage::Transcription => self.on_transcription(message.payload, now),
            Stage::Generation => self.on_generation(message.payload, now),
            Stage::Synthesis => self.on_synthesis(message.payload, now),
        }
    }

    /// A message is live only if it carries the current generation and the
    /// tags of the running stream for its stage.
    fn is_live(&self, message: &StageMessage) -> bool {
        if message.generation != self.generation {
            return false;
        }
        let handle = match message.stage {
            Stage::Transcription => self
                .user
                .as_ref()
                .and_then(|u| u.stream.as_ref())
                .map(|s| s.handle()),
            Stage::Generation => self.system.as_ref().and_then(|s| s.generation.as_ref()),
            Stage::Synthesis => self
                .system
                .as_ref()
                .and_then(|s| s.synthesis.as_ref())
                .map(|a| &a.handle),
        };
        handle.is_some_and(|h| h.is_running() && h.matches(message))
    }

    // ------------------------------------------------------------------
    // User turn
    // ------------------------------------------------------------------

    pub(super) fn start_user_turn(&mut self, now: Instant) {
        let frames: Vec<_> = self.preroll.drain(..).collect();
        let format = frames
            .last()
            .map_or_else(AudioFormat::default, |frame| frame.format);

        let stream = self.transcription.start(format, self.generation);
        for frame in &frames {
            stream.feed(frame.clone());
        }

        let draft = TurnDraft::new(Speaker::User);
        debug!(turn_id = %draft.id(), preroll = frames.len(), "User turn started");

        self.user = Some(UserTurn {
            draft,
            format,
            frames,
            stream: Some(stream),
            finalize_requested: false,
            retries: 0,
        });
        self.deadlines.utterance = Some(now + self.config.turn.max_utterance());
        self.deadlines.finalize = None;
        self.set_state(TurnState::UserSpeaking);
    }

    fn on_transcription(&mut self, payload: StagePayload, now: Instant) {
        match payload {
            StagePayload::Transcript(TranscriptEvent::Partial(text)) => {
                let Some(user) = self.user.as_mut() else {
                    return;
                };
                user.draft.set_text(text.clone());
                let turn_id = user.draft.id();
                self.emit(EngineEvent::TranscriptPartial { turn_id, text });
            }
            StagePayload::Transcript(TranscriptEvent::Final(text)) => {
                self.finish_utterance(Some(text), now);
            }
            // Ended without a final: the latest partial stands in.
            StagePayload::Completed => self.finish_utterance(None, now),
            StagePayload::Failed(e) => self.on_stage_failure(Stage::Transcription, e),
            StagePayload::SetupTimedOut => self.on_setup_timeout(Stage::Transcription),
            StagePayload::Token(_) | StagePayload::Audio(_) => {
                warn!("Unexpected payload on transcription stream");
            }
        }
    }

    /// Close the user turn. `final_text` overrides the latest partial.
    pub(super) fn finish_utterance(&mut self, final_text: Option<String>, now: Instant) {
        let Some(mut user) = self.user.take() else {
            return;
        };
        if let Some(mut stream) = user.stream.take() {
            stream.handle_mut().mark_completed();
            // Dropping a handle that already saw its final is harmless; one
            // cut short by a timeout gets its session cancelled.
            stream.cancel();
        }
        self.deadlines.utterance = None;
        self.deadlines.finalize = None;

        if let Some(text) = final_text {
            user.draft.set_text(text);
        }
        if user.draft.is_empty() {
            self.discard_turn(user.draft.id(), DiscardReason::EmptyTranscript);
            self.set_state(TurnState::Idle);
            return;
        }

        if let Some(last) = user.frames.last() {
            user.draft.record_latency(
                LatencyKind::CaptureToTranscript,
                now.saturating_duration_since(last.captured_at),
            );
        }

        self.set_state(TurnState::ProcessingUtterance);
        self.commit_turn(user.draft);
        self.begin_generation(now);
    }

    // ------------------------------------------------------------------
    // System turn
    // ------------------------------------------------------------------

    fn begin_generation(&mut self, now: Instant) {
        let messages = self.context.messages();
        let request = self.generation_request(messages.clone(), None);
        let handle = self.generator.start(request, self.generation);
        let draft = TurnDraft::new(Speaker::System);
        debug!(turn_id = %draft.id(), context_messages = messages.len(), "System turn started");

        self.chunker.clear();
        self.system = Some(SystemTurn {
            draft,
            messages,
            transcript_at: now,
            first_token_at: None,
            generation: Some(handle),
            generation_done: false,
            generation_output_seen: false,
            generation_retries: 0,
            tokens: 0,
            pending: VecDeque::new(),
            synthesis: None,
        });
        self.deadlines.generation = Some(now + self.config.turn.max_generation());
        self.set_state(TurnState::Generating);
    }

    fn on_generation(&mut self, payload: StagePayload, now: Instant) {
        match payload {
            StagePayload::Token(text) => self.on_token(&text, now),
            StagePayload::Completed => self.complete_generation(),
            StagePayload::Failed(e) => self.on_stage_failure(Stage::Generation, e),
            StagePayload::SetupTimedOut => self.on_setup_timeout(Stage::Generation),
            StagePayload::Transcript(_) | StagePayload::Audio(_) => {
                warn!("Unexpected payload on generation stream");
            }
        }
    }

    fn on_token(&mut self, text: &str, now: Instant) {
        let Some(system) = self.system.as_mut() else {
            return;
        };
        if system.first_token_at.is_none() {
            system.first_token_at = Some(now);
            system.draft.record_latency(
                LatencyKind::TranscriptToFirstToken,
                now.saturating_duration_since(system.transcript_at),
            );
        }
        system.generation_output_seen = true;
        system.tokens += 1;
        system.draft.push_text(text);
        system.pending.extend(self.chunker.push(text));

        let over_budget = system.tokens >= self.config.turn.max_generation_tokens;
        if over_budget {
            if let Some(mut handle) = system.generation.take() {
                handle.cancel();
            }
            warn!(tokens = system.tokens, "Generation token budget reached");
            self.bump(|stats| stats.timeouts += 1);
            self.emit(EngineEvent::TimeoutExceeded {
                stage: Stage::Generation,
                kind: TimeoutKind::TokenBudget,
            });
            self.complete_generation();
        } else {
            self.pump_synthesis();
        }
    }

    fn complete_generation(&mut self) {
        let Some(system) = self.system.as_mut() else {
            return;
        };
        if let Some(mut handle) = system.generation.take() {
            handle.mark_completed();
        }
        system.generation_done = true;
        system.pending.extend(self.chunker.finish());
        self.deadlines.generation = None;
        debug!(tokens = system.tokens, "Generation completed");

        self.pump_synthesis();
        self.maybe_finish_system_turn();
    }

    /// Start synthesis of the next pending chunk if none is running.
    pub(super) fn pump_synthesis(&mut self) {
        let Some(system) = self.system.as_mut() else {
            return;
        };
        if system.synthesis.is_some() {
            return;
        }
        let Some(text) = system.pending.pop_front() else {
            return;
        };

        let request = SynthesisRequest {
            text: text.clone(),
            sample_rate: self.directive.sample_rate,
        };
        let handle = self.synthesis.start(request, self.generation);
        system.synthesis = Some(ActiveSynthesis {
            handle,
            text,
            audio_seen: false,
            retries: 0,
        });

        if self.state == TurnState::Generating {
            self.set_state(TurnState::Speaking);
        }
    }

    fn on_synthesis(&mut self, payload: StagePayload, now: Instant) {
        match payload {
            StagePayload::Audio(audio) => {
                let Some(system) = self.system.as_mut() else {
                    return;
                };
                if let Some(first_token_at) = system.first_token_at {
                    system.draft.record_latency(
                        LatencyKind::FirstTokenToFirstAudio,
                        now.saturating_duration_since(first_token_at),
                    );
                }
                if let Some(active) = system.synthesis.as_mut() {
                    active.audio_seen = true;
                }
                self.playback_seq += 1;
                self.output.play(PlaybackChunk {
                    sequence: self.playback_seq,
                    turn_id: system.draft.id(),
                    samples: audio.samples,
                    sample_rate: audio.sample_rate,
                });
            }
            StagePayload::Completed => {
                if let Some(mut active) = self.system.as_mut().and_then(|s| s.synthesis.take()) {
                    active.handle.mark_completed();
                }
                self.pump_synthesis();
                self.maybe_finish_system_turn();
            }
            StagePayload::Failed(e) => self.on_stage_failure(Stage::Synthesis, e),
            StagePayload::SetupTimedOut => self.on_setup_timeout(Stage::Synthesis),
            StagePayload::Transcript(_) | StagePayload::Token(_) => {
                warn!("Unexpected payload on synthesis stream");
            }
        }
    }

    /// Commit the system turn once generation is done and all of its text
    /// has been spoken.
    pub(super) fn maybe_finish_system_turn(&mut self) {
        if !self.system.as_ref().is_some_and(SystemTurn::is_finished) {
            return;
        }
        let Some(system) = self.system.take() else {
            return;
        };
        if system.draft.is_empty() {
            self.discard_turn(system.draft.id(), DiscardReason::NoOutput);
        } else {
            self.commit_turn(system.draft);
        }
        self.set_state(TurnState::Idle);
    }

    // ------------------------------------------------------------------
    // Failures and timeouts
    // ------------------------------------------------------------------

    fn on_stage_failure(&mut self, stage: Stage, failure: ProviderError) {
        if !failure.is_transient() {
            self.fail_fatal(stage, failure);
            return;
        }

        let retried = match stage {
            Stage::Transcription => self.retry_transcription(),
            Stage::Generation => self.retry_generation(),
            Stage::Synthesis => self.retry_synthesis(),
        };
        if retried {
            warn!(%stage, error = %failure, "Transient provider failure, retrying");
            self.emit(EngineEvent::Retrying { stage, attempt: 1 });
            return;
        }

        warn!(%stage, error = %failure, "Provider failure, abandoning turn");
        self.bump(|stats| stats.recoverable_errors += 1);
        self.emit(EngineEvent::RecoverableError {
            stage,
            message: failure.message().to_string(),
        });
        self.abandon_turn(DiscardReason::Failed);
    }

    /// Recognition can always be replayed from the buffered frames.
    fn retry_transcription(&mut self) -> bool {
        let Some(user) = self.user.as_mut() else {
            return false;
        };
        if user.retries >= MAX_RETRIES {
            return false;
        }
        user.retries += 1;
        if let Some(mut old) = user.stream.take() {
            old.handle_mut().mark_failed();
        }

        let stream = self.transcription.start(user.format, self.generation);
        for frame in &user.frames {
            stream.feed(frame.clone());
        }
        if user.finalize_requested {
            stream.finalize();
        }
        user.stream = Some(stream);
        true
    }

    /// Generation is retried only if none of its tokens were consumed.
    fn retry_generation(&mut self) -> bool {
        let Some(system) = self.system.as_mut() else {
            return false;
        };
        if system.generation_retries >= MAX_RETRIES || system.generation_output_seen {
            return false;
        }
        system.generation_retries += 1;
        if let Some(mut old) = system.generation.take() {
            old.mark_failed();
        }

        let request = build_request(
            system.messages.clone(),
            None,
            &self.directive,
            &self.config.turn,
        );
        system.generation = Some(self.generator.start(request, self.generation));
        true
    }

    /// Synthesis is retried only if the chunk produced no audio yet.
    fn retry_synthesis(&mut self) -> bool {
        let Some(active) = self.system.as_mut().and_then(|s| s.synthesis.as_mut()) else {
            return false;
        };
        if active.retries >= MAX_RETRIES || active.audio_seen {
            return false;
        }
        active.retries += 1;
        active.handle.mark_failed();

        let request = SynthesisRequest {
            text: active.text.clone(),
            sample_rate: self.directive.sample_rate,
        };
        active.handle = self.synthesis.start(request, self.generation);
        true
    }

    fn on_setup_timeout(&mut self, stage: Stage) {
        warn!(%stage, "Stream setup timed out");
        self.bump(|stats| stats.timeouts += 1);
        self.emit(EngineEvent::TimeoutExceeded {
            stage,
            kind: TimeoutKind::StreamSetup,
        });
        self.abandon_turn(DiscardReason::TimedOut);
    }

    /// Give up on the turn in flight, discarding it, and return to idle.
    fn abandon_turn(&mut self, reason: DiscardReason) {
        self.generation += 1;
        if let Some(mut user) = self.user.take() {
            user.cancel_stream();
            self.discard_turn(user.draft.id(), reason);
        }
        if let Some(mut system) = self.system.take() {
            system.cancel_streams();
            self.flush_playback();
            self.discard_turn(system.draft.id(), reason);
        }
        self.chunker.clear();
        self.deadlines = Deadlines::default();
        self.set_state(TurnState::Idle);
    }

    fn fail_fatal(&mut self, stage: Stage, failure: ProviderError) {
        error!(%stage, error = %failure, "Fatal provider failure");
        self.generation += 1;
        if let Some(mut user) = self.user.take() {
            user.cancel_stream();
            self.discard_turn(user.draft.id(), DiscardReason::Failed);
        }
        if let Some(mut system) = self.system.take() {
            system.cancel_streams();
            self.flush_playback();
            self.discard_turn(system.draft.id(), DiscardReason::Failed);
        }
        self.deadlines = Deadlines::default();

        self.emit(EngineEvent::Fatal {
            stage,
            message: failure.message().to_string(),
        });
        self.set_state(TurnState::Ended);
        self.emit(EngineEvent::Ended);
        self.fatal = Some(failure.at_stage(stage));
    }

    pub(super) fn on_deadline(&mut self, now: Instant) {
        let deadlines = self.deadlines;

        if deadlines.utterance.is_some_and(|at| now >= at) {
            self.deadlines.utterance = None;
            self.on_utterance_timeout(TimeoutKind::Utterance, now);
        } else if deadlines.finalize.is_some_and(|at| now >= at) {
            self.deadlines.finalize = None;
            self.on_utterance_timeout(TimeoutKind::Finalize, now);
        }

        if deadlines.generation.is_some_and(|at| now >= at) {
            self.deadlines.generation = None;
            info!(
                max_ms = self.config.turn.max_generation_ms,
                "Generation time budget exhausted"
            );
            self.bump(|stats| stats.timeouts += 1);
            self.emit(EngineEvent::TimeoutExceeded {
                stage: Stage::Generation,
                kind: TimeoutKind::Generation,
            });
            self.generation += 1;
            self.end_system_turn(TurnState::Idle, DiscardReason::TimedOut);
        }
    }

    /// The user turn ran out of time: cut recognition and proceed with the
    /// latest partial transcript.
    fn on_utterance_timeout(&mut self, kind: TimeoutKind, now: Instant) {
        if self.user.is_none() {
            return;
        }
        info!(%kind, "Utterance cut short");
        self.bump(|stats| stats.timeouts += 1);
        self.emit(EngineEvent::TimeoutExceeded {
            stage: Stage::Transcription,
            kind,
        });
        self.finish_utterance(None, now);
    }
}
