//! Host commands: pause, resume, stop.

use parley_core::{DiscardReason, EngineEvent, Speaker, TurnDraft, TurnState};
use tokio::time::Instant;
use tracing::{debug, info};

use super::{Control, Deadlines, TurnCoordinator, build_request};

impl TurnCoordinator {
    pub(super) fn on_control(&mut self, command: Control, now: Instant) {
        match command {
            Control::Pause => self.pause(),
            Control::Resume => self.resume(now),
            Control::Stop => self.stop(),
        }
    }

    /// Suspend all streams, keeping buffered audio and text. Idempotent.
    fn pause(&mut self) {
        if matches!(self.state, TurnState::Paused | TurnState::Ended) {
            debug!(state = ?self.state, "Pause ignored");
            return;
        }

        self.generation += 1;
        if let Some(user) = self.user.as_mut() {
            user.cancel_stream();
        }
        if let Some(system) = self.system.as_mut() {
            if let Some(mut handle) = system.generation.take() {
                handle.cancel();
            }
            // The chunk being spoken is replayed in full on resume.
            if let Some(mut active) = system.synthesis.take() {
                active.handle.cancel();
                system.pending.push_front(active.text);
            }
        }
        if self.state == TurnState::Speaking {
            self.flush_playback();
        }

        self.deadlines = Deadlines::default();
        self.vad.reset();
        self.soft_onset = false;
        self.preroll.clear();

        info!(from = ?self.state, generation = self.generation, "Conversation paused");
        self.paused_from = Some(self.state);
        self.set_state(TurnState::Paused);
    }

    /// Re-enter the state that was active at pause time. No-op unless paused.
    fn resume(&mut self, now: Instant) {
        if self.state != TurnState::Paused {
            debug!(state = ?self.state, "Resume ignored");
            return;
        }
        let previous = self.paused_from.take().unwrap_or(TurnState::Idle);
        info!(to = ?previous, generation = self.generation, "Conversation resumed");

        match previous {
            TurnState::UserSpeaking => self.resume_user(now),
            TurnState::Generating | TurnState::Speaking => self.resume_system(now),
            _ => self.set_state(TurnState::Idle),
        }
    }

    fn resume_user(&mut self, now: Instant) {
        let Some(user) = self.user.as_mut() else {
            self.set_state(TurnState::Idle);
            return;
        };

        let stream = self.transcription.start(user.format, self.generation);
        for frame in &user.frames {
            stream.feed(frame.clone());
        }
        if user.finalize_requested {
            stream.finalize();
            self.deadlines.finalize = Some(now + self.config.turn.finalize_timeout());
        } else {
            // The pause reset the detector mid-utterance.
            self.vad.resume_in_speech();
        }
        user.stream = Some(stream);

        // Paused time does not count against the utterance.
        self.deadlines.utterance = Some(now + self.config.turn.max_utterance());
        self.set_state(TurnState::UserSpeaking);
    }

    fn resume_system(&mut self, now: Instant) {
        let supports_resume = self.generator.supports_resume();
        let Some(system) = self.system.as_mut() else {
            self.set_state(TurnState::Idle);
            return;
        };

        let mut restarted = None;
        if !system.generation_done {
            let resume_from = if supports_resume && !system.draft.is_empty() {
                Some(system.draft.text().to_string())
            } else {
                None
            };

            if resume_from.is_none() && !system.draft.is_empty() {
                // Cannot continue mid-text: drop what was not spoken and
                // regenerate from the last committed turn.
                restarted = Some(system.draft.id());
                system.draft = TurnDraft::new(Speaker::System);
                system.pending.clear();
                system.tokens = 0;
                system.first_token_at = None;
                system.generation_output_seen = false;
                self.chunker.clear();
            }

            let request = build_request(
                system.messages.clone(),
                resume_from,
                &self.directive,
                &self.config.turn,
            );
            system.generation = Some(self.generator.start(request, self.generation));
            self.deadlines.generation = Some(now + self.config.turn.max_generation());
        }

        if let Some(turn_id) = restarted {
            self.discard_turn(turn_id, DiscardReason::ResumeRestart);
        }
        self.set_state(TurnState::Generating);
        self.pump_synthesis();
        self.maybe_finish_system_turn();
    }

    /// End the conversation. Idempotent.
    fn stop(&mut self) {
        if self.state == TurnState::Ended {
            return;
        }
        info!(state = ?self.state, "Stopping conversation");

        self.generation += 1;
        let commit_partial = self.config.turn.commit_partial_on_stop;

        if let Some(mut user) = self.user.take() {
            user.cancel_stream();
            if commit_partial && !user.draft.is_empty() {
                self.commit_turn(user.draft);
            } else {
                self.discard_turn(user.draft.id(), DiscardReason::Stopped);
            }
        }
        if let Some(mut system) = self.system.take() {
            system.cancel_streams();
            self.flush_playback();
            system.draft.mark_interrupted();
            if commit_partial && !system.draft.is_empty() {
                self.commit_turn(system.draft);
            } else {
                self.discard_turn(system.draft.id(), DiscardReason::Stopped);
            }
        }

        self.deadlines = Deadlines::default();
        self.paused_from = None;
        self.set_state(TurnState::Ended);
        self.emit(EngineEvent::Ended);
    }
}
