//! Stream wrappers around the recognition, generation and synthesis ports.
//!
//! Each wrapper starts a provider stream inside a spawned pump task and
//! returns a [`StreamHandle`] right away. The pump forwards provider events,
//! in order, into the coordinator inbox as [`StageMessage`]s tagged with the
//! stage, the stream's sequence id and the generation counter it was started
//! under. The coordinator drops any message whose tags no longer match, so a
//! cancelled stream can keep producing for a while without harm.
//!
//! Cancellation is cooperative: [`StreamHandle::cancel`] flips the handle's
//! token synchronously and the pump stops at its next await point.

mod generation;
mod synthesis;
mod transcription;

use std::future::Future;
use std::time::Duration;

use parley_core::{ProviderError, Stage, SynthesizedAudio, TranscriptEvent};
use tokio_util::sync::CancellationToken;

pub use generation::GenerationStream;
pub use synthesis::SynthesisStream;
pub use transcription::{TranscriptionHandle, TranscriptionStream};

/// Completion state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Opaque, cancellable handle to a running provider stream.
#[derive(Debug)]
pub struct StreamHandle {
    stage: Stage,
    seq: u64,
    generation: u64,
    cancel: CancellationToken,
    state: StreamState,
}

impl StreamHandle {
    fn new(stage: Stage, seq: u64, generation: u64) -> Self {
        Self {
            stage,
            seq,
            generation,
            cancel: CancellationToken::new(),
            state: StreamState::Running,
        }
    }

    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Sequence id, monotonic per stage.
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Generation counter the stream was started under.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub const fn state(&self) -> StreamState {
        self.state
    }

    pub const fn is_running(&self) -> bool {
        matches!(self.state, StreamState::Running)
    }

    /// Whether a message carries this handle's tags.
    pub fn matches(&self, message: &StageMessage) -> bool {
        self.stage == message.stage
            && self.seq == message.seq
            && self.generation == message.generation
    }

    /// Invalidate the handle and ask the pump to stop. Never blocks.
    pub fn cancel(&mut self) {
        if self.is_running() {
            self.state = StreamState::Cancelled;
        }
        self.cancel.cancel();
    }

    pub fn mark_completed(&mut self) {
        if self.is_running() {
            self.state = StreamState::Completed;
        }
    }

    pub fn mark_failed(&mut self) {
        if self.is_running() {
            self.state = StreamState::Failed;
        }
    }

    fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn tagger(&self) -> Tagger {
        Tagger {
            stage: self.stage,
            seq: self.seq,
            generation: self.generation,
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// An event from a stage task, tagged for liveness checks.
#[derive(Debug, Clone)]
pub struct StageMessage {
    pub stage: Stage,
    pub seq: u64,
    pub generation: u64,
    pub payload: StagePayload,
}

/// What a stage task reports.
#[derive(Debug, Clone)]
pub enum StagePayload {
    Transcript(TranscriptEvent),
    Token(String),
    Audio(SynthesizedAudio),
    /// The provider stream ended normally.
    Completed,
    /// The provider failed; no more messages follow.
    Failed(ProviderError),
    /// Stream setup did not finish within the setup timeout.
    SetupTimedOut,
}

/// Stamps payloads with a handle's tags inside the pump task.
#[derive(Debug, Clone, Copy)]
struct Tagger {
    stage: Stage,
    seq: u64,
    generation: u64,
}

impl Tagger {
    const fn message(self, payload: StagePayload) -> StageMessage {
        StageMessage {
            stage: self.stage,
            seq: self.seq,
            generation: self.generation,
            payload,
        }
    }
}

/// Bounds applied by every pump.
#[derive(Debug, Clone, Copy)]
pub struct StreamTimeouts {
    pub setup: Duration,
    pub cancel_ack: Duration,
}

/// Run `fut` unless the token fires first.
async fn until_cancelled<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = token.cancelled() => None,
        output = fut => Some(output),
    }
}
