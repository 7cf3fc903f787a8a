//! Canonical event union emitted by the conversation engine.
//!
//! Every state transition, commit, barge-in and error is observable through
//! [`EngineEvent`]. Hosts subscribe to the engine's broadcast channel and
//! forward these to a UI, a log or a test harness.
//!
//! # Wire Format
//!
//! Events are serialized with a `type` tag:
//!
//! ```json
//! { "type": "state_changed", "from": "speaking", "to": "interrupted" }
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::{QualityDirective, Stage, TimeoutKind, Turn, TurnId, TurnState};

/// Why an in-progress turn was thrown away instead of committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// The recognizer returned a blank final transcript.
    EmptyTranscript,
    /// A system turn was cancelled before producing any text.
    NoOutput,
    /// The stage failed after its retry, or failed fatally.
    Failed,
    /// A stage budget expired before anything usable was produced.
    TimedOut,
    /// The conversation was stopped.
    Stopped,
    /// Resume could not continue the previous text, so the unspoken remainder
    /// was dropped and generation restarted.
    ResumeRestart,
}

/// Why a speech-start during system output did not interrupt it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    /// Confidence was below the barge-in threshold.
    LowConfidence,
    /// The previous barge-in was too recent.
    Cooldown,
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The turn-taking state machine moved.
    StateChanged { from: TurnState, to: TurnState },

    /// A partial (non-final) transcript for the open user turn.
    TranscriptPartial {
        #[serde(rename = "turnId")]
        turn_id: TurnId,
        text: String,
    },

    /// A turn was committed to the conversation context.
    TurnCommitted { turn: Turn },

    /// An in-progress turn was dropped.
    TurnDiscarded {
        #[serde(rename = "turnId")]
        turn_id: TurnId,
        reason: DiscardReason,
    },

    /// The user interrupted the system. `generation` is the new counter value.
    BargeIn { generation: u64, confidence: f32 },

    /// A speech-start during system output was not honoured as a barge-in.
    BargeInSuppressed {
        confidence: f32,
        reason: SuppressReason,
    },

    /// Playback was told to drop queued audio.
    PlaybackFlushed { generation: u64 },

    /// A stage budget expired and the stage was cancelled.
    TimeoutExceeded { stage: Stage, kind: TimeoutKind },

    /// A stage failed transiently and is being retried.
    Retrying { stage: Stage, attempt: u32 },

    /// A stage failed after its retry; the engine went back to idle.
    RecoverableError { stage: Stage, message: String },

    /// Capture frames were dropped because the engine fell behind.
    InputOverrun { dropped: u64 },

    /// The quality tier changed.
    QualityChanged { directive: QualityDirective },

    /// Old turns were evicted from the generation context.
    ContextEvicted {
        #[serde(rename = "turnIds")]
        turn_ids: Vec<TurnId>,
        #[serde(rename = "remainingWeight")]
        remaining_weight: usize,
    },

    /// A provider failed fatally; the conversation is over.
    Fatal { stage: Stage, message: String },

    /// The engine reached its terminal state.
    Ended,
}

impl EngineEvent {
    /// Get the event name for logging and transport routing.
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::TranscriptPartial { .. } => "transcript_partial",
            Self::TurnCommitted { .. } => "turn_committed",
            Self::TurnDiscarded { .. } => "turn_discarded",
            Self::BargeIn { .. } => "barge_in",
            Self::BargeInSuppressed { .. } => "barge_in_suppressed",
            Self::PlaybackFlushed { .. } => "playback_flushed",
            Self::TimeoutExceeded { .. } => "timeout_exceeded",
            Self::Retrying { .. } => "retrying",
            Self::RecoverableError { .. } => "recoverable_error",
            Self::InputOverrun { .. } => "input_overrun",
            Self::QualityChanged { .. } => "quality_changed",
            Self::ContextEvicted { .. } => "context_evicted",
            Self::Fatal { .. } => "fatal",
            Self::Ended => "ended",
        }
    }
}

/// Running counters for one conversation, published on every change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Turns committed (user and system).
    pub committed_turns: u64,
    /// Barge-ins that interrupted the system.
    pub barge_ins: u64,
    /// Speech-starts during output that were not honoured.
    pub barge_ins_suppressed: u64,
    /// Stage messages ignored because their generation or sequence was stale.
    pub stale_events: u64,
    /// Stage budgets that expired.
    pub timeouts: u64,
    /// Stage failures that returned the engine to idle.
    pub recoverable_errors: u64,
    /// Capture frames dropped by the input queue.
    pub frames_dropped: u64,
    /// Turns evicted from the generation context.
    pub evicted_turns: u64,
}
