//! Turn-taking states and pipeline stages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of the turn-taking state machine.
///
/// ```text
///   Idle → UserSpeaking → ProcessingUtterance → Generating → Speaking → Idle
///                ▲                                  │            │
///                └─────────── Interrupted ◄─────────┴────────────┘
/// ```
///
/// `Paused` can be entered from any non-terminal state; `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Waiting for the user to start speaking.
    #[default]
    Idle,

    /// User speech is being captured and transcribed.
    UserSpeaking,

    /// The utterance is final; context is being assembled.
    ProcessingUtterance,

    /// The language model is producing text; nothing audible yet.
    Generating,

    /// Synthesized speech is being played back.
    Speaking,

    /// A barge-in cancelled the system response.
    Interrupted,

    /// Streams are suspended by an external pause command.
    Paused,

    /// The conversation is over.
    Ended,
}

impl TurnState {
    /// States in which a barge-in may interrupt the system.
    pub const fn accepts_barge_in(self) -> bool {
        matches!(self, Self::Generating | Self::Speaking)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ended)
    }
}

/// One of the three streaming stages the coordinator arbitrates between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transcription,
    Generation,
    Synthesis,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transcription => f.write_str("transcription"),
            Self::Generation => f.write_str("generation"),
            Self::Synthesis => f.write_str("synthesis"),
        }
    }
}

/// Which bound expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    /// A stream did not finish setup in time.
    StreamSetup,
    /// The utterance hit its maximum duration.
    Utterance,
    /// The recognizer did not deliver a final transcript after finalize.
    Finalize,
    /// Generation exceeded its time budget.
    Generation,
    /// Generation exceeded its token budget.
    TokenBudget,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamSetup => f.write_str("stream setup"),
            Self::Utterance => f.write_str("utterance duration"),
            Self::Finalize => f.write_str("finalize"),
            Self::Generation => f.write_str("generation time"),
            Self::TokenBudget => f.write_str("token"),
        }
    }
}
