//! Error taxonomy for providers and the engine.

use crate::config::ConfigError;
use crate::domain::{Stage, TimeoutKind};

/// Errors reported by a capability provider (recognizer, generator,
/// synthesizer).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Network blip, timeout, disconnect. Worth one retry.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Authentication, configuration or malformed input. Never retried.
    #[error("fatal provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// The provider's message without the classification prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Fatal(m) => m,
        }
    }

    /// Attribute this error to a pipeline stage.
    #[must_use]
    pub fn at_stage(self, stage: Stage) -> EngineError {
        match self {
            Self::Transient(message) => EngineError::TransientProvider { stage, message },
            Self::Fatal(message) => EngineError::FatalProvider { stage, message },
        }
    }
}

/// Errors of the conversation engine.
///
/// Only [`EngineError::FatalProvider`] and [`EngineError::Closed`] ever
/// propagate out of the engine; the other variants are converted into state
/// transitions and reported through the event channel.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// A provider failed transiently (already retried once).
    #[error("{stage} provider failed transiently: {message}")]
    TransientProvider { stage: Stage, message: String },

    /// A provider failed in a way that ends the conversation.
    #[error("{stage} provider failed: {message}")]
    FatalProvider { stage: Stage, message: String },

    /// A designed bound expired; handled as a normal transition.
    #[error("{stage} exceeded its {kind} budget")]
    TimeoutExceeded { stage: Stage, kind: TimeoutKind },

    /// Capture frames were dropped because the coordinator fell behind.
    #[error("audio input overrun: {dropped} frames dropped")]
    InputOverrun { dropped: u64 },

    /// Context weight above ceiling. Handled by compression, never surfaced.
    #[error("context weight {weight} exceeds ceiling {ceiling}")]
    ContextOverflow { weight: usize, ceiling: usize },

    /// The engine task has finished.
    #[error("conversation engine is no longer running")]
    Closed,

    /// The supplied configuration was rejected.
    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Whether the conversation can continue after this error.
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::FatalProvider { .. } | Self::Closed | Self::Config(_))
    }
}
