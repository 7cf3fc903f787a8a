//! Core domain types and port definitions for the parley turn-taking engine.
//!
//! This crate is pure: it owns the data model (turns, audio frames, quality
//! directives), the capability ports the engine consumes (speech recognition,
//! text generation, speech synthesis, playback, persistence, runtime signals),
//! the canonical [`EngineEvent`] union, configuration types and the error
//! taxonomy. Runtime logic lives in `parley-engine`.

#![deny(unused_crate_dependencies)]

pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod ports;

// Re-export commonly used types for convenience
pub use config::{
    ConfigError, ContextConfig, EngineConfig, FlushPolicy, ModelTier, QualityConfig, TierProfile,
    TurnConfig, VadConfig, validate_config,
};
pub use domain::{
    AudioFormat, AudioFrame, ContextMessage, ContextSeed, LatencyKind, LatencyMeasurement,
    MessageRole, PlaybackChunk, PowerState, QualityDirective, QualityTier, RuntimeSignals,
    Speaker, Stage, SynthesizedAudio, ThermalLevel, TimeoutKind, Turn, TurnDraft, TurnId,
    TurnState,
};
pub use error::{EngineError, ProviderError};
pub use events::{DiscardReason, EngineEvent, SessionStats, SuppressReason};
pub use ports::{
    AudioOutput, CapabilitySignalProvider, EventStream, GenerationEvent, GenerationRequest,
    NoopAudioOutput, NoopTurnSink, RecognitionSession, SpeechRecognizer, SpeechSynthesizer,
    SynthesisEvent, SynthesisRequest, TextGenerator, TranscriptEvent, TurnSink,
};
