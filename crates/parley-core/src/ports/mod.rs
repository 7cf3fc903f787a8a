//! Port definitions (trait abstractions) for the engine's collaborators.
//!
//! Ports define the interfaces the engine expects from providers and from the
//! host. They contain no implementation details and use only domain types.
//!
//! # Design Rules
//!
//! - No provider wire types in any signature
//! - Streaming outputs are `futures` streams of `Result<_, ProviderError>`
//! - Host-facing sinks are fire-and-forget (`&self`, no `Result`)
//! - Every trait is object-safe and used as `Arc<dyn _>` by the engine

pub mod generation;
pub mod persistence;
pub mod playback;
pub mod signals;
pub mod speech;

use std::pin::Pin;

use futures_core::Stream;

use crate::error::ProviderError;

pub use generation::{GenerationEvent, GenerationRequest, TextGenerator};
pub use persistence::{NoopTurnSink, TurnSink};
pub use playback::{AudioOutput, NoopAudioOutput};
pub use signals::CapabilitySignalProvider;
pub use speech::{
    RecognitionSession, SpeechRecognizer, SpeechSynthesizer, SynthesisEvent, SynthesisRequest,
    TranscriptEvent,
};

/// A lazy, finite, ordered stream of provider events.
///
/// The stream ends after its terminal event or after yielding an error.
pub type EventStream<T> = Pin<Box<dyn Stream<Item = Result<T, ProviderError>> + Send>>;
