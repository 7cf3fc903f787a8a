//! Domain types for the conversation engine.
//!
//! These are plain data types with no runtime behaviour beyond small,
//! pure helpers. They are shared by the engine, the ports and the CLI.

mod audio;
mod context;
mod quality;
mod state;
mod turn;

pub use audio::{AudioFormat, AudioFrame, PlaybackChunk, SynthesizedAudio};
pub use context::{ContextMessage, ContextSeed, MessageRole};
pub use quality::{PowerState, QualityDirective, QualityTier, RuntimeSignals, ThermalLevel};
pub use state::{Stage, TimeoutKind, TurnState};
pub use turn::{LatencyKind, LatencyMeasurement, Speaker, Turn, TurnDraft, TurnId};
