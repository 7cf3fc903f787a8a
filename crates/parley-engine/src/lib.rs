//! Runtime half of the parley turn-taking engine.
//!
//! The [`ConversationEngine`] owns one coordinator task per conversation.
//! That task is the only writer of conversation state: it pulls capture
//! frames from a bounded queue, runs voice activity detection, drives the
//! transcription, generation and synthesis streams, and arbitrates barge-in.
//! Everything else (provider I/O, quality monitoring) runs in spawned tasks
//! that talk to the coordinator through channels.
//!
//! ```text
//!   Capture → VAD → Transcription → Context → Generation → Synthesis → Playback
//!              │                                   ▲             ▲
//!              └────────── barge-in cancels ───────┴─────────────┘
//! ```

#![deny(unused_crate_dependencies)]

#[cfg(test)]
use async_trait as _;
#[cfg(test)]
use proptest as _;
#[cfg(test)]
use tokio_test as _;

pub mod chunker;
pub mod context;
mod coordinator;
pub mod engine;
pub mod frame_queue;
pub mod quality;
pub mod stream;
pub mod vad;

// Re-export key types for convenience
pub use chunker::SentenceChunker;
pub use context::ConversationContext;
pub use engine::{ConversationEngine, EngineHandle, EngineProviders};
pub use frame_queue::FrameQueue;
pub use quality::{AdaptiveQualityController, QualityMonitor};
pub use vad::{VadEvent, VoiceActivityDetector};
