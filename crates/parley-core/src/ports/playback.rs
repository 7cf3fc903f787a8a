//! Audio playback port.

use crate::domain::{PlaybackChunk, QualityDirective};

/// Abstraction over the audio output (speaker, WebSocket, file).
///
/// Calls are made from the engine task and must not block: implementations
/// queue audio and return immediately.
pub trait AudioOutput: Send + Sync {
    /// Queue a chunk for playback.
    fn play(&self, chunk: PlaybackChunk);

    /// Drop every queued chunk and stop the current one.
    fn flush(&self);

    /// Apply a new quality directive (buffer size, sample rate).
    fn reconfigure(&self, _directive: &QualityDirective) {}
}

/// No-op implementation for tests and headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAudioOutput;

impl AudioOutput for NoopAudioOutput {
    fn play(&self, _chunk: PlaybackChunk) {}

    fn flush(&self) {}
}
