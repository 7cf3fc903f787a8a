//! Speech recognition and synthesis ports.

use async_trait::async_trait;

use super::EventStream;
use crate::domain::{AudioFormat, AudioFrame, SynthesizedAudio};
use crate::error::ProviderError;

// ── Recognition ────────────────────────────────────────────────────

/// Transcript output of a recognition session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Best guess so far; replaced by the next partial or the final.
    Partial(String),
    /// The definitive transcript. Terminal.
    Final(String),
}

/// Streaming speech-to-text engine.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Open a recognition session for audio in `format`.
    ///
    /// The session keeps this format for its whole lifetime; a sample-rate
    /// change takes effect at the next session.
    async fn start(&self, format: AudioFormat)
    -> Result<Box<dyn RecognitionSession>, ProviderError>;
}

/// One open recognition session.
///
/// The engine takes [`events`](RecognitionSession::events) exactly once, right
/// after the session starts, and then feeds frames until it either finalizes
/// or cancels.
#[async_trait]
pub trait RecognitionSession: Send {
    /// Take the transcript event stream.
    fn events(&mut self) -> EventStream<TranscriptEvent>;

    /// Push one captured frame.
    async fn feed(&mut self, frame: &AudioFrame) -> Result<(), ProviderError>;

    /// Signal end of audio; the stream should then yield a final transcript.
    async fn finalize(&mut self) -> Result<(), ProviderError>;

    /// Ask the provider to stop. Resolving acknowledges the cancellation.
    async fn cancel(&mut self) {}
}

// ── Synthesis ──────────────────────────────────────────────────────

/// Text to synthesize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    /// A sentence or clause, already stripped of markup.
    pub text: String,

    /// Requested output sample rate.
    pub sample_rate: u32,
}

/// Output of a synthesis stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    /// A block of audio, in playback order.
    Audio(SynthesizedAudio),
    /// All audio for the request was produced. Terminal.
    Completed,
}

/// Streaming text-to-speech engine.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Start synthesizing one chunk of text.
    ///
    /// Dropping the returned stream cancels the synthesis.
    async fn synthesize(
        &self,
        request: SynthesisRequest,
    ) -> Result<EventStream<SynthesisEvent>, ProviderError>;
}
