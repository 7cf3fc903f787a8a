//! Audio frame and chunk types exchanged with the capture/playback adapter.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::turn::TurnId;

/// Format metadata attached to every captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    /// Samples per second (per channel).
    pub sample_rate: u32,

    /// Interleaved channel count.
    pub channels: u16,
}

impl AudioFormat {
    /// Mono audio at the given sample rate.
    #[must_use]
    pub const fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::mono(16_000)
    }
}

/// A fixed-duration block of captured PCM audio.
///
/// `captured_at` is the arrival timestamp of the frame at the engine boundary.
/// Every latency measurement is taken relative to it, so queuing delay inside
/// the engine shows up in the numbers.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Interleaved f32 PCM samples.
    pub samples: Vec<f32>,

    /// Format the samples were captured in.
    pub format: AudioFormat,

    /// Arrival time of the frame.
    pub captured_at: Instant,
}

impl AudioFrame {
    /// Create a frame stamped with the current time.
    #[must_use]
    pub fn new(samples: Vec<f32>, format: AudioFormat) -> Self {
        Self {
            samples,
            format,
            captured_at: Instant::now(),
        }
    }

    /// Wall-clock duration covered by this frame.
    #[must_use]
    pub fn duration(&self) -> Duration {
        let channels = u64::from(self.format.channels.max(1));
        let rate = u64::from(self.format.sample_rate.max(1));
        let frames = self.samples.len() as u64 / channels;
        Duration::from_micros(frames * 1_000_000 / rate)
    }
}

/// Audio produced by a synthesis provider for one chunk of text.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    /// Mono f32 PCM samples.
    pub samples: Vec<f32>,

    /// Sample rate of `samples`.
    pub sample_rate: u32,
}

/// Audio handed to the playback adapter.
///
/// `sequence` increases monotonically across the whole conversation, so the
/// adapter can detect gaps and drop anything older than its last flush.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackChunk {
    /// Monotonic playback sequence number.
    pub sequence: u64,

    /// System turn this audio belongs to.
    pub turn_id: TurnId,

    /// Mono f32 PCM samples.
    pub samples: Vec<f32>,

    /// Sample rate of `samples`.
    pub sample_rate: u32,
}
