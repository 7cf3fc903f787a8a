//! Voice activity detection: classifies capture frames as speech or silence.
//!
//! Detection is energy based: each frame's RMS energy is mapped onto a
//! 0.0–1.0 confidence, and the detector smooths that over a short rolling
//! window before comparing it against the configured threshold.
//!
//! The detector emits edge events only:
//!
//! * [`VadEvent::SpeechStart`] once smoothed confidence has stayed at or
//!   above threshold for `min_speech_duration_ms`, and only while the
//!   detector is *armed*. Emitting disarms it; it re-arms after confidence
//!   stays below threshold for `rearm_hold_ms`. This debounces flicker.
//! * [`VadEvent::SpeechEnd`] once confidence has stayed below threshold for
//!   `min_silence_duration_ms` after a speech start.

use std::collections::VecDeque;

use parley_core::{AudioFrame, VadConfig};

/// Lower bound of the RMS energy range the confidence scale is mapped onto.
const MIN_ENERGY: f32 = 0.001;

/// Upper bound of the RMS energy range; anything louder is confidence 1.0.
const MAX_ENERGY: f32 = 0.05;

/// Events emitted by the VAD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadEvent {
    /// Speech has started, with the smoothed confidence at detection time.
    SpeechStart { confidence: f32 },

    /// Speech has ended (enough continuous silence).
    SpeechEnd,
}

/// Voice Activity Detector.
///
/// Stateless per call from the caller's point of view; the only state kept is
/// the rolling confidence window and the debounce counters.
#[derive(Debug)]
pub struct VoiceActivityDetector {
    config: VadConfig,

    /// Most recent per-frame confidences, newest last.
    window: VecDeque<f32>,

    /// Whether a speech-start may be emitted.
    armed: bool,

    /// Whether we are inside an utterance (between start and end).
    in_speech: bool,

    /// Accumulated above-threshold time while armed.
    speech_ms: u32,

    /// Accumulated below-threshold time inside an utterance.
    silence_ms: u32,

    /// Accumulated below-threshold time since the last above-threshold frame.
    below_ms: u32,

    /// Smoothed confidence of the last processed frame.
    last_confidence: f32,
}

impl VoiceActivityDetector {
    /// Create a new detector with the given configuration.
    pub fn new(config: VadConfig) -> Self {
        let capacity = config.smoothing_window.max(1);
        Self {
            config,
            window: VecDeque::with_capacity(capacity),
            armed: true,
            in_speech: false,
            speech_ms: 0,
            silence_ms: 0,
            below_ms: 0,
            last_confidence: 0.0,
        }
    }

    /// Process one frame and return any edge event.
    pub fn process_frame(&mut self, frame: &AudioFrame) -> Option<VadEvent> {
        let confidence = self.smooth(frame_confidence(&frame.samples));
        self.last_confidence = confidence;

        #[allow(clippy::cast_possible_truncation)]
        let frame_ms = frame.duration().as_millis().min(u128::from(u32::MAX)) as u32;

        if confidence >= self.config.threshold {
            self.below_ms = 0;
            self.silence_ms = 0;

            if !self.armed {
                return None;
            }

            self.speech_ms = self.speech_ms.saturating_add(frame_ms);
            if self.speech_ms >= self.config.min_speech_duration_ms {
                self.armed = false;
                self.in_speech = true;
                self.speech_ms = 0;
                tracing::debug!(confidence, "VAD: speech detected");
                return Some(VadEvent::SpeechStart { confidence });
            }
            return None;
        }

        // Silence interrupts a not-yet-confirmed start.
        self.speech_ms = 0;
        self.below_ms = self.below_ms.saturating_add(frame_ms);
        if !self.armed && self.below_ms >= self.config.rearm_hold_ms {
            self.armed = true;
        }

        if self.in_speech {
            self.silence_ms = self.silence_ms.saturating_add(frame_ms);
            if self.silence_ms >= self.config.min_silence_duration_ms {
                self.in_speech = false;
                self.silence_ms = 0;
                tracing::debug!("VAD: speech ended");
                return Some(VadEvent::SpeechEnd);
            }
        }

        None
    }

    /// Reset to the initial armed, silent state.
    pub fn reset(&mut self) {
        self.window.clear();
        self.armed = true;
        self.in_speech = false;
        self.speech_ms = 0;
        self.silence_ms = 0;
        self.below_ms = 0;
        self.last_confidence = 0.0;
    }

    /// Re-enter an utterance that was interrupted by a reset, so trailing
    /// silence still produces [`VadEvent::SpeechEnd`]. The detector stays
    /// disarmed until the usual re-arm hold has passed.
    pub fn resume_in_speech(&mut self) {
        self.reset();
        self.armed = false;
        self.in_speech = true;
    }

    /// Whether the detector is currently inside an utterance.
    pub const fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Whether a new speech-start can be emitted.
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Smoothed confidence of the most recent frame.
    pub const fn last_confidence(&self) -> f32 {
        self.last_confidence
    }

    fn smooth(&mut self, confidence: f32) -> f32 {
        if self.window.len() == self.config.smoothing_window.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(confidence);

        #[allow(clippy::cast_precision_loss)]
        let len = self.window.len() as f32;
        self.window.iter().sum::<f32>() / len
    }
}

/// Map a frame's RMS energy onto a 0.0–1.0 confidence.
///
/// Inverse of mapping a threshold onto the `[MIN_ENERGY, MAX_ENERGY]` range,
/// so `confidence >= t` exactly when the energy clears the threshold `t`
/// would select.
pub fn frame_confidence(samples: &[f32]) -> f32 {
    let energy = calculate_rms_energy(samples);
    ((energy - MIN_ENERGY) / (MAX_ENERGY - MIN_ENERGY)).clamp(0.0, 1.0)
}

/// Calculate RMS (Root Mean Square) energy of an audio frame.
fn calculate_rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|&s| s * s).sum();

    #[allow(clippy::cast_precision_loss)]
    let mean = sum_squares / samples.len() as f32;

    mean.sqrt()
}
