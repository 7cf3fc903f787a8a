//! Engine configuration types and validation.
//!
//! These are pure data types: loading them from disk is the host's job (the
//! CLI reads JSON). Every field has a default so partial documents work, and
//! [`validate_config`] rejects values the engine cannot honour.
//!
//! Durations are stored as milliseconds to keep the wire format flat.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub vad: VadConfig,
    pub turn: TurnConfig,
    pub context: ContextConfig,
    pub quality: QualityConfig,

    /// Capacity of the capture frame queue (drop-oldest on overflow).
    pub frame_queue_capacity: usize,
}

impl EngineConfig {
    /// Capacity used when the field is left at zero.
    pub const DEFAULT_FRAME_QUEUE_CAPACITY: usize = 64;

    /// Effective frame queue capacity.
    #[must_use]
    pub const fn effective_frame_queue_capacity(&self) -> usize {
        if self.frame_queue_capacity == 0 {
            Self::DEFAULT_FRAME_QUEUE_CAPACITY
        } else {
            self.frame_queue_capacity
        }
    }
}

// ── VAD ────────────────────────────────────────────────────────────

/// Voice activity detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Speech confidence threshold (0.0–1.0, default 0.5).
    ///
    /// Higher values require more confidence before triggering speech detection.
    pub threshold: f32,

    /// Minimum speech duration (ms) before speech-start is reported (default 60).
    ///
    /// Filters out very brief sounds (clicks, pops) that aren't real speech.
    pub min_speech_duration_ms: u32,

    /// Continuous silence (ms) that ends an utterance (default 700).
    pub min_silence_duration_ms: u32,

    /// Time (ms) confidence must stay below threshold before the detector
    /// re-arms for a new speech-start (default 200).
    pub rearm_hold_ms: u32,

    /// Number of frames in the rolling confidence window (default 3).
    pub smoothing_window: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_speech_duration_ms: 60,
            min_silence_duration_ms: 700,
            rearm_hold_ms: 200,
            smoothing_window: 3,
        }
    }
}

// ── Turn taking ────────────────────────────────────────────────────

/// When generated text is flushed to synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Flush at `.`, `!`, `?` followed by whitespace.
    #[default]
    Sentence,
    /// Also flush at `,`, `;`, `:` followed by whitespace.
    Clause,
    /// Ignore punctuation; flush every `flush_max_tokens` tokens.
    TokenCount,
}

/// Turn-taking thresholds and budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Minimum VAD confidence for a barge-in (default 0.7).
    pub barge_in_threshold: f32,

    /// Minimum time between two honoured barge-ins (default 1500 ms).
    pub barge_in_cooldown_ms: u64,

    /// Maximum length of a user utterance before it is force-ended.
    pub max_utterance_ms: u64,

    /// Maximum wall time of one generation.
    pub max_generation_ms: u64,

    /// Maximum number of tokens accepted from one generation.
    pub max_generation_tokens: usize,

    /// Bound on provider stream setup.
    pub stream_setup_timeout_ms: u64,

    /// Bound on waiting for a final transcript after finalize.
    pub finalize_timeout_ms: u64,

    /// Bound on waiting for a provider to acknowledge cancellation.
    pub cancel_ack_timeout_ms: u64,

    /// Sentence-boundary flush heuristic.
    pub flush_policy: FlushPolicy,

    /// Flush after this many tokens even without punctuation.
    pub flush_max_tokens: usize,

    /// Commit (rather than discard) the in-progress turn on stop.
    pub commit_partial_on_stop: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            barge_in_threshold: 0.7,
            barge_in_cooldown_ms: 1_500,
            max_utterance_ms: 15_000,
            max_generation_ms: 30_000,
            max_generation_tokens: 1_024,
            stream_setup_timeout_ms: 5_000,
            finalize_timeout_ms: 3_000,
            cancel_ack_timeout_ms: 500,
            flush_policy: FlushPolicy::Sentence,
            flush_max_tokens: 24,
            commit_partial_on_stop: false,
        }
    }
}

impl TurnConfig {
    pub const fn barge_in_cooldown(&self) -> Duration {
        Duration::from_millis(self.barge_in_cooldown_ms)
    }

    pub const fn max_utterance(&self) -> Duration {
        Duration::from_millis(self.max_utterance_ms)
    }

    pub const fn max_generation(&self) -> Duration {
        Duration::from_millis(self.max_generation_ms)
    }

    pub const fn stream_setup_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_setup_timeout_ms)
    }

    pub const fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.finalize_timeout_ms)
    }

    pub const fn cancel_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_ack_timeout_ms)
    }
}

// ── Context ────────────────────────────────────────────────────────

/// Model capability tiers based on context window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// 100K+ tokens.
    Cloud,
    /// 32K–100K tokens.
    MidRange,
    /// 8K–32K tokens.
    OnDevice,
    /// Under 8K tokens.
    Tiny,
}

impl ModelTier {
    /// Determine tier from context window size.
    #[must_use]
    pub const fn from_context_window(tokens: usize) -> Self {
        if tokens >= 100_000 {
            Self::Cloud
        } else if tokens >= 32_000 {
            Self::MidRange
        } else if tokens >= 8_000 {
            Self::OnDevice
        } else {
            Self::Tiny
        }
    }

    /// Conversation weight budget for this tier.
    #[must_use]
    pub const fn weight_budget(self) -> usize {
        match self {
            Self::Cloud => 12_000,
            Self::MidRange => 8_000,
            Self::OnDevice => 4_000,
            Self::Tiny => 2_000,
        }
    }

    /// How many recent turns stay in context for this tier.
    #[must_use]
    pub const fn max_turns(self) -> usize {
        match self {
            Self::Cloud => 20,
            Self::MidRange => 12,
            Self::OnDevice => 6,
            Self::Tiny => 3,
        }
    }
}

/// Conversation context bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum total estimated weight of the context.
    pub ceiling: usize,

    /// The most recent N turns are pinned and never evicted.
    pub pinned_recent_turns: usize,

    /// Characters per weight unit (rough token estimate).
    pub chars_per_unit: usize,

    /// Optional cap on the number of turns kept.
    pub max_turns: Option<usize>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::for_tier(ModelTier::MidRange)
    }
}

impl ContextConfig {
    /// Bounds for a model with the given context window (in tokens).
    #[must_use]
    pub const fn for_context_window(tokens: usize) -> Self {
        Self::for_tier(ModelTier::from_context_window(tokens))
    }

    #[must_use]
    pub const fn for_tier(tier: ModelTier) -> Self {
        Self {
            ceiling: tier.weight_budget(),
            pinned_recent_turns: 2,
            chars_per_unit: 4,
            max_turns: Some(tier.max_turns()),
        }
    }
}

// ── Quality ────────────────────────────────────────────────────────

/// Audio/inference settings for one quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierProfile {
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub allow_local_inference: bool,
}

/// Adaptive quality thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Interval between runtime signal samples.
    pub sample_interval_ms: u64,

    /// How long every signal must stay nominal before upgrading one tier.
    pub upgrade_hold_ms: u64,

    /// Available memory below this is serious.
    pub memory_serious_mb: u64,

    /// Available memory above this is nominal.
    pub memory_nominal_mb: u64,

    /// Battery percentage at or below this is serious.
    pub battery_serious_percent: u8,

    /// Battery percentage above this is nominal.
    pub battery_nominal_percent: u8,

    pub high: TierProfile,
    pub balanced: TierProfile,
    pub low: TierProfile,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 2_000,
            upgrade_hold_ms: 30_000,
            memory_serious_mb: 512,
            memory_nominal_mb: 1_024,
            battery_serious_percent: 15,
            battery_nominal_percent: 30,
            high: TierProfile {
                sample_rate: 24_000,
                buffer_size: 512,
                allow_local_inference: true,
            },
            balanced: TierProfile {
                sample_rate: 16_000,
                buffer_size: 1_024,
                allow_local_inference: true,
            },
            low: TierProfile {
                sample_rate: 16_000,
                buffer_size: 2_048,
                allow_local_inference: false,
            },
        }
    }
}

impl QualityConfig {
    pub const fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub const fn upgrade_hold(&self) -> Duration {
        Duration::from_millis(self.upgrade_hold_ms)
    }
}

// ── Validation ─────────────────────────────────────────────────────

/// Configuration validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be within 0.0..=1.0")]
    ThresholdOutOfRange(&'static str),

    #[error("barge-in threshold must not be below the VAD threshold")]
    BargeInBelowSpeechThreshold,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("memory thresholds must satisfy serious < nominal")]
    MemoryThresholdOrder,

    #[error("battery thresholds must satisfy serious < nominal <= 100")]
    BatteryThresholdOrder,
}

/// Validate configuration values.
pub fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    let vad = &config.vad;
    let turn = &config.turn;

    if !(0.0..=1.0).contains(&vad.threshold) {
        return Err(ConfigError::ThresholdOutOfRange("vad.threshold"));
    }
    if !(0.0..=1.0).contains(&turn.barge_in_threshold) {
        return Err(ConfigError::ThresholdOutOfRange("turn.barge_in_threshold"));
    }
    if turn.barge_in_threshold < vad.threshold {
        return Err(ConfigError::BargeInBelowSpeechThreshold);
    }
    if vad.smoothing_window == 0 {
        return Err(ConfigError::Zero("vad.smoothing_window"));
    }

    let budgets = [
        ("turn.max_utterance_ms", turn.max_utterance_ms),
        ("turn.max_generation_ms", turn.max_generation_ms),
        ("turn.stream_setup_timeout_ms", turn.stream_setup_timeout_ms),
        ("turn.finalize_timeout_ms", turn.finalize_timeout_ms),
        ("turn.cancel_ack_timeout_ms", turn.cancel_ack_timeout_ms),
        ("quality.sample_interval_ms", config.quality.sample_interval_ms),
    ];
    if let Some((name, _)) = budgets.iter().find(|(_, value)| *value == 0) {
        return Err(ConfigError::Zero(name));
    }
    if turn.max_generation_tokens == 0 {
        return Err(ConfigError::Zero("turn.max_generation_tokens"));
    }
    if turn.flush_max_tokens == 0 {
        return Err(ConfigError::Zero("turn.flush_max_tokens"));
    }
    if config.context.ceiling == 0 {
        return Err(ConfigError::Zero("context.ceiling"));
    }
    if config.context.chars_per_unit == 0 {
        return Err(ConfigError::Zero("context.chars_per_unit"));
    }

    let quality = &config.quality;
    if quality.memory_serious_mb >= quality.memory_nominal_mb {
        return Err(ConfigError::MemoryThresholdOrder);
    }
    if quality.battery_serious_percent >= quality.battery_nominal_percent
        || quality.battery_nominal_percent > 100
    {
        return Err(ConfigError::BatteryThresholdOrder);
    }

    Ok(())
}
