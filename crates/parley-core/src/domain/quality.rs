//! Runtime signals and the quality directives derived from them.

use serde::{Deserialize, Serialize};

/// Device thermal pressure, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThermalLevel {
    #[default]
    Nominal,
    Fair,
    Serious,
    Critical,
}

/// Power source and battery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PowerState {
    /// On external power.
    #[default]
    Charging,
    /// Running from battery.
    Battery { percent: u8 },
    /// The OS low-power mode is on.
    LowPowerMode,
}

/// One sample of runtime capability signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSignals {
    pub thermal: ThermalLevel,
    pub available_memory_mb: u64,
    pub power: PowerState,
}

impl Default for RuntimeSignals {
    fn default() -> Self {
        Self {
            thermal: ThermalLevel::Nominal,
            available_memory_mb: u64::MAX,
            power: PowerState::Charging,
        }
    }
}

/// Discrete operating point trading fidelity for resource use.
///
/// Ordered from best to most degraded, so `High < Balanced < Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    #[default]
    High,
    Balanced,
    Low,
}

impl QualityTier {
    /// One step more degraded (saturates at `Low`).
    #[must_use]
    pub const fn degraded(self) -> Self {
        match self {
            Self::High => Self::Balanced,
            Self::Balanced | Self::Low => Self::Low,
        }
    }

    /// One step better (saturates at `High`).
    #[must_use]
    pub const fn upgraded(self) -> Self {
        match self {
            Self::Low => Self::Balanced,
            Self::Balanced | Self::High => Self::High,
        }
    }
}

/// Directive consumed by the capture adapter and the coordinator.
///
/// Never persisted; recomputed whenever the quality tier changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityDirective {
    pub tier: QualityTier,
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub allow_local_inference: bool,
}

impl Default for QualityDirective {
    fn default() -> Self {
        Self {
            tier: QualityTier::High,
            sample_rate: 24_000,
            buffer_size: 512,
            allow_local_inference: true,
        }
    }
}
