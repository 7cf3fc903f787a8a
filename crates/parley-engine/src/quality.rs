//! Adaptive quality control under device stress.
//!
//! [`AdaptiveQualityController`] is a pure policy: feed it runtime signal
//! samples and it answers with a new [`QualityDirective`] when the tier
//! changes. [`QualityMonitor`] wraps it in a periodic polling stream.
//! Directives published from outside the monitor (manual overrides) are
//! adopted as the controller's current tier, so later samples step from
//! there.
//!
//! Policy:
//! - critical pressure (thermal critical) drops straight to `Low`;
//! - serious pressure (thermal serious, low memory, low battery, low-power
//!   mode) drops to `Balanced` unless already lower;
//! - upgrades happen one tier at a time, only after every signal has stayed
//!   nominal for `upgrade_hold`;
//! - anything between nominal and serious holds the current tier and
//!   restarts the upgrade hold.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures_util::Stream;
use parley_core::{
    CapabilitySignalProvider, PowerState, QualityConfig, QualityDirective, QualityTier,
    RuntimeSignals, ThermalLevel,
};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How stressed the device is, derived from one signal sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Pressure {
    Nominal,
    Elevated,
    Serious,
    Critical,
}

/// Tier selection with hysteresis.
#[derive(Debug, Clone)]
pub struct AdaptiveQualityController {
    config: QualityConfig,
    tier: QualityTier,

    /// Start of the current run of nominal samples.
    nominal_since: Option<Instant>,
}

impl AdaptiveQualityController {
    pub const fn new(config: QualityConfig) -> Self {
        Self {
            config,
            tier: QualityTier::High,
            nominal_since: None,
        }
    }

    pub const fn tier(&self) -> QualityTier {
        self.tier
    }

    /// Directive for the current tier.
    pub fn directive(&self) -> QualityDirective {
        directive_for(&self.config, self.tier)
    }

    /// Classify one signal sample.
    pub fn pressure(&self, signals: &RuntimeSignals) -> Pressure {
        let config = &self.config;

        if signals.thermal == ThermalLevel::Critical {
            return Pressure::Critical;
        }

        let battery_serious = match signals.power {
            PowerState::LowPowerMode => true,
            PowerState::Battery { percent } => percent <= config.battery_serious_percent,
            PowerState::Charging => false,
        };
        if signals.thermal == ThermalLevel::Serious
            || signals.available_memory_mb < config.memory_serious_mb
            || battery_serious
        {
            return Pressure::Serious;
        }

        let battery_nominal = match signals.power {
            PowerState::Charging => true,
            PowerState::Battery { percent } => percent > config.battery_nominal_percent,
            PowerState::LowPowerMode => false,
        };
        if signals.thermal == ThermalLevel::Nominal
            && signals.available_memory_mb >= config.memory_nominal_mb
            && battery_nominal
        {
            Pressure::Nominal
        } else {
            Pressure::Elevated
        }
    }

    /// Apply one sample taken at `now`. Returns a directive only when the
    /// tier changed.
    pub fn observe(&mut self, signals: &RuntimeSignals, now: Instant) -> Option<QualityDirective> {
        let pressure = self.pressure(signals);

        let target = match pressure {
            Pressure::Critical => Some(QualityTier::Low),
            Pressure::Serious => Some(QualityTier::Balanced),
            Pressure::Elevated => {
                self.nominal_since = None;
                return None;
            }
            Pressure::Nominal => None,
        };

        if let Some(target) = target {
            self.nominal_since = None;
            if target > self.tier {
                return Some(self.change_tier(target, pressure));
            }
            return None;
        }

        let since = *self.nominal_since.get_or_insert(now);
        if self.tier != QualityTier::High
            && now.saturating_duration_since(since) >= self.config.upgrade_hold()
        {
            // Restart the hold so the next upgrade needs its own nominal run.
            self.nominal_since = Some(now);
            return Some(self.change_tier(self.tier.upgraded(), pressure));
        }

        None
    }

    /// Take `tier` as the current tier without emitting a directive. The
    /// upgrade hold restarts.
    pub fn adopt(&mut self, tier: QualityTier) {
        if tier == self.tier {
            return;
        }
        debug!(from = ?self.tier, to = ?tier, "Quality tier overridden");
        self.tier = tier;
        self.nominal_since = None;
    }

    fn change_tier(&mut self, tier: QualityTier, pressure: Pressure) -> QualityDirective {
        debug!(from = ?self.tier, to = ?tier, ?pressure, "Quality tier changed");
        self.tier = tier;
        self.directive()
    }
}

/// Build the directive for a tier from its configured profile.
pub fn directive_for(config: &QualityConfig, tier: QualityTier) -> QualityDirective {
    let profile = match tier {
        QualityTier::High => config.high,
        QualityTier::Balanced => config.balanced,
        QualityTier::Low => config.low,
    };
    QualityDirective {
        tier,
        sample_rate: profile.sample_rate,
        buffer_size: profile.buffer_size,
        allow_local_inference: profile.allow_local_inference,
    }
}

/// Periodic sampler that turns runtime signals into directive changes.
///
/// Polls the provider at a fixed interval and yields only on tier changes.
pub struct QualityMonitor {
    provider: Arc<dyn CapabilitySignalProvider>,
    controller: AdaptiveQualityController,
    interval: Duration,
    overrides: Option<watch::Receiver<QualityDirective>>,
    cancel_token: CancellationToken,
}

impl QualityMonitor {
    pub fn new(
        provider: Arc<dyn CapabilitySignalProvider>,
        config: QualityConfig,
        cancel_token: CancellationToken,
    ) -> Self {
        let interval = config.sample_interval();
        Self {
            provider,
            controller: AdaptiveQualityController::new(config),
            interval,
            overrides: None,
            cancel_token,
        }
    }

    /// Follow directives published on `overrides`, adopting their tier.
    #[must_use]
    pub fn with_overrides(mut self, overrides: watch::Receiver<QualityDirective>) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Start monitoring and return a stream of directive changes.
    ///
    /// Completes when the cancellation token is triggered.
    pub fn monitor(self) -> impl Stream<Item = QualityDirective> {
        let Self {
            provider,
            mut controller,
            interval: sample_interval,
            mut overrides,
            cancel_token,
        } = self;

        stream! {
            let mut ticker = interval(sample_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            debug!(interval_ms = sample_interval.as_millis(), "Starting quality monitor");

            loop {
                tokio::select! {
                    biased;

                    () = cancel_token.cancelled() => {
                        debug!("Quality monitor cancelled");
                        break;
                    }
                    directive = next_override(&mut overrides) => {
                        controller.adopt(directive.tier);
                    }
                    _ = ticker.tick() => {
                        match provider.sample().await {
                            Ok(signals) => {
                                if let Some(directive) = controller.observe(&signals, Instant::now()) {
                                    yield directive;
                                }
                            }
                            Err(e) => warn!(error = %e, "Runtime signal sample failed"),
                        }
                    }
                }
            }
        }
    }
}

/// Next externally published directive. Pends forever once the sender is
/// gone or when there is nothing to follow.
async fn next_override(
    overrides: &mut Option<watch::Receiver<QualityDirective>>,
) -> QualityDirective {
    if let Some(rx) = overrides.as_mut() {
        if rx.changed().await.is_ok() {
            return *rx.borrow_and_update();
        }
        *overrides = None;
    }
    std::future::pending().await
}
