//! Runtime capability signals (thermal, memory, power).

use async_trait::async_trait;

use crate::domain::RuntimeSignals;
use crate::error::ProviderError;

/// Platform signal source sampled periodically by the quality monitor.
///
/// How the platform gathers these values is outside the engine; only the
/// resulting signal is consumed.
#[async_trait]
pub trait CapabilitySignalProvider: Send + Sync {
    async fn sample(&self) -> Result<RuntimeSignals, ProviderError>;
}
