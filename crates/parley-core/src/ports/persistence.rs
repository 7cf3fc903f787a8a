//! Persistence boundary: committed turns leave the engine through here.

use crate::domain::Turn;

/// Receives every committed turn, in commit order.
///
/// Fire-and-forget: adapters handle their own storage errors. The engine
/// never reads persisted history back beyond the initial
/// [`ContextSeed`](crate::domain::ContextSeed).
pub trait TurnSink: Send + Sync {
    fn turn_committed(&self, turn: &Turn);
}

/// No-op implementation for tests and contexts that don't persist.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTurnSink;

impl TurnSink for NoopTurnSink {
    fn turn_committed(&self, _turn: &Turn) {}
}
