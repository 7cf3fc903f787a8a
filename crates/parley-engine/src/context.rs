//! Bounded conversation context with oldest-first compression.
//!
//! The context holds committed turns plus an optional system-context entry.
//! Each entry has an estimated weight of `ceil(chars / chars_per_unit)`. After
//! every commit, whole turns are evicted from the oldest end (skipping pinned
//! ones) until the total fits under the ceiling. When only pinned entries
//! remain the ceiling is allowed to be exceeded; turns are never truncated.
//!
//! Pinned entries are the system context, turns committed with
//! [`ConversationContext::commit_pinned`], and the most recent
//! `pinned_recent_turns` turns.

use std::collections::VecDeque;

use parley_core::{
    ContextConfig, ContextMessage, ContextSeed, EngineError, MessageRole, Turn, TurnId,
};

#[derive(Debug, Clone)]
struct ContextEntry {
    turn: Turn,
    weight: usize,
    pinned: bool,
}

/// Ordered, bounded log of committed turns.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    config: ContextConfig,
    system_context: Option<(String, usize)>,
    entries: VecDeque<ContextEntry>,
    total_weight: usize,
}

impl ConversationContext {
    /// Create an empty context.
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            system_context: None,
            entries: VecDeque::new(),
            total_weight: 0,
        }
    }

    /// Rebuild a context from a seed (system context plus persisted turns).
    ///
    /// Turns are re-committed in order, so the usual compression applies;
    /// turns that do not fit are dropped.
    pub fn from_history(config: ContextConfig, seed: ContextSeed) -> Self {
        let mut context = Self::new(config);
        context.set_system_context(seed.system_context);
        for turn in seed.history {
            context.commit(turn);
        }
        context
    }

    /// Estimated weight of a piece of text.
    pub fn estimate_weight(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.config.chars_per_unit.max(1))
    }

    /// Replace the system-context entry.
    pub fn set_system_context(&mut self, text: Option<String>) {
        if let Some((_, weight)) = self.system_context.take() {
            self.total_weight -= weight;
        }
        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            let weight = self.estimate_weight(&text);
            self.total_weight += weight;
            self.system_context = Some((text, weight));
        }
    }

    /// Append a committed turn and compress. Returns the evicted turns,
    /// oldest first.
    pub fn commit(&mut self, turn: Turn) -> Vec<Turn> {
        self.push(turn, false)
    }

    /// Append a turn that must never be evicted.
    pub fn commit_pinned(&mut self, turn: Turn) -> Vec<Turn> {
        self.push(turn, true)
    }

    /// Total estimated weight, system context included.
    pub const fn total_weight(&self) -> usize {
        self.total_weight
    }

    pub const fn ceiling(&self) -> usize {
        self.config.ceiling
    }

    /// Number of turns (system context excluded).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn system_context(&self) -> Option<&str> {
        self.system_context.as_ref().map(|(text, _)| text.as_str())
    }

    /// Turns in order, oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.entries.iter().map(|e| &e.turn)
    }

    /// Whether the turn is currently protected from eviction.
    pub fn is_pinned(&self, id: TurnId) -> bool {
        self.entries
            .iter()
            .position(|e| e.turn.id() == id)
            .is_some_and(|i| self.pinned_at(i))
    }

    /// Render as role-tagged messages for the generator, system context first.
    pub fn messages(&self) -> Vec<ContextMessage> {
        let mut messages = Vec::with_capacity(self.entries.len() + 1);
        if let Some((text, _)) = &self.system_context {
            messages.push(ContextMessage::new(MessageRole::System, text.clone()));
        }
        messages.extend(
            self.entries
                .iter()
                .map(|e| ContextMessage::new(e.turn.speaker().into(), e.turn.text())),
        );
        messages
    }

    fn push(&mut self, turn: Turn, pinned: bool) -> Vec<Turn> {
        let weight = self.estimate_weight(turn.text());
        self.total_weight += weight;
        self.entries.push_back(ContextEntry {
            turn,
            weight,
            pinned,
        });
        self.compress()
    }

    fn pinned_at(&self, index: usize) -> bool {
        let recent_from = self
            .entries
            .len()
            .saturating_sub(self.config.pinned_recent_turns);
        self.entries[index].pinned || index >= recent_from
    }

    fn over_turn_limit(&self) -> bool {
        self.config
            .max_turns
            .is_some_and(|max| self.entries.len() > max)
    }

    fn compress(&mut self) -> Vec<Turn> {
        let mut evicted = Vec::new();

        while self.total_weight > self.config.ceiling || self.over_turn_limit() {
            let Some(index) = (0..self.entries.len()).find(|&i| !self.pinned_at(i)) else {
                if self.total_weight > self.config.ceiling {
                    let overflow = EngineError::ContextOverflow {
                        weight: self.total_weight,
                        ceiling: self.config.ceiling,
                    };
                    tracing::debug!(%overflow, "only pinned entries remain");
                }
                break;
            };

            let Some(entry) = self.entries.remove(index) else {
                break;
            };
            self.total_weight -= entry.weight;
            evicted.push(entry.turn);
        }

        if !evicted.is_empty() {
            tracing::debug!(
                evicted = evicted.len(),
                remaining_weight = self.total_weight,
                ceiling = self.config.ceiling,
                "Context compressed"
            );
        }

        evicted
    }
}
