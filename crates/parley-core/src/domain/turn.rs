//! Conversation turns.
//!
//! A [`TurnDraft`] is the mutable, in-progress form of a turn. Committing it
//! consumes the draft and yields an immutable [`Turn`]; the engine never
//! touches a committed turn's content again.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(Uuid);

impl TurnId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    System,
}

/// The latency checkpoints recorded for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyKind {
    /// First captured frame of the utterance → final transcript.
    CaptureToTranscript,
    /// Final transcript → first generated token.
    TranscriptToFirstToken,
    /// First generated token → first synthesized audio.
    FirstTokenToFirstAudio,
}

/// A single wall-clock latency measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyMeasurement {
    pub kind: LatencyKind,
    pub duration: Duration,
}

/// A committed, immutable conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    id: TurnId,
    speaker: Speaker,
    text: String,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    #[serde(default)]
    latencies: Vec<LatencyMeasurement>,
    #[serde(default)]
    interrupted: bool,
}

impl Turn {
    /// Build an already-complete turn, e.g. when seeding a context from
    /// persisted history or in tests.
    #[must_use]
    pub fn from_text(speaker: Speaker, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TurnId::new(),
            speaker,
            text: text.into(),
            started_at: now,
            ended_at: now,
            latencies: Vec::new(),
            interrupted: false,
        }
    }

    pub const fn id(&self) -> TurnId {
        self.id
    }

    pub const fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub const fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    pub fn latencies(&self) -> &[LatencyMeasurement] {
        &self.latencies
    }

    /// Latency of the given kind, if it was recorded.
    pub fn latency(&self, kind: LatencyKind) -> Option<Duration> {
        self.latencies
            .iter()
            .find(|m| m.kind == kind)
            .map(|m| m.duration)
    }

    /// Whether a barge-in (or a budget expiry) cut this turn short.
    pub const fn is_interrupted(&self) -> bool {
        self.interrupted
    }
}

/// A turn that is still being assembled.
#[derive(Debug, Clone)]
pub struct TurnDraft {
    id: TurnId,
    speaker: Speaker,
    text: String,
    started_at: DateTime<Utc>,
    latencies: Vec<LatencyMeasurement>,
    interrupted: bool,
}

impl TurnDraft {
    /// Open a new draft starting now.
    #[must_use]
    pub fn new(speaker: Speaker) -> Self {
        Self {
            id: TurnId::new(),
            speaker,
            text: String::new(),
            started_at: Utc::now(),
            latencies: Vec::new(),
            interrupted: false,
        }
    }

    pub const fn id(&self) -> TurnId {
        self.id
    }

    pub const fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// True when the draft carries no meaningful text.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Replace the draft text (used for partial transcripts).
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Append generated text.
    pub fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Drop all accumulated text, keeping id and timestamps.
    pub fn clear_text(&mut self) {
        self.text.clear();
    }

    /// Record a latency checkpoint. Only the first measurement of each kind
    /// is kept.
    pub fn record_latency(&mut self, kind: LatencyKind, duration: Duration) {
        if self.latencies.iter().any(|m| m.kind == kind) {
            return;
        }
        self.latencies.push(LatencyMeasurement { kind, duration });
    }

    pub fn has_latency(&self, kind: LatencyKind) -> bool {
        self.latencies.iter().any(|m| m.kind == kind)
    }

    pub const fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    /// Freeze the draft into a committed turn ending now.
    #[must_use]
    pub fn commit(self) -> Turn {
        Turn {
            id: self.id,
            speaker: self.speaker,
            text: self.text.trim().to_string(),
            started_at: self.started_at,
            ended_at: Utc::now(),
            latencies: self.latencies,
            interrupted: self.interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_trims_and_keeps_identity() {
        let mut draft = TurnDraft::new(Speaker::User);
        let id = draft.id();
        draft.set_text("  What is photosynthesis?  ");

        let turn = draft.commit();
        assert_eq!(turn.id(), id);
        assert_eq!(turn.text(), "What is photosynthesis?");
        assert_eq!(turn.speaker(), Speaker::User);
        assert!(turn.ended_at() >= turn.started_at());
        assert!(!turn.is_interrupted());
    }

    #[test]
    fn only_first_latency_of_a_kind_is_kept() {
        let mut draft = TurnDraft::new(Speaker::System);
        draft.record_latency(LatencyKind::TranscriptToFirstToken, Duration::from_millis(120));
        draft.record_latency(LatencyKind::TranscriptToFirstToken, Duration::from_millis(900));

        let turn = draft.commit();
        assert_eq!(turn.latencies().len(), 1);
        assert_eq!(
            turn.latency(LatencyKind::TranscriptToFirstToken),
            Some(Duration::from_millis(120))
        );
        assert_eq!(turn.latency(LatencyKind::FirstTokenToFirstAudio), None);
    }

    #[test]
    fn whitespace_only_draft_is_empty() {
        let mut draft = TurnDraft::new(Speaker::User);
        assert!(draft.is_empty());
        draft.set_text("   ");
        assert!(draft.is_empty());
        draft.push_text("hi");
        assert!(!draft.is_empty());
    }

    #[test]
    fn turn_survives_json_round_trip() {
        let mut draft = TurnDraft::new(Speaker::System);
        draft.push_text("Plants turn light into sugar.");
        draft.mark_interrupted();
        let turn = draft.commit();

        let json = serde_json::to_string(&turn).unwrap();
        let restored: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, turn);
        assert!(restored.is_interrupted());
    }
}
