//! Human-readable rendering of engine events.
//!
//! Format-only: no decisions are made here.

use std::fmt::Write as _;

use parley_core::{EngineEvent, LatencyKind, SessionStats, Speaker};
use serde::Serialize;

/// Width of the event-name column.
const LABEL_WIDTH: usize = 18;

/// Render one event as a single line of text.
pub fn describe(event: &EngineEvent) -> String {
    let detail = match event {
        EngineEvent::StateChanged { from, to } => format!("{} -> {}", wire_name(from), wire_name(to)),
        EngineEvent::TranscriptPartial { text, .. } => format!("\"{text}\""),
        EngineEvent::TurnCommitted { turn } => {
            let speaker = match turn.speaker() {
                Speaker::User => "user",
                Speaker::System => "assistant",
            };
            let mut line = format!("{speaker}: \"{}\"", turn.text());
            if turn.is_interrupted() {
                line.push_str(" (interrupted)");
            }
            for measurement in turn.latencies() {
                let _ = write!(
                    line,
                    " [{} {}ms]",
                    latency_label(measurement.kind),
                    measurement.duration.as_millis()
                );
            }
            line
        }
        EngineEvent::TurnDiscarded { reason, .. } => wire_name(reason),
        EngineEvent::BargeIn {
            generation,
            confidence,
        } => format!("generation {generation}, confidence {confidence:.2}"),
        EngineEvent::BargeInSuppressed { confidence, reason } => {
            format!("{} (confidence {confidence:.2})", wire_name(reason))
        }
        EngineEvent::PlaybackFlushed { generation } => format!("generation {generation}"),
        EngineEvent::TimeoutExceeded { stage, kind } => format!("{stage}: {kind}"),
        EngineEvent::Retrying { stage, attempt } => format!("{stage}, attempt {attempt}"),
        EngineEvent::RecoverableError { stage, message }
        | EngineEvent::Fatal { stage, message } => format!("{stage}: {message}"),
        EngineEvent::InputOverrun { dropped } => format!("{dropped} frames dropped"),
        EngineEvent::QualityChanged { directive } => format!(
            "{} ({} Hz, buffer {}, local inference {})",
            wire_name(&directive.tier),
            directive.sample_rate,
            directive.buffer_size,
            if directive.allow_local_inference { "on" } else { "off" }
        ),
        EngineEvent::ContextEvicted {
            turn_ids,
            remaining_weight,
        } => format!("{} turns, weight now {remaining_weight}", turn_ids.len()),
        EngineEvent::Ended => String::new(),
    };
    format!("{:<LABEL_WIDTH$} {detail}", event.event_name())
        .trim_end()
        .to_string()
}

/// Render the session counters as an aligned block.
pub fn describe_stats(stats: &SessionStats) -> String {
    let rows = [
        ("committed turns", stats.committed_turns),
        ("barge-ins", stats.barge_ins),
        ("barge-ins suppressed", stats.barge_ins_suppressed),
        ("stale events", stats.stale_events),
        ("timeouts", stats.timeouts),
        ("recoverable errors", stats.recoverable_errors),
        ("frames dropped", stats.frames_dropped),
        ("evicted turns", stats.evicted_turns),
    ];
    rows.iter()
        .map(|(label, value)| format!("{label:<22} {value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

const fn latency_label(kind: LatencyKind) -> &'static str {
    match kind {
        LatencyKind::CaptureToTranscript => "transcript",
        LatencyKind::TranscriptToFirstToken => "first token",
        LatencyKind::FirstTokenToFirstAudio => "first audio",
    }
}

/// The serde name of a unit enum value, e.g. `user_speaking`.
fn wire_name<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default()
}
