use std::path::Path;
use std::time::Duration;

use parley_core::{QualityTier, ThermalLevel};
use serde::{Deserialize, Serialize};

use crate::config::read_json;
use crate::error::CliError;

/// One step of the simulated capture timeline.
///
/// Serialized externally tagged, e.g. `{ "speak": 800 }` or
/// `{ "thermal": "serious" }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Voiced capture for this many milliseconds.
    Speak(u64),
    /// Silent capture for this many milliseconds.
    Silence(u64),
    /// Pause the engine for this many milliseconds, then resume.
    Pause(u64),
    /// Report a new thermal level to the quality monitor.
    Thermal(ThermalLevel),
    /// Override the quality tier directly.
    Quality(QualityTier),
}

/// A simulated conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Script {
    /// Final transcripts, one per user utterance, in order.
    pub utterances: Vec<String>,

    /// Assistant replies, one per user utterance, in order.
    pub replies: Vec<String>,

    /// Delay before each generated token.
    pub token_delay_ms: u64,

    /// Synthesized audio per spoken word.
    pub audio_ms_per_word: u64,

    /// Capture timeline.
    pub steps: Vec<Step>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            utterances: Vec::new(),
            replies: Vec::new(),
            token_delay_ms: 40,
            audio_ms_per_word: 120,
            steps: Vec::new(),
        }
    }
}

impl Script {
    /// Load a script file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let script: Self = read_json(path)?;
        if script.steps.is_empty() {
            return Err(CliError::Input(format!("{}: script has no steps", path.display())));
        }
        Ok(script)
    }

    /// The built-in demo: a question, a reply the user talks over, a
    /// follow-up, and a thermal warning halfway through.
    pub fn demo() -> Self {
        Self {
            utterances: vec![
                "what's the weather like today".to_string(),
                "actually never mind".to_string(),
            ],
            replies: vec![
                "It looks sunny with a light breeze. Expect a high of twenty two degrees \
                 this afternoon, and clear skies tonight."
                    .to_string(),
                "No problem. Let me know if you need anything else.".to_string(),
            ],
            steps: vec![
                Step::Speak(800),
                Step::Silence(1_500),
                Step::Speak(600),
                Step::Thermal(ThermalLevel::Serious),
                Step::Silence(3_000),
            ],
            ..Self::default()
        }
    }

    pub const fn token_delay(&self) -> Duration {
        Duration::from_millis(self.token_delay_ms)
    }

    pub const fn audio_per_word(&self) -> Duration {
        Duration::from_millis(self.audio_ms_per_word)
    }
}
