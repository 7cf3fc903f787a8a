//! Scripted, in-process stand-ins for capture and the three providers.
//!
//! A [`Script`] describes what the simulated user says and when, and what the
//! simulated assistant answers. The providers replay it with realistic pacing
//! so the engine's timing behaviour (barge-in, budgets, quality changes) can
//! be observed without any audio hardware or model.

mod providers;
mod script;

pub use providers::{
    ConsoleOutput, JsonlTurnSink, ScriptedGenerator, ScriptedRecognizer, ScriptedSignals,
    ScriptedSynthesizer,
};
pub use script::{Script, Step};
