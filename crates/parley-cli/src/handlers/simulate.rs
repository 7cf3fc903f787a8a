//! Simulate command handler.
//!
//! Spawns the engine against the scripted providers, replays the capture
//! timeline in real time and prints every event as it happens.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parley_core::{
    AudioFormat, AudioFrame, ContextSeed, EngineConfig, EngineError, EngineEvent, QualityConfig,
    SessionStats, ThermalLevel,
};
use parley_engine::quality::directive_for;
use parley_engine::{ConversationEngine, EngineHandle, EngineProviders};
use tokio::sync::{broadcast, watch};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, info, warn};

use crate::commands::SimulateArgs;
use crate::config::{load_engine_config, load_seed};
use crate::error::CliError;
use crate::presentation::{describe, describe_stats};
use crate::simulation::{
    ConsoleOutput, JsonlTurnSink, Script, ScriptedGenerator, ScriptedRecognizer, ScriptedSignals,
    ScriptedSynthesizer, Step,
};

/// Capture frame length.
const FRAME: Duration = Duration::from_millis(20);

/// Sample amplitude of simulated speech; well above any sensible threshold.
const SPEECH_AMPLITUDE: f32 = 0.5;

/// How the event stream is echoed while the simulation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoMode {
    Text,
    Json,
    Silent,
}

/// What a finished simulation observed.
#[derive(Debug)]
pub struct SimulationReport {
    pub events: Vec<EngineEvent>,
    pub stats: SessionStats,
    pub played: Duration,
    pub flushes: u64,
}

/// Execute the simulate command.
pub async fn execute(config_path: Option<&Path>, args: SimulateArgs) -> Result<()> {
    let config = load_engine_config(config_path)?;
    let script = match &args.script {
        Some(path) => Script::load(path)?,
        None => Script::demo(),
    };
    let seed = load_seed(args.history.as_deref())?;
    let mode = if args.json { EchoMode::Json } else { EchoMode::Text };

    let report = run(config, &script, seed, args.transcript.as_deref(), mode).await?;

    if args.stats {
        println!();
        println!("{}", describe_stats(&report.stats));
        println!("{:<22} {}ms", "audio played", report.played.as_millis());
        println!("{:<22} {}", "playback flushes", report.flushes);
    }
    Ok(())
}

/// Run one scripted conversation to completion.
///
/// Returns an error only if the engine could not start or ended on a fatal
/// provider failure.
pub async fn run(
    config: EngineConfig,
    script: &Script,
    seed: ContextSeed,
    transcript: Option<&Path>,
    mode: EchoMode,
) -> Result<SimulationReport, CliError> {
    let (thermal_tx, thermal_rx) = watch::channel(ThermalLevel::Nominal);
    let output = Arc::new(ConsoleOutput::default());

    let mut providers = EngineProviders::new(
        Arc::new(ScriptedRecognizer::new(&script.utterances)),
        Arc::new(ScriptedGenerator::new(&script.replies, script.token_delay())),
        Arc::new(ScriptedSynthesizer::new(script.audio_per_word())),
    )
    .with_output(output.clone())
    .with_signals(Arc::new(ScriptedSignals::new(thermal_rx)));
    if let Some(path) = transcript {
        providers = providers.with_turn_sink(Arc::new(JsonlTurnSink::create(path)?));
    }

    let quality = config.quality.clone();
    let engine = ConversationEngine::new(config, providers)?.with_seed(seed);
    let (handle, task) = engine.spawn();
    let printer = tokio::spawn(echo_events(handle.subscribe(), mode));

    info!(steps = script.steps.len(), "Starting simulated conversation");
    if let Err(e) = drive(&handle, &script.steps, &quality, &thermal_tx).await {
        debug!(error = %e, "Engine stopped before the script finished");
    }
    handle.stop();

    let outcome = task
        .await
        .map_err(|e| CliError::Engine(format!("engine task failed: {e}")))?;
    let events = printer
        .await
        .map_err(|e| CliError::Engine(format!("event printer failed: {e}")))?;
    outcome?;

    Ok(SimulationReport {
        events,
        stats: handle.stats(),
        played: output.played(),
        flushes: output.flushes(),
    })
}

/// Replay the capture timeline against the engine.
async fn drive(
    handle: &EngineHandle,
    steps: &[Step],
    quality: &QualityConfig,
    thermal: &watch::Sender<ThermalLevel>,
) -> Result<(), EngineError> {
    for step in steps {
        match *step {
            Step::Speak(ms) => capture(handle, SPEECH_AMPLITUDE, ms).await?,
            Step::Silence(ms) => capture(handle, 0.0, ms).await?,
            Step::Pause(ms) => {
                handle.pause();
                sleep(Duration::from_millis(ms)).await;
                handle.resume();
            }
            Step::Thermal(level) => {
                thermal.send_replace(level);
            }
            Step::Quality(tier) => handle.set_quality_directive(directive_for(quality, tier)),
        }
    }
    Ok(())
}

/// Push constant-amplitude frames at capture pace for `ms` milliseconds.
async fn capture(handle: &EngineHandle, amplitude: f32, ms: u64) -> Result<(), EngineError> {
    let format = AudioFormat::default();
    let samples = usize::try_from(u64::from(format.sample_rate) * 20 / 1_000).unwrap_or(320);
    let frames = ms.div_ceil(20);

    let mut ticker = interval(FRAME);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    for _ in 0..frames {
        ticker.tick().await;
        handle.push_frame(AudioFrame::new(vec![amplitude; samples], format))?;
    }
    Ok(())
}

/// Echo events until the engine ends; returns everything seen.
async fn echo_events(
    mut events: broadcast::Receiver<EngineEvent>,
    mode: EchoMode,
) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    loop {
        match events.recv().await {
            Ok(event) => {
                match mode {
                    EchoMode::Text => println!("{}", describe(&event)),
                    EchoMode::Json => match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!(error = %e, "Failed to serialize event"),
                    },
                    EchoMode::Silent => {}
                }
                let ended = matches!(event, EngineEvent::Ended);
                seen.push(event);
                if ended {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event echo fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    seen
}
