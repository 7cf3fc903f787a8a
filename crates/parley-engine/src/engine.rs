//! Public entry point: build an engine, spawn it, steer it through a handle.

use std::sync::Arc;

use futures_util::StreamExt;
use parley_core::{
    AudioFrame, AudioOutput, CapabilitySignalProvider, ContextSeed, EngineConfig, EngineError,
    EngineEvent, NoopAudioOutput, NoopTurnSink, QualityDirective, QualityTier, SessionStats,
    SpeechRecognizer, SpeechSynthesizer, TextGenerator, TurnSink, TurnState, validate_config,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::coordinator::{Control, CoordinatorParts, TurnCoordinator};
use crate::frame_queue::FrameQueue;
use crate::quality::{QualityMonitor, directive_for};

/// Capacity of the event broadcast channel. Slow subscribers lag rather than
/// stall the coordinator.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Provider set for one conversation.
pub struct EngineProviders {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub generator: Arc<dyn TextGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub output: Arc<dyn AudioOutput>,
    pub turn_sink: Arc<dyn TurnSink>,
    pub signals: Option<Arc<dyn CapabilitySignalProvider>>,
}

impl EngineProviders {
    /// The three streaming providers; playback and persistence default to
    /// no-ops and quality monitoring is off.
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        generator: Arc<dyn TextGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            recognizer,
            generator,
            synthesizer,
            output: Arc::new(NoopAudioOutput),
            turn_sink: Arc::new(NoopTurnSink),
            signals: None,
        }
    }

    #[must_use]
    pub fn with_output(mut self, output: Arc<dyn AudioOutput>) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_turn_sink(mut self, turn_sink: Arc<dyn TurnSink>) -> Self {
        self.turn_sink = turn_sink;
        self
    }

    #[must_use]
    pub fn with_signals(mut self, signals: Arc<dyn CapabilitySignalProvider>) -> Self {
        self.signals = Some(signals);
        self
    }
}

/// A configured, not yet running conversation.
pub struct ConversationEngine {
    config: EngineConfig,
    providers: EngineProviders,
    seed: ContextSeed,
}

impl ConversationEngine {
    /// Validate the configuration and prepare an engine.
    pub fn new(config: EngineConfig, providers: EngineProviders) -> Result<Self, EngineError> {
        validate_config(&config)?;
        Ok(Self {
            config,
            providers,
            seed: ContextSeed::default(),
        })
    }

    /// Start from persisted history and/or a system context.
    #[must_use]
    pub fn with_seed(mut self, seed: ContextSeed) -> Self {
        self.seed = seed;
        self
    }

    /// Spawn the coordinator (and the quality monitor, if a signal provider
    /// was given) on the current Tokio runtime.
    ///
    /// The join handle resolves when the conversation ends; it yields `Err`
    /// only after a fatal provider failure.
    pub fn spawn(self) -> (EngineHandle, JoinHandle<Result<(), EngineError>>) {
        let Self {
            config,
            providers,
            seed,
        } = self;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(TurnState::Idle);
        let (stats_tx, stats_rx) = watch::channel(SessionStats::default());
        let initial = directive_for(&config.quality, QualityTier::High);
        let (directive_tx, directive_rx) = watch::channel(initial);
        let directives = Arc::new(directive_tx);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let frames = Arc::new(FrameQueue::new(config.effective_frame_queue_capacity()));
        let shutdown = CancellationToken::new();

        if let Some(signals) = providers.signals {
            let monitor = QualityMonitor::new(signals, config.quality.clone(), shutdown.child_token())
                .with_overrides(directives.subscribe());
            let directives = Arc::clone(&directives);
            tokio::spawn(async move {
                let stream = monitor.monitor();
                futures_util::pin_mut!(stream);
                while let Some(directive) = stream.next().await {
                    publish_directive(&directives, directive);
                }
            });
        }

        let (coordinator, inbox) = TurnCoordinator::new(CoordinatorParts {
            config,
            recognizer: providers.recognizer,
            generator: providers.generator,
            synthesizer: providers.synthesizer,
            output: providers.output,
            turn_sink: providers.turn_sink,
            seed,
            events: events.clone(),
            state: state_tx,
            stats: stats_tx,
            directive: initial,
        });

        let task_frames = Arc::clone(&frames);
        let task = tokio::spawn(async move {
            let result = coordinator
                .run(Arc::clone(&task_frames), inbox, control_rx, directive_rx)
                .await;
            task_frames.close();
            shutdown.cancel();
            result
        });

        let handle = EngineHandle {
            control: control_tx,
            frames,
            events,
            state: state_rx,
            stats: stats_rx,
            directives,
        };
        (handle, task)
    }
}

/// Cloneable, thread-safe handle to a running engine.
///
/// Every method is non-blocking. Commands are queued to the coordinator and
/// applied in order.
#[derive(Clone)]
pub struct EngineHandle {
    control: mpsc::UnboundedSender<Control>,
    frames: Arc<FrameQueue>,
    events: broadcast::Sender<EngineEvent>,
    state: watch::Receiver<TurnState>,
    stats: watch::Receiver<SessionStats>,
    directives: Arc<watch::Sender<QualityDirective>>,
}

impl EngineHandle {
    /// Hand one capture frame to the engine. Never blocks: when the engine
    /// falls behind, the oldest queued frame is dropped and reported.
    pub fn push_frame(&self, frame: AudioFrame) -> Result<(), EngineError> {
        if self.frames.is_closed() || self.control.is_closed() {
            return Err(EngineError::Closed);
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pause(&self) {
        self.send(Control::Pause);
    }

    pub fn resume(&self) {
        self.send(Control::Resume);
    }

    pub fn stop(&self) {
        self.send(Control::Stop);
    }

    /// Override the quality directive. Ignored if it equals the current one.
    /// The quality monitor adopts the override's tier, so later runtime
    /// signals move the tier on from there.
    pub fn set_quality_directive(&self, directive: QualityDirective) {
        publish_directive(&self.directives, directive);
    }

    pub fn quality_directive(&self) -> QualityDirective {
        *self.directives.borrow()
    }

    /// Subscribe to engine events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Watch the turn state.
    pub fn state(&self) -> watch::Receiver<TurnState> {
        self.state.clone()
    }

    pub fn current_state(&self) -> TurnState {
        *self.state.borrow()
    }

    /// Snapshot of the session counters.
    pub fn stats(&self) -> SessionStats {
        *self.stats.borrow()
    }

    /// Watch the session counters.
    pub fn stats_watch(&self) -> watch::Receiver<SessionStats> {
        self.stats.clone()
    }

    fn send(&self, command: Control) {
        if self.control.send(command).is_err() {
            debug!(?command, "Engine already stopped, command ignored");
        }
    }
}

fn publish_directive(directives: &watch::Sender<QualityDirective>, directive: QualityDirective) {
    directives.send_if_modified(|current| {
        if *current == directive {
            false
        } else {
            *current = directive;
            true
        }
    });
}
