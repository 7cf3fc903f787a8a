//! Scripted providers and a frame-pumping driver for engine tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use parley_core::{
    AudioFormat, AudioFrame, AudioOutput, EngineConfig, EngineError, EngineEvent, EventStream,
    GenerationEvent, GenerationRequest, PlaybackChunk, ProviderError, QualityDirective,
    RecognitionSession, SpeechRecognizer, SpeechSynthesizer, SynthesisEvent, SynthesisRequest,
    SynthesizedAudio, TextGenerator, TranscriptEvent, Turn, TurnId, TurnSink, VadConfig,
};
use parley_engine::{ConversationEngine, EngineHandle, EngineProviders};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;

pub const FRAME: Duration = Duration::from_millis(20);
pub const LOUD: f32 = 0.5;
pub const SILENCE: f32 = 0.0;

pub fn frame(amplitude: f32) -> AudioFrame {
    AudioFrame::new(vec![amplitude; 320], AudioFormat::mono(16_000))
}

/// Fast VAD edges so scenarios stay short.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig {
        vad: VadConfig {
            threshold: 0.5,
            min_speech_duration_ms: 60,
            min_silence_duration_ms: 200,
            rearm_hold_ms: 100,
            smoothing_window: 1,
        },
        ..EngineConfig::default()
    };
    config.turn.max_generation_ms = 5_000;
    config.turn.stream_setup_timeout_ms = 1_000;
    config
}

// ----------------------------------------------------------------------
// Recognizer
// ----------------------------------------------------------------------

/// Emits a one-word partial on the first frame and the scripted utterance as
/// the final transcript when finalized. Utterances are consumed on final.
#[derive(Default)]
pub struct ScriptedRecognizer {
    utterances: Arc<Mutex<VecDeque<String>>>,
    start_failures: Mutex<VecDeque<ProviderError>>,
    hang_on_start: bool,
    starts: Mutex<usize>,
}

impl ScriptedRecognizer {
    pub fn new(utterances: &[&str]) -> Self {
        Self {
            utterances: Arc::new(Mutex::new(
                utterances.iter().map(ToString::to_string).collect(),
            )),
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang_on_start: true,
            ..Self::default()
        }
    }

    pub fn fail_start(self, error: ProviderError) -> Self {
        self.start_failures.lock().unwrap().push_back(error);
        self
    }

    pub fn starts(&self) -> usize {
        *self.starts.lock().unwrap()
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn start(
        &self,
        _format: AudioFormat,
    ) -> Result<Box<dyn RecognitionSession>, ProviderError> {
        *self.starts.lock().unwrap() += 1;
        if self.hang_on_start {
            std::future::pending::<()>().await;
        }
        if let Some(error) = self.start_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(ScriptedSession {
            utterances: Arc::clone(&self.utterances),
            tx,
            rx: Some(rx),
            partial_sent: false,
        }))
    }
}

type TranscriptResult = Result<TranscriptEvent, ProviderError>;

struct ScriptedSession {
    utterances: Arc<Mutex<VecDeque<String>>>,
    tx: mpsc::UnboundedSender<TranscriptResult>,
    rx: Option<mpsc::UnboundedReceiver<TranscriptResult>>,
    partial_sent: bool,
}

#[async_trait]
impl RecognitionSession for ScriptedSession {
    fn events(&mut self) -> EventStream<TranscriptEvent> {
        let mut rx = self.rx.take().expect("events taken once");
        Box::pin(stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        })
    }

    async fn feed(&mut self, _frame: &AudioFrame) -> Result<(), ProviderError> {
        if !self.partial_sent {
            self.partial_sent = true;
            let first_word = self
                .utterances
                .lock()
                .unwrap()
                .front()
                .and_then(|u| u.split_whitespace().next().map(ToString::to_string))
                .unwrap_or_default();
            let _ = self.tx.send(Ok(TranscriptEvent::Partial(first_word)));
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), ProviderError> {
        let text = self
            .utterances
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let _ = self.tx.send(Ok(TranscriptEvent::Final(text)));
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Generator
// ----------------------------------------------------------------------

pub enum Reply {
    Tokens(Vec<&'static str>),
    Fail(ProviderError),
    /// Yields its tokens, then never completes.
    Stall(Vec<&'static str>),
    /// Never produces anything.
    Silent,
}

#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<GenerationRequest>>,
    resumable: bool,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    pub fn resumable(mut self) -> Self {
        self.resumable = true;
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<EventStream<GenerationEvent>, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Tokens(vec!["Okay. "]));

        match reply {
            Reply::Fail(error) => Err(error),
            Reply::Silent => Ok(Box::pin(futures_util::stream::pending::<
                Result<GenerationEvent, ProviderError>,
            >())),
            Reply::Tokens(tokens) => Ok(Box::pin(stream! {
                for token in tokens {
                    sleep(Duration::from_millis(5)).await;
                    yield Ok::<_, ProviderError>(GenerationEvent::Token(token.to_string()));
                }
                yield Ok(GenerationEvent::Completed);
            })),
            Reply::Stall(tokens) => Ok(Box::pin(stream! {
                for token in tokens {
                    sleep(Duration::from_millis(5)).await;
                    yield Ok::<_, ProviderError>(GenerationEvent::Token(token.to_string()));
                }
                std::future::pending::<()>().await;
            })),
        }
    }

    fn supports_resume(&self) -> bool {
        self.resumable
    }
}

// ----------------------------------------------------------------------
// Synthesizer
// ----------------------------------------------------------------------

/// Produces `chunks` audio buffers per request, one every `pace`.
pub struct ScriptedSynthesizer {
    chunks: usize,
    pace: Duration,
    failures: Mutex<VecDeque<ProviderError>>,
    requests: Mutex<Vec<SynthesisRequest>>,
}

impl ScriptedSynthesizer {
    pub fn new(chunks: usize, pace: Duration) -> Self {
        Self {
            chunks,
            pace,
            failures: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next(self, error: ProviderError) -> Self {
        self.failures.lock().unwrap().push_back(error);
        self
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn synthesize(
        &self,
        request: SynthesisRequest,
    ) -> Result<EventStream<SynthesisEvent>, ProviderError> {
        let sample_rate = request.sample_rate;
        self.requests.lock().unwrap().push(request);
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let chunks = self.chunks;
        let pace = self.pace;
        Ok(Box::pin(stream! {
            for _ in 0..chunks {
                sleep(pace).await;
                yield Ok::<_, ProviderError>(SynthesisEvent::Audio(SynthesizedAudio {
                    samples: vec![0.1; 240],
                    sample_rate,
                }));
            }
            yield Ok(SynthesisEvent::Completed);
        }))
    }
}

// ----------------------------------------------------------------------
// Output and persistence
// ----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum OutputCall {
    Play(TurnId),
    Flush,
    Reconfigure(QualityDirective),
}

#[derive(Default)]
pub struct RecordingOutput {
    calls: Mutex<Vec<OutputCall>>,
}

impl RecordingOutput {
    pub fn calls(&self) -> Vec<OutputCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl AudioOutput for RecordingOutput {
    fn play(&self, chunk: PlaybackChunk) {
        self.calls.lock().unwrap().push(OutputCall::Play(chunk.turn_id));
    }

    fn flush(&self) {
        self.calls.lock().unwrap().push(OutputCall::Flush);
    }

    fn reconfigure(&self, directive: &QualityDirective) {
        self.calls
            .lock()
            .unwrap()
            .push(OutputCall::Reconfigure(*directive));
    }
}

#[derive(Default)]
pub struct RecordingSink {
    turns: Mutex<Vec<Turn>>,
}

impl RecordingSink {
    pub fn turns(&self) -> Vec<Turn> {
        self.turns.lock().unwrap().clone()
    }
}

impl TurnSink for RecordingSink {
    fn turn_committed(&self, turn: &Turn) {
        self.turns.lock().unwrap().push(turn.clone());
    }
}

// ----------------------------------------------------------------------
// Driver
// ----------------------------------------------------------------------

pub struct Rig {
    pub recognizer: Arc<ScriptedRecognizer>,
    pub generator: Arc<ScriptedGenerator>,
    pub synthesizer: Arc<ScriptedSynthesizer>,
    pub output: Arc<RecordingOutput>,
    pub sink: Arc<RecordingSink>,
}

impl Rig {
    pub fn new(
        recognizer: ScriptedRecognizer,
        generator: ScriptedGenerator,
        synthesizer: ScriptedSynthesizer,
    ) -> Self {
        Self {
            recognizer: Arc::new(recognizer),
            generator: Arc::new(generator),
            synthesizer: Arc::new(synthesizer),
            output: Arc::new(RecordingOutput::default()),
            sink: Arc::new(RecordingSink::default()),
        }
    }

    pub fn providers(&self) -> EngineProviders {
        EngineProviders::new(
            self.recognizer.clone(),
            self.generator.clone(),
            self.synthesizer.clone(),
        )
        .with_output(self.output.clone())
        .with_turn_sink(self.sink.clone())
    }

    pub fn start(&self, config: EngineConfig) -> Session {
        let engine = ConversationEngine::new(config, self.providers()).unwrap();
        Session::spawn(engine)
    }
}

/// A running engine plus everything it has emitted so far.
pub struct Session {
    pub handle: EngineHandle,
    pub task: JoinHandle<Result<(), EngineError>>,
    events: broadcast::Receiver<EngineEvent>,
    pub seen: Vec<EngineEvent>,
}

impl Session {
    pub fn spawn(engine: ConversationEngine) -> Self {
        let (handle, task) = engine.spawn();
        let events = handle.subscribe();
        Self {
            handle,
            task,
            events,
            seen: Vec::new(),
        }
    }

    pub fn collect(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
    }

    /// Push `duration` worth of frames in real-time pacing.
    pub async fn feed(&mut self, amplitude: f32, duration: Duration) {
        let frames = duration.as_millis() / FRAME.as_millis();
        for _ in 0..frames {
            let _ = self.handle.push_frame(frame(amplitude));
            sleep(FRAME).await;
            self.collect();
        }
    }

    /// Keep pushing frames until an event matching `pred` shows up, or give
    /// up after `limit`.
    pub async fn feed_until(
        &mut self,
        amplitude: f32,
        limit: Duration,
        pred: impl Fn(&EngineEvent) -> bool,
    ) -> bool {
        let start = self.seen.len();
        let frames = limit.as_millis() / FRAME.as_millis();
        for _ in 0..frames {
            let _ = self.handle.push_frame(frame(amplitude));
            sleep(FRAME).await;
            self.collect();
            if self.seen[start..].iter().any(&pred) {
                return true;
            }
        }
        false
    }

    /// Speak for `speech`, then stay silent until the engine is idle again.
    pub async fn utterance(&mut self, speech: Duration) -> bool {
        self.feed(LOUD, speech).await;
        self.feed_until(SILENCE, Duration::from_secs(10), |e| {
            matches!(
                e,
                EngineEvent::StateChanged {
                    to: parley_core::TurnState::Idle,
                    ..
                }
            )
        })
        .await
    }

    pub fn count(&self, pred: impl Fn(&EngineEvent) -> bool) -> usize {
        self.seen.iter().filter(|e| pred(e)).count()
    }

    pub fn has(&self, pred: impl Fn(&EngineEvent) -> bool) -> bool {
        self.count(pred) > 0
    }

    pub fn transitions(&self) -> Vec<(parley_core::TurnState, parley_core::TurnState)> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                EngineEvent::StateChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    pub async fn finish(self) -> (Vec<EngineEvent>, Result<(), EngineError>) {
        let Self {
            handle,
            task,
            mut events,
            mut seen,
        } = self;
        handle.stop();
        let result = task.await.expect("engine task panicked");
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        (seen, result)
    }
}
