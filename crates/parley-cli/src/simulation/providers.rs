use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use parley_core::{
    AudioFormat, AudioFrame, AudioOutput, CapabilitySignalProvider, EventStream, GenerationEvent,
    GenerationRequest, MessageRole, PlaybackChunk, ProviderError, QualityDirective,
    RecognitionSession, RuntimeSignals, SpeechRecognizer, SpeechSynthesizer, SynthesisEvent,
    SynthesisRequest, SynthesizedAudio, TextGenerator, ThermalLevel, TranscriptEvent, Turn,
    TurnSink,
};
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tracing::{debug, warn};

use crate::error::CliError;

/// Reply used once the script runs out.
const FALLBACK_REPLY: &str = "Sorry, I have nothing more to say.";

// ── Recognition ────────────────────────────────────────────────────

/// Recognizer that returns the scripted utterances in order, one per
/// finalized session.
pub struct ScriptedRecognizer {
    utterances: Arc<AsyncMutex<VecDeque<String>>>,
}

impl ScriptedRecognizer {
    pub fn new(utterances: &[String]) -> Self {
        Self {
            utterances: Arc::new(AsyncMutex::new(utterances.iter().cloned().collect())),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn start(
        &self,
        format: AudioFormat,
    ) -> Result<Box<dyn RecognitionSession>, ProviderError> {
        debug!(sample_rate = format.sample_rate, "Simulated recognition session opened");
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(ScriptedSession {
            utterances: Arc::clone(&self.utterances),
            tx,
            rx: Some(rx),
            fed: 0,
        }))
    }
}

struct ScriptedSession {
    utterances: Arc<AsyncMutex<VecDeque<String>>>,
    tx: mpsc::UnboundedSender<TranscriptEvent>,
    rx: Option<mpsc::UnboundedReceiver<TranscriptEvent>>,
    fed: usize,
}

#[async_trait]
impl RecognitionSession for ScriptedSession {
    fn events(&mut self) -> EventStream<TranscriptEvent> {
        let rx = self.rx.take();
        Box::pin(stream! {
            if let Some(mut rx) = rx {
                while let Some(event) = rx.recv().await {
                    let terminal = matches!(event, TranscriptEvent::Final(_));
                    yield Ok::<_, ProviderError>(event);
                    if terminal {
                        break;
                    }
                }
            }
        })
    }

    async fn feed(&mut self, _frame: &AudioFrame) -> Result<(), ProviderError> {
        self.fed += 1;
        // Reveal one more word every ten frames (200 ms at 20 ms frames)
        if self.fed % 10 == 0 {
            let utterances = self.utterances.lock().await;
            if let Some(next) = utterances.front() {
                let words = self.fed / 10;
                let partial: Vec<&str> = next.split_whitespace().take(words).collect();
                let _ = self.tx.send(TranscriptEvent::Partial(partial.join(" ")));
            }
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), ProviderError> {
        let text = self.utterances.lock().await.pop_front().unwrap_or_default();
        let _ = self.tx.send(TranscriptEvent::Final(text));
        Ok(())
    }
}

// ── Generation ─────────────────────────────────────────────────────

struct ReplyBook {
    pending: VecDeque<String>,
    /// Replies already handed out, keyed by the user message they answer, so
    /// a restarted generation repeats itself instead of skipping ahead.
    answered: HashMap<String, String>,
}

/// Generator that streams the scripted replies word by word.
pub struct ScriptedGenerator {
    book: AsyncMutex<ReplyBook>,
    token_delay: Duration,
}

impl ScriptedGenerator {
    pub fn new(replies: &[String], token_delay: Duration) -> Self {
        Self {
            book: AsyncMutex::new(ReplyBook {
                pending: replies.iter().cloned().collect(),
                answered: HashMap::new(),
            }),
            token_delay,
        }
    }

    async fn reply_to(&self, prompt: &str) -> String {
        let mut book = self.book.lock().await;
        if let Some(reply) = book.answered.get(prompt) {
            return reply.clone();
        }
        let reply = book
            .pending
            .pop_front()
            .unwrap_or_else(|| FALLBACK_REPLY.to_string());
        book.answered.insert(prompt.to_string(), reply.clone());
        reply
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<EventStream<GenerationEvent>, ProviderError> {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let reply = self.reply_to(&prompt).await;
        debug!(
            messages = request.messages.len(),
            max_tokens = request.max_tokens,
            "Simulated generation started"
        );

        let tokens: Vec<String> = reply.split_inclusive(' ').map(str::to_string).collect();
        let delay = self.token_delay;
        Ok(Box::pin(stream! {
            for token in tokens {
                tokio::time::sleep(delay).await;
                yield Ok::<_, ProviderError>(GenerationEvent::Token(token));
            }
            yield Ok(GenerationEvent::Completed);
        }))
    }
}

// ── Synthesis ──────────────────────────────────────────────────────

/// Synthesizer that produces one block of silent audio per word, paced in
/// real time.
pub struct ScriptedSynthesizer {
    per_word: Duration,
}

impl ScriptedSynthesizer {
    pub const fn new(per_word: Duration) -> Self {
        Self { per_word }
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn synthesize(
        &self,
        request: SynthesisRequest,
    ) -> Result<EventStream<SynthesisEvent>, ProviderError> {
        let words = request.text.split_whitespace().count().max(1);
        let per_word = self.per_word;
        let sample_rate = request.sample_rate;
        let samples_per_word =
            usize::try_from(u128::from(sample_rate) * per_word.as_millis() / 1_000).unwrap_or(0);

        Ok(Box::pin(stream! {
            for _ in 0..words {
                tokio::time::sleep(per_word).await;
                yield Ok::<_, ProviderError>(SynthesisEvent::Audio(SynthesizedAudio {
                    samples: vec![0.0; samples_per_word],
                    sample_rate,
                }));
            }
            yield Ok(SynthesisEvent::Completed);
        }))
    }
}

// ── Playback ───────────────────────────────────────────────────────

/// Playback adapter that only keeps count of what it was asked to play.
#[derive(Debug, Default)]
pub struct ConsoleOutput {
    played_ms: AtomicU64,
    chunks: AtomicU64,
    flushes: AtomicU64,
}

impl ConsoleOutput {
    /// Milliseconds of audio handed to playback.
    pub fn played(&self) -> Duration {
        Duration::from_millis(self.played_ms.load(Ordering::Relaxed))
    }

    pub fn chunks(&self) -> u64 {
        self.chunks.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl AudioOutput for ConsoleOutput {
    fn play(&self, chunk: PlaybackChunk) {
        let ms = chunk.samples.len() as u64 * 1_000 / u64::from(chunk.sample_rate.max(1));
        self.played_ms.fetch_add(ms, Ordering::Relaxed);
        self.chunks.fetch_add(1, Ordering::Relaxed);
        debug!(sequence = chunk.sequence, turn_id = %chunk.turn_id, ms, "Playback chunk queued");
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        debug!("Playback flushed");
    }

    fn reconfigure(&self, directive: &QualityDirective) {
        debug!(
            tier = ?directive.tier,
            sample_rate = directive.sample_rate,
            buffer_size = directive.buffer_size,
            "Playback reconfigured"
        );
    }
}

// ── Signals ────────────────────────────────────────────────────────

/// Signal provider whose thermal level is set by the script.
pub struct ScriptedSignals {
    thermal: watch::Receiver<ThermalLevel>,
}

impl ScriptedSignals {
    pub const fn new(thermal: watch::Receiver<ThermalLevel>) -> Self {
        Self { thermal }
    }
}

#[async_trait]
impl CapabilitySignalProvider for ScriptedSignals {
    async fn sample(&self) -> Result<RuntimeSignals, ProviderError> {
        Ok(RuntimeSignals {
            thermal: *self.thermal.borrow(),
            ..RuntimeSignals::default()
        })
    }
}

// ── Persistence ────────────────────────────────────────────────────

/// Appends committed turns to a file, one JSON object per line.
pub struct JsonlTurnSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlTurnSink {
    pub fn create(path: &Path) -> Result<Self, CliError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| CliError::Io(format!("{}: {e}", path.display())))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl TurnSink for JsonlTurnSink {
    fn turn_committed(&self, turn: &Turn) {
        let Ok(mut writer) = self.writer.lock() else {
            warn!("Transcript writer poisoned, turn not persisted");
            return;
        };
        let written = serde_json::to_writer(&mut *writer, turn)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());
        if let Err(e) = written {
            warn!(error = %e, turn_id = %turn.id(), "Failed to persist turn");
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use parley_core::{ContextMessage, Speaker};

    use super::*;

    async fn collect<T>(stream: EventStream<T>) -> Vec<T> {
        stream.map(|item| item.unwrap()).collect().await
    }

    fn request(user: &str) -> GenerationRequest {
        GenerationRequest {
            messages: vec![ContextMessage::new(MessageRole::User, user)],
            resume_from: None,
            allow_local_inference: true,
            max_tokens: 64,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn generator_streams_words_and_repeats_on_restart() {
        let generator = ScriptedGenerator::new(
            &["Hello there. Bye.".to_string(), "Second.".to_string()],
            Duration::from_millis(10),
        );

        let first = collect(generator.generate(request("hi")).await.unwrap()).await;
        assert_eq!(
            first,
            vec![
                GenerationEvent::Token("Hello ".to_string()),
                GenerationEvent::Token("there. ".to_string()),
                GenerationEvent::Token("Bye.".to_string()),
                GenerationEvent::Completed,
            ]
        );

        // Same prompt again (a restart) gets the same reply
        let again = collect(generator.generate(request("hi")).await.unwrap()).await;
        assert_eq!(again, first);

        let next = collect(generator.generate(request("and?")).await.unwrap()).await;
        assert_eq!(next[0], GenerationEvent::Token("Second.".to_string()));

        let exhausted = collect(generator.generate(request("more?")).await.unwrap()).await;
        assert_eq!(exhausted.len(), FALLBACK_REPLY.split(' ').count() + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recognizer_finalizes_with_the_next_utterance() {
        let recognizer = ScriptedRecognizer::new(&["turn on the lights".to_string()]);
        let mut session = recognizer.start(AudioFormat::default()).await.unwrap();
        let events = session.events();

        let frame = AudioFrame::new(vec![0.0; 320], AudioFormat::default());
        for _ in 0..20 {
            session.feed(&frame).await.unwrap();
        }
        session.finalize().await.unwrap();

        let events = collect(events).await;
        assert_eq!(
            events,
            vec![
                TranscriptEvent::Partial("turn".to_string()),
                TranscriptEvent::Partial("turn on".to_string()),
                TranscriptEvent::Final("turn on the lights".to_string()),
            ]
        );

        // Script exhausted: the next utterance is blank
        let mut session = recognizer.start(AudioFormat::default()).await.unwrap();
        let events = session.events();
        session.finalize().await.unwrap();
        assert_eq!(
            collect(events).await,
            vec![TranscriptEvent::Final(String::new())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn synthesizer_emits_audio_per_word() {
        let synthesizer = ScriptedSynthesizer::new(Duration::from_millis(100));
        let events = collect(
            synthesizer
                .synthesize(SynthesisRequest {
                    text: "Two words.".to_string(),
                    sample_rate: 16_000,
                })
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(events.len(), 3);
        let SynthesisEvent::Audio(audio) = &events[0] else {
            panic!("expected audio first");
        };
        assert_eq!(audio.samples.len(), 1_600);
        assert_eq!(events[2], SynthesisEvent::Completed);
    }

    #[test]
    fn console_output_accumulates_played_audio() {
        let output = ConsoleOutput::default();
        output.play(PlaybackChunk {
            sequence: 1,
            turn_id: parley_core::TurnId::new(),
            samples: vec![0.0; 24_000],
            sample_rate: 24_000,
        });
        output.flush();

        assert_eq!(output.played(), Duration::from_secs(1));
        assert_eq!(output.chunks(), 1);
        assert_eq!(output.flushes(), 1);
    }

    #[test]
    fn transcript_sink_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("turns.jsonl");
        let sink = Arc::new(JsonlTurnSink::create(&path).unwrap());

        sink.turn_committed(&Turn::from_text(Speaker::User, "hello"));
        sink.turn_committed(&Turn::from_text(Speaker::System, "Hi."));

        let contents = std::fs::read_to_string(&path).unwrap();
        let turns: Vec<Turn> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].text(), "Hi.");
    }
}
