//! Transcription stream: capture frames in, partial/final transcripts out.

use std::sync::Arc;

use futures_util::StreamExt;
use parley_core::{AudioFormat, AudioFrame, SpeechRecognizer, Stage, TranscriptEvent};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{StageMessage, StagePayload, StreamHandle, StreamTimeouts, Tagger, until_cancelled};

/// Input forwarded to the recognition session by the pump.
#[derive(Debug)]
enum SessionInput {
    Frame(AudioFrame),
    Finalize,
}

/// Handle to a running transcription stream; accepts incremental input.
#[derive(Debug)]
pub struct TranscriptionHandle {
    handle: StreamHandle,
    input: mpsc::UnboundedSender<SessionInput>,
}

impl TranscriptionHandle {
    pub const fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    pub const fn handle_mut(&mut self) -> &mut StreamHandle {
        &mut self.handle
    }

    /// Forward one frame. Never blocks; frames queue until the session is up.
    pub fn feed(&self, frame: AudioFrame) {
        if self.handle.is_running() {
            let _ = self.input.send(SessionInput::Frame(frame));
        }
    }

    /// Signal end of audio.
    pub fn finalize(&self) {
        if self.handle.is_running() {
            let _ = self.input.send(SessionInput::Finalize);
        }
    }

    /// Cancel the stream. The pump asks the provider to stop and waits at
    /// most `cancel_ack` for it.
    pub fn cancel(&mut self) {
        self.handle.cancel();
    }
}

/// Wrapper around a [`SpeechRecognizer`].
pub struct TranscriptionStream {
    recognizer: Arc<dyn SpeechRecognizer>,
    inbox: mpsc::UnboundedSender<StageMessage>,
    timeouts: StreamTimeouts,
    next_seq: u64,
}

impl TranscriptionStream {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        inbox: mpsc::UnboundedSender<StageMessage>,
        timeouts: StreamTimeouts,
    ) -> Self {
        Self {
            recognizer,
            inbox,
            timeouts,
            next_seq: 0,
        }
    }

    /// Open a recognition session in the background.
    pub fn start(&mut self, format: AudioFormat, generation: u64) -> TranscriptionHandle {
        self.next_seq += 1;
        let handle = StreamHandle::new(Stage::Transcription, self.next_seq, generation);
        let (input, input_rx) = mpsc::unbounded_channel();

        debug!(
            seq = handle.seq(),
            generation,
            sample_rate = format.sample_rate,
            "Starting transcription stream"
        );

        tokio::spawn(pump(
            Arc::clone(&self.recognizer),
            format,
            input_rx,
            self.inbox.clone(),
            handle.tagger(),
            handle.token(),
            self.timeouts,
        ));

        TranscriptionHandle { handle, input }
    }
}

async fn pump(
    recognizer: Arc<dyn SpeechRecognizer>,
    format: AudioFormat,
    mut input: mpsc::UnboundedReceiver<SessionInput>,
    inbox: mpsc::UnboundedSender<StageMessage>,
    tagger: Tagger,
    token: CancellationToken,
    timeouts: StreamTimeouts,
) {
    let send = |payload| {
        let _ = inbox.send(tagger.message(payload));
    };

    let setup = timeout(timeouts.setup, recognizer.start(format));
    let Some(started) = until_cancelled(&token, setup).await else {
        return;
    };
    let mut session = match started {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => return send(StagePayload::Failed(e)),
        Err(_) => return send(StagePayload::SetupTimedOut),
    };
    let mut events = session.events();
    let mut input_open = true;

    loop {
        tokio::select! {
            biased;

            () = token.cancelled() => {
                if timeout(timeouts.cancel_ack, session.cancel()).await.is_err() {
                    warn!(seq = tagger.seq, "Recognizer did not acknowledge cancellation in time");
                }
                return;
            }

            next = input.recv(), if input_open => match next {
                Some(SessionInput::Frame(frame)) => {
                    if let Some(Err(e)) = until_cancelled(&token, session.feed(&frame)).await {
                        return send(StagePayload::Failed(e));
                    }
                }
                Some(SessionInput::Finalize) => {
                    if let Some(Err(e)) = until_cancelled(&token, session.finalize()).await {
                        return send(StagePayload::Failed(e));
                    }
                }
                None => input_open = false,
            },

            event = events.next() => match event {
                Some(Ok(event)) => {
                    let is_final = matches!(event, TranscriptEvent::Final(_));
                    send(StagePayload::Transcript(event));
                    if is_final {
                        return;
                    }
                }
                Some(Err(e)) => return send(StagePayload::Failed(e)),
                None => return send(StagePayload::Completed),
            },
        }
    }
}
