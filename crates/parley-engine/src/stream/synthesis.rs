//! Synthesis stream: one text chunk in, ordered audio out.

use std::sync::Arc;

use futures_util::StreamExt;
use parley_core::{SpeechSynthesizer, Stage, SynthesisEvent, SynthesisRequest};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{StageMessage, StagePayload, StreamHandle, StreamTimeouts, Tagger, until_cancelled};

/// Wrapper around a [`SpeechSynthesizer`].
///
/// One stream per text chunk; the coordinator starts the successor when the
/// previous one completes, so audio stays in text order.
pub struct SynthesisStream {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    inbox: mpsc::UnboundedSender<StageMessage>,
    timeouts: StreamTimeouts,
    next_seq: u64,
}

impl SynthesisStream {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        inbox: mpsc::UnboundedSender<StageMessage>,
        timeouts: StreamTimeouts,
    ) -> Self {
        Self {
            synthesizer,
            inbox,
            timeouts,
            next_seq: 0,
        }
    }

    pub fn start(&mut self, request: SynthesisRequest, generation: u64) -> StreamHandle {
        self.next_seq += 1;
        let handle = StreamHandle::new(Stage::Synthesis, self.next_seq, generation);

        debug!(
            seq = handle.seq(),
            generation,
            chars = request.text.len(),
            "Starting synthesis stream"
        );

        tokio::spawn(pump(
            Arc::clone(&self.synthesizer),
            request,
            self.inbox.clone(),
            handle.tagger(),
            handle.token(),
            self.timeouts,
        ));

        handle
    }
}

async fn pump(
    synthesizer: Arc<dyn SpeechSynthesizer>,
    request: SynthesisRequest,
    inbox: mpsc::UnboundedSender<StageMessage>,
    tagger: Tagger,
    token: CancellationToken,
    timeouts: StreamTimeouts,
) {
    let send = |payload| {
        let _ = inbox.send(tagger.message(payload));
    };

    let setup = timeout(timeouts.setup, synthesizer.synthesize(request));
    let Some(started) = until_cancelled(&token, setup).await else {
        return;
    };
    let mut events = match started {
        Ok(Ok(events)) => events,
        Ok(Err(e)) => return send(StagePayload::Failed(e)),
        Err(_) => return send(StagePayload::SetupTimedOut),
    };

    while let Some(event) = until_cancelled(&token, events.next()).await {
        match event {
            Some(Ok(SynthesisEvent::Audio(audio))) => send(StagePayload::Audio(audio)),
            Some(Ok(SynthesisEvent::Completed)) | None => return send(StagePayload::Completed),
            Some(Err(e)) => return send(StagePayload::Failed(e)),
        }
    }
}
