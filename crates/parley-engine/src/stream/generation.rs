//! Generation stream: conversation context in, text tokens out.

use std::sync::Arc;

use futures_util::StreamExt;
use parley_core::{GenerationEvent, GenerationRequest, Stage, TextGenerator};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{StageMessage, StagePayload, StreamHandle, StreamTimeouts, Tagger, until_cancelled};

/// Wrapper around a [`TextGenerator`].
pub struct GenerationStream {
    generator: Arc<dyn TextGenerator>,
    inbox: mpsc::UnboundedSender<StageMessage>,
    timeouts: StreamTimeouts,
    next_seq: u64,
}

impl GenerationStream {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        inbox: mpsc::UnboundedSender<StageMessage>,
        timeouts: StreamTimeouts,
    ) -> Self {
        Self {
            generator,
            inbox,
            timeouts,
            next_seq: 0,
        }
    }

    /// Whether the underlying generator can continue from a text prefix.
    pub fn supports_resume(&self) -> bool {
        self.generator.supports_resume()
    }

    /// Start generating in the background. Cancel through the handle;
    /// dropping the provider stream stops the provider.
    pub fn start(&mut self, request: GenerationRequest, generation: u64) -> StreamHandle {
        self.next_seq += 1;
        let handle = StreamHandle::new(Stage::Generation, self.next_seq, generation);

        debug!(
            seq = handle.seq(),
            generation,
            messages = request.messages.len(),
            resume = request.resume_from.is_some(),
            "Starting generation stream"
        );

        tokio::spawn(pump(
            Arc::clone(&self.generator),
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
    generator: Arc<dyn TextGenerator>,
    request: GenerationRequest,
    inbox: mpsc::UnboundedSender<StageMessage>,
    tagger: Tagger,
    token: CancellationToken,
    timeouts: StreamTimeouts,
) {
    let send = |payload| {
        let _ = inbox.send(tagger.message(payload));
    };

    let setup = timeout(timeouts.setup, generator.generate(request));
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
            Some(Ok(GenerationEvent::Token(text))) => send(StagePayload::Token(text)),
            Some(Ok(GenerationEvent::Completed)) | None => return send(StagePayload::Completed),
            Some(Err(e)) => return send(StagePayload::Failed(e)),
        }
    }
}
