//! Language-model text generation port.

use async_trait::async_trait;

use super::EventStream;
use crate::domain::ContextMessage;
use crate::error::ProviderError;

/// A request to continue the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Context, oldest first, system context (if any) leading.
    pub messages: Vec<ContextMessage>,

    /// Text the assistant already produced before a pause. Only set when the
    /// generator reports [`TextGenerator::supports_resume`].
    pub resume_from: Option<String>,

    /// Whether heavyweight on-device inference is currently allowed.
    pub allow_local_inference: bool,

    /// Token budget for this generation.
    pub max_tokens: usize,
}

/// Output of a generation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// A text fragment, in order.
    Token(String),
    /// The model finished. Terminal.
    Completed,
}

/// Streaming text generator.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Start a generation.
    ///
    /// Dropping the returned stream cancels the generation.
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<EventStream<GenerationEvent>, ProviderError>;

    /// Whether the generator can continue from a `resume_from` prefix.
    fn supports_resume(&self) -> bool {
        false
    }
}
