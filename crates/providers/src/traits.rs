use shaman_domain::chat::{ChatMessage, ToolCall, ToolDefinition};
use shaman_domain::error::Result;
use shaman_domain::stream::{BoxStream, CompletionChunk, FinishReason, Usage};

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the model may use the offered tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

/// A provider-agnostic completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// The conversation messages to send.
    pub messages: Vec<ChatMessage>,
    /// Model identifier; routed by the registry.
    pub model: String,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
}

/// A provider-agnostic completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Textual content, absent when the model only called tools.
    pub content: Option<String>,
    /// Tool calls emitted by the model.
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every LLM adapter must implement.
///
/// Errors follow the shared taxonomy: `RateLimited` and
/// `ProviderUnavailable` are retryable by the caller with backoff,
/// `InvalidRequest` is fatal.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a completion request and wait for the full response.
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse>;

    /// Send a completion request and return a finite, non-restartable
    /// stream of chunks.
    async fn stream(
        &self,
        req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<CompletionChunk>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_choice_wire_names() {
        assert_eq!(serde_json::to_string(&ToolChoice::Auto).unwrap(), "\"auto\"");
        assert_eq!(
            serde_json::to_string(&ToolChoice::Required).unwrap(),
            "\"required\""
        );
    }
}
