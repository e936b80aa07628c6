use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// The reason a completion stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// Chunks emitted during LLM streaming (provider-agnostic).
///
/// The sequence is finite and non-restartable; adapters must emit a terminal
/// `Finish` chunk exactly once.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum CompletionChunk {
    /// A text token chunk.
    #[serde(rename = "content")]
    Content { text: String },

    /// Incremental tool-call data. `index` groups fragments of the same
    /// call; `id` and `name` arrive on the first fragment, `arguments`
    /// accumulates as a JSON string across fragments.
    #[serde(rename = "tool_call")]
    ToolCallDelta {
        index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        function: ToolCallFunction,
    },

    /// Stream is finished.
    #[serde(rename = "finish")]
    Finish {
        reason: FinishReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub arguments: String,
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.add(&Usage { prompt_tokens: 10, completion_tokens: 5 });
        total.add(&Usage { prompt_tokens: 7, completion_tokens: 3 });
        assert_eq!(total.prompt_tokens, 17);
        assert_eq!(total.completion_tokens, 8);
        assert_eq!(total.total(), 25);
    }

    #[test]
    fn finish_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&FinishReason::ToolCalls).unwrap(),
            "\"tool_calls\""
        );
        assert_eq!(
            serde_json::to_string(&FinishReason::ContentFilter).unwrap(),
            "\"content_filter\""
        );
    }

    #[test]
    fn chunk_tagged_serialization() {
        let chunk = CompletionChunk::Content { text: "hi".into() };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains("\"type\":\"content\""));
    }
}
