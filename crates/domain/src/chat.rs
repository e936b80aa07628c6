//! Provider-agnostic chat types.
//!
//! Every LLM adapter converts between these and its wire format. Tool
//! parameter schemas are JSON-Schema-shaped and must survive the round-trip
//! with names and types intact.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool call emitted by the model inside an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the completion request/response conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `Tool` messages: the assistant tool call being answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

// ── Convenience constructors ───────────────────────────────────────

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, text)
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, text)
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, text)
    }
    pub fn assistant_with_tools(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::plain(ChatRole::Assistant, text);
        msg.tool_calls = tool_calls;
        msg
    }
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::plain(ChatRole::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}
