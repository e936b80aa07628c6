//! Conversation records backing an agent-execution step.
//!
//! `StepMessage` rows are totally ordered by `sequence_number` within a step.
//! A `Tool` message must reference a `tool_call_id` announced by an earlier
//! assistant message of the same step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::chat::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry in the conversation backing an `AGENT_EXECUTION` step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMessage {
    pub id: Uuid,
    pub step_id: Uuid,
    pub org_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    /// Strict total order within the step; assigned by the message store.
    pub sequence_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub created_at: DateTime<Utc>,
}

impl StepMessage {
    pub fn new(step_id: Uuid, org_id: Uuid, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            step_id,
            org_id,
            role,
            content: content.into(),
            sequence_number: 0,
            tool_call_id: None,
            tool_calls: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn tool_result(
        step_id: Uuid,
        org_id: Uuid,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(step_id, org_id, MessageRole::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }
}

/// A tool invocation requested by the LLM, persisted per step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub step_id: Uuid,
    pub org_id: Uuid,
    pub tool_name: String,
    pub input: Value,
    pub is_platform_tool: bool,
    pub is_agent_call: bool,
    pub created_at: DateTime<Utc>,
}

impl ToolCallRecord {
    /// Exactly one of platform / agent / external applies; external is the
    /// case where both flags are false.
    pub fn is_external(&self) -> bool {
        !self.is_platform_tool && !self.is_agent_call
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_carries_call_id() {
        let msg = StepMessage::tool_result(Uuid::new_v4(), Uuid::new_v4(), "call_1", "ok");
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn tool_call_record_kind_partition() {
        let mut rec = ToolCallRecord {
            id: "c1".into(),
            step_id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            tool_name: "web_search".into(),
            input: serde_json::json!({}),
            is_platform_tool: false,
            is_agent_call: false,
            created_at: Utc::now(),
        };
        assert!(rec.is_external());
        rec.is_platform_tool = true;
        assert!(!rec.is_external());
    }

    #[test]
    fn role_wire_names() {
        assert_eq!(
            serde_json::to_string(&MessageRole::Assistant).unwrap(),
            "\"ASSISTANT\""
        );
    }
}
