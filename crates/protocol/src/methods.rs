//! Method names and parameter shapes of the A2A JSON-RPC surface.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::A2aMessage;

/// Method names. Both personas expose exactly this set.
pub mod methods {
    pub const MESSAGE_SEND: &str = "message/send";
    pub const MESSAGE_STREAM: &str = "message/stream";
    pub const TASKS_GET: &str = "tasks/get";
    pub const TASKS_CANCEL: &str = "tasks/cancel";
    pub const TASKS_RESUBSCRIBE: &str = "tasks/resubscribe";
}

/// Params of `message/send` and `message/stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSendParams {
    pub message: A2aMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<SendConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendConfiguration {
    /// When true, `message/send` waits for the run to reach a terminal
    /// state before answering (bounded by the step timeout).
    #[serde(default)]
    pub blocking: bool,
}

/// Params of `tasks/get`, `tasks/cancel`, and `tasks/resubscribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskIdParams {
    pub id: String,
}

impl MessageSendParams {
    /// The target agent name: `metadata.agent` on the params, falling back
    /// to `metadata.agent` on the message itself.
    pub fn agent_name(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("agent"))
            .and_then(Value::as_str)
            .or_else(|| self.message.metadata_str("agent"))
    }
}
