//! Uniform tool results and the external tool-invoker seam.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Which router branch served a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Platform,
    Agent,
    External,
}

/// The uniform result every tool dispatch produces, regardless of branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub kind: ToolKind,
}

impl ToolResult {
    pub fn ok(kind: ToolKind, output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            kind,
        }
    }

    pub fn err(kind: ToolKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            kind,
        }
    }

    /// Render the result as the content of a TOOL message.
    pub fn to_tool_content(&self) -> String {
        if self.success {
            self.output
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "null".into())
        } else {
            format!(
                "error: {}",
                self.error.as_deref().unwrap_or("unknown tool error")
            )
        }
    }
}

/// Seam to externally-hosted (MCP) tools. The transport behind it is an
/// external collaborator; the core only consumes this interface.
#[async_trait::async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invoke `tool` on `server` with JSON-shaped arguments.
    async fn invoke(&self, server: &str, tool: &str, arguments: Value) -> Result<Value>;

    /// Tool names advertised by `server`, used for first-match routing.
    async fn list_tools(&self, server: &str) -> Result<Vec<String>>;
}
