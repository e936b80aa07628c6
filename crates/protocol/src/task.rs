//! A2A tasks — the externally visible handle over one top-level request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::{A2aMessage, Part};

/// External task states. The scheduler projects the internal run lattice
/// onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    AuthRequired,
    Completed,
    Failed,
    Canceled,
    Rejected,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::Rejected
        )
    }
}

/// Current status of a task, with an optional human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<A2aMessage>,
    pub timestamp: DateTime<Utc>,
}

impl TaskStatus {
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            message: None,
            timestamp: Utc::now(),
        }
    }
}

/// A named output produced by a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "artifactId")]
    pub artifact_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub parts: Vec<Part>,
}

/// An A2A task (`kind: "task"`). `id` equals the backing run's root step id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2aTask {
    /// Always `"task"`.
    pub kind: String,
    pub id: String,
    #[serde(rename = "contextId")]
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<A2aMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl A2aTask {
    pub fn new(id: impl Into<String>, context_id: impl Into<String>, state: TaskState) -> Self {
        Self {
            kind: "task".into(),
            id: id.into(),
            context_id: context_id.into(),
            status: TaskStatus::new(state),
            artifacts: Vec::new(),
            history: Vec::new(),
            metadata: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_kebab_wire_names() {
        assert_eq!(
            serde_json::to_string(&TaskState::InputRequired).unwrap(),
            "\"input-required\""
        );
        assert_eq!(
            serde_json::to_string(&TaskState::AuthRequired).unwrap(),
            "\"auth-required\""
        );
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Rejected.is_terminal());
        assert!(!TaskState::Working.is_terminal());
        assert!(!TaskState::InputRequired.is_terminal());
    }

    #[test]
    fn task_wire_shape() {
        let task = A2aTask::new("t-1", "ctx-1", TaskState::Submitted);
        let wire = serde_json::to_value(&task).unwrap();
        assert_eq!(wire["kind"], "task");
        assert_eq!(wire["contextId"], "ctx-1");
        assert_eq!(wire["status"]["state"], "submitted");
        // Empty collections stay off the wire.
        assert!(wire.get("artifacts").is_none());
        assert!(wire.get("history").is_none());
    }

    #[test]
    fn task_round_trip_with_history() {
        let mut task = A2aTask::new("t-1", "ctx-1", TaskState::Completed);
        task.history.push(A2aMessage::agent_text("m1", "done"));
        task.artifacts.push(Artifact {
            artifact_id: "a1".into(),
            name: Some("result".into()),
            parts: vec![Part::text("42")],
        });
        let back: A2aTask =
            serde_json::from_str(&serde_json::to_string(&task).unwrap()).unwrap();
        assert_eq!(back.history.len(), 1);
        assert_eq!(back.artifacts[0].parts[0].as_text(), Some("42"));
    }
}
