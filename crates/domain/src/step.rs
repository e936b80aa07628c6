//! Step — one node in a Run's DAG.
//!
//! Steps form a tree rooted at the run's root step: `depth(child)` is always
//! `depth(parent) + 1`, bounded by the configured `max_depth`. A parent step
//! reaches a terminal state only after all of its children have.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Step type / status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    AgentExecution,
    LlmCall,
    ToolCall,
    AgentCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Queued,
    Working,
    Completed,
    Failed,
    Canceled,
    InputRequired,
    BlockedOnDependency,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Whether the step still counts against the run's completion rule.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Working | Self::BlockedOnDependency | Self::InputRequired
        )
    }
}

/// Where the executed agent definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentSource {
    Git,
    A2aExternal,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Step record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub run_id: Uuid,
    pub org_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_step_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_source: Option<AgentSource>,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Distance from the root step along parent links; 0 for the root.
    pub depth: u32,
    /// Agent call-stack carried across recursive calls
    /// (`["OrchestratorAgent", "WorkerAgent", …]`), used for circular-call
    /// refusal. Lives on the step, never in shared state.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub call_stack: Vec<String>,
}

impl Step {
    /// A root agent-execution step (depth 0, no parent).
    pub fn root(run_id: Uuid, org_id: Uuid, agent_name: impl Into<String>, input: Value) -> Self {
        Self::new(run_id, org_id, None, StepType::AgentExecution, input, 0)
            .with_agent(agent_name)
    }

    /// A child step one level below `parent`.
    pub fn child(parent: &Step, step_type: StepType, input: Value) -> Self {
        let mut step = Self::new(
            parent.run_id,
            parent.org_id,
            Some(parent.id),
            step_type,
            input,
            parent.depth + 1,
        );
        step.call_stack = parent.call_stack.clone();
        step
    }

    fn new(
        run_id: Uuid,
        org_id: Uuid,
        parent_step_id: Option<Uuid>,
        step_type: StepType,
        input: Value,
        depth: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            org_id,
            parent_step_id,
            step_type,
            status: StepStatus::Queued,
            agent_name: None,
            agent_source: None,
            input,
            output: None,
            error: None,
            tool_name: None,
            tool_call_id: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost: 0.0,
            start_time: None,
            end_time: None,
            depth,
            call_stack: Vec::new(),
        }
    }

    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self.agent_source = Some(AgentSource::Git);
        self
    }

    /// Mark the step working and stamp `start_time`.
    pub fn begin(&mut self) {
        self.status = StepStatus::Working;
        self.start_time = Some(Utc::now());
    }

    /// Move to a terminal status and stamp `end_time`.
    pub fn finish(&mut self, status: StepStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.end_time = Some(Utc::now());
    }
}
