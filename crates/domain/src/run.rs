//! Run — one top-level execution, owner of all steps and run-data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run status — the internal execution-state lattice
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Submitted,
    Working,
    InputRequired,
    BlockedOnDependency,
    /// Cancel requested; workers have not yet drained.
    Canceling,
    Completed,
    Failed,
    Canceled,
    Rejected,
}

impl RunStatus {
    /// Terminal states are absorbing — no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::Rejected
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub org_id: Uuid,
    pub status: RunStatus,
    pub initial_input: String,
    pub total_cost: f64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Run {
    pub fn new(org_id: Uuid, initial_input: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            status: RunStatus::Submitted,
            initial_input: initial_input.into(),
            total_cost: 0.0,
            total_tokens: 0,
            created_by: None,
            trace_id: None,
            start_time: Utc::now(),
            end_time: None,
            error: None,
        }
    }

    /// Move to a terminal status and stamp `end_time` atomically with it.
    /// `end_time` is set iff the status is terminal.
    pub fn finish(&mut self, status: RunStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.end_time = Some(Utc::now());
    }

    /// Wall-clock duration, available once the run is terminal.
    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds().max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!RunStatus::Submitted.is_terminal());
        assert!(!RunStatus::Working.is_terminal());
        assert!(!RunStatus::InputRequired.is_terminal());
        assert!(!RunStatus::BlockedOnDependency.is_terminal());
        assert!(!RunStatus::Canceling.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
        assert!(RunStatus::Rejected.is_terminal());
    }

    #[test]
    fn finish_sets_end_time_with_status() {
        let mut run = Run::new(Uuid::new_v4(), "hi");
        assert!(run.end_time.is_none());
        run.finish(RunStatus::Completed);
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.end_time.is_some());
        assert!(run.duration_ms().is_some());
    }

    #[test]
    fn status_screaming_snake_serialization() {
        assert_eq!(
            serde_json::to_string(&RunStatus::BlockedOnDependency).unwrap(),
            "\"BLOCKED_ON_DEPENDENCY\""
        );
        assert_eq!(
            serde_json::to_string(&RunStatus::InputRequired).unwrap(),
            "\"INPUT_REQUIRED\""
        );
    }
}
