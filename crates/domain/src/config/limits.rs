use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum step depth from the root along parent links.
    #[serde(default = "d_max_depth")]
    pub max_depth: u32,
    /// Per-step wall-clock timeout. On expiry the scheduler marks the
    /// step failed and signals cancel.
    #[serde(default = "d_step_timeout_ms")]
    pub step_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_depth: d_max_depth(),
            step_timeout_ms: d_step_timeout_ms(),
        }
    }
}

fn d_max_depth() -> u32 {
    10
}
fn d_step_timeout_ms() -> u64 {
    600_000
}
