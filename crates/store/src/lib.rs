//! Persistence gateway — tenant-scoped access to runs, steps, messages,
//! tool calls, and run-data.
//!
//! Every operation takes an explicit `org_id` and applies it as a predicate
//! on both reads and writes. Reads that touch another tenant's row answer
//! `NotFound` (indistinguishable from absence, preventing enumeration);
//! writes answer `TenantMismatch`, which is fatal and never retried.

mod messages;
mod rundata;
mod runs;
mod steps;
mod tool_calls;

pub use messages::MessageStore;
pub use rundata::{RunDataPage, RunDataStore};
pub use runs::RunStore;
pub use steps::StepStore;
pub use tool_calls::ToolCallStore;

use std::sync::Arc;

/// The single entry point handed to the scheduler and workers.
#[derive(Clone)]
pub struct StoreGateway {
    pub runs: Arc<RunStore>,
    pub steps: Arc<StepStore>,
    pub messages: Arc<MessageStore>,
    pub tool_calls: Arc<ToolCallStore>,
    pub run_data: Arc<RunDataStore>,
}

impl StoreGateway {
    pub fn in_memory() -> Self {
        Self {
            runs: Arc::new(RunStore::new()),
            steps: Arc::new(StepStore::new()),
            messages: Arc::new(MessageStore::new()),
            tool_calls: Arc::new(ToolCallStore::new()),
            run_data: Arc::new(RunDataStore::new()),
        }
    }
}
