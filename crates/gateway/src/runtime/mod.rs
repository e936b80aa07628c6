//! Runtime: scheduler, execution loop, tool routing, cancellation, and the
//! queue worker.

pub mod cancel;
pub mod events;
pub mod executor;
pub mod resolver;
pub mod scheduler;
pub mod tools;
pub mod worker;

pub use cancel::{CancelMap, CancelToken};
pub use events::{RunEvent, RunEventHub};
pub use executor::{ExecutionOutcome, Executor};
pub use resolver::{AgentResolver, ConfigAgentResolver};
pub use scheduler::{CreatedTask, Scheduler};
pub use tools::{AgentCaller, ToolDispatchContext, ToolRouter};
pub use worker::{InternalA2aCaller, Worker};
