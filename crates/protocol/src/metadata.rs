//! Metadata keys reserved for the platform.

/// Run id backing the task.
pub const META_RUN_ID: &str = "shaman:runId";
/// Step id the message belongs to.
pub const META_STEP_ID: &str = "shaman:stepId";
/// Parent step id for recursive calls.
pub const META_PARENT_STEP_ID: &str = "shaman:parentStepId";
/// DAG depth of the executing step.
pub const META_DEPTH: &str = "shaman:depth";
/// Owning organization.
pub const META_ORGANIZATION_ID: &str = "shaman:organizationId";
/// Agent call stack carried across recursive calls.
pub const META_CALL_STACK: &str = "shaman:callStack";
/// Target agent name on `message/send`.
pub const META_AGENT: &str = "agent";
