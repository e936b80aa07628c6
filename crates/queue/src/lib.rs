//! Task-queue adapter: durable at-least-once delivery of step-execution
//! tasks.
//!
//! The platform talks to the queue exclusively through [`TaskQueue`], so any
//! at-least-once backend (the external Foreman service, or the in-process
//! [`InMemoryQueue`]) can serve. Delivery is at-least-once: handlers MUST be
//! idempotent on the task id, and a redelivery must be a no-op.

mod backoff;
mod memory;

pub use backoff::BackoffPolicy;
pub use memory::InMemoryQueue;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use shaman_domain::Result;

/// Task type of agent-execution steps.
pub const TASK_TYPE_AGENT_EXECUTION: &str = "agent-execution";

/// One delivery of a queued task.
#[derive(Debug, Clone)]
pub struct QueueTask {
    /// Stable across redeliveries — the idempotency key.
    pub id: Uuid,
    pub run_id: Uuid,
    pub task_type: String,
    pub payload: Value,
    pub metadata: Value,
    /// 0 on first delivery, incremented per redelivery.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// What a handler did with a delivery.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    Done(Value),
    Fail { error: String, retryable: bool },
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerOutcome> + Send>>;

/// A registered consumer callback. Invoked once per delivery; must be
/// idempotent on `task.id`.
pub type TaskHandler = Arc<dyn Fn(QueueTask) -> HandlerFuture + Send + Sync>;

/// Invoked when a task exhausts its delivery attempts or fails
/// non-retryably, so the owning step can be driven to a terminal state.
pub type DeadLetterHandler = Arc<dyn Fn(QueueTask, String) -> HandlerFuture + Send + Sync>;

/// The queue seam.
#[async_trait::async_trait]
pub trait TaskQueue: Send + Sync {
    /// Persist and schedule a task; returns once durably accepted.
    /// Fails with `QueueUnavailable` when the backend cannot accept.
    async fn enqueue(
        &self,
        run_id: Uuid,
        task_type: &str,
        payload: Value,
        metadata: Value,
    ) -> Result<Uuid>;

    /// Start `concurrency` consumers for `task_type`. Retryable failures
    /// are redelivered with exponential backoff up to `max_attempts`.
    fn register_handler(
        &self,
        task_type: &str,
        handler: TaskHandler,
        concurrency: usize,
        max_attempts: u32,
    );

    /// Stop accepting work, drain in-flight deliveries, release consumers.
    async fn shutdown(&self);
}
