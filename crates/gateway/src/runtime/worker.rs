//! Queue consumer — drives one agent-execution step per delivery.
//!
//! Handlers are idempotent on the queue task id: a redelivery of a step
//! already terminal (or already being worked) is a no-op. Exhausted or
//! non-retryable deliveries land in the dead-letter handler, which drives
//! the step to `FAILED` so the run cannot hang.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use shaman_domain::run::RunStatus;
use shaman_domain::step::{StepStatus, StepType};
use shaman_domain::stream::Usage;
use shaman_domain::{Error, Result};
use shaman_protocol::{
    A2aMessage, MessageSendParams, Part, SendConfiguration, META_AGENT, META_CALL_STACK,
    META_DEPTH, META_ORGANIZATION_ID, META_PARENT_STEP_ID, META_RUN_ID,
};
use shaman_a2a_client::{A2aClient, Credential, SendOutcome};
use shaman_queue::{
    DeadLetterHandler, HandlerOutcome, QueueTask, TaskHandler, TaskQueue,
    TASK_TYPE_AGENT_EXECUTION,
};

use crate::api::auth::issue_internal_token;

use super::cancel::CancelMap;
use super::events::RunEvent;
use super::executor::{ExecutionOutcome, Executor};
use super::scheduler::Scheduler;
use super::tools::{AgentCallOutcome, AgentCaller, ToolDispatchContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker wiring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct Worker {
    scheduler: Arc<Scheduler>,
    executor: Arc<Executor>,
    cancels: Arc<CancelMap>,
    step_timeout: Duration,
}

impl Worker {
    pub fn new(
        scheduler: Arc<Scheduler>,
        executor: Arc<Executor>,
        cancels: Arc<CancelMap>,
        step_timeout_ms: u64,
    ) -> Self {
        Self {
            scheduler,
            executor,
            cancels,
            step_timeout: Duration::from_millis(step_timeout_ms),
        }
    }

    /// Register the agent-execution consumer on the queue.
    pub fn register(self: &Arc<Self>, queue: &dyn TaskQueue, concurrency: usize, max_attempts: u32) {
        let worker = self.clone();
        let handler: TaskHandler = Arc::new(move |task| {
            let worker = worker.clone();
            Box::pin(async move { worker.handle_delivery(task).await })
        });
        queue.register_handler(TASK_TYPE_AGENT_EXECUTION, handler, concurrency, max_attempts);
    }

    /// Dead-letter path: the delivery is gone for good, so the step must
    /// reach a terminal state here or the run hangs forever.
    pub fn dead_letter_handler(self: &Arc<Self>) -> DeadLetterHandler {
        let worker = self.clone();
        Arc::new(move |task, error| {
            let worker = worker.clone();
            Box::pin(async move {
                if let Ok((org_id, step_id)) = parse_payload(&task.payload) {
                    tracing::error!(%step_id, error = %error, "step dead-lettered");
                    let _ = worker
                        .finalize_step(
                            org_id,
                            step_id,
                            ExecutionOutcome {
                                status: StepStatus::Failed,
                                output: None,
                                error: Some(format!("delivery failed: {error}")),
                                usage: Usage::default(),
                                cost: 0.0,
                            },
                        )
                        .await;
                }
                HandlerOutcome::Done(Value::Null)
            })
        })
    }

    // ── One delivery ───────────────────────────────────────────────

    async fn handle_delivery(&self, task: QueueTask) -> HandlerOutcome {
        let (org_id, step_id) = match parse_payload(&task.payload) {
            Ok(ids) => ids,
            Err(e) => {
                return HandlerOutcome::Fail {
                    error: format!("bad payload: {e}"),
                    retryable: false,
                };
            }
        };

        match self.drive_step(org_id, step_id, task.attempt).await {
            Ok(()) => HandlerOutcome::Done(json!({ "stepId": step_id })),
            Err(e) => HandlerOutcome::Fail {
                retryable: e.is_retryable(),
                error: e.to_string(),
            },
        }
    }

    async fn drive_step(&self, org_id: Uuid, step_id: Uuid, attempt: u32) -> Result<()> {
        let store = self.scheduler.store();
        let step = store.steps.get(org_id, step_id)?;

        // Idempotency on redelivery: a step already settled or already in
        // someone's hands is not driven twice.
        if step.status.is_terminal() || step.status == StepStatus::Working {
            tracing::debug!(%step_id, status = ?step.status, attempt, "redelivery is a no-op");
            return Ok(());
        }

        let run = store.runs.get(org_id, step.run_id)?;
        let run_id = run.id;

        // Cancel may have landed while the step sat in the queue.
        if run.status == RunStatus::Canceling || self.cancels.is_cancelled(run_id) {
            let updated = store.steps.update(org_id, step_id, |s| {
                if !s.status.is_terminal() {
                    s.finish(StepStatus::Canceled);
                }
            })?;
            self.scheduler.emit_step_update(org_id, &updated);
            self.scheduler.on_step_terminal(org_id, run_id).await?;
            return Ok(());
        }

        if run.status == RunStatus::Submitted {
            store.runs.update(org_id, run_id, |r| {
                if r.status == RunStatus::Submitted {
                    r.status = RunStatus::Working;
                }
            })?;
        }

        let started = store.steps.update(org_id, step_id, |s| s.begin())?;
        self.scheduler.emit_step_update(org_id, &started);
        tracing::info!(%step_id, %run_id, agent = started.agent_name.as_deref().unwrap_or(""), "step started");

        let outcome = match tokio::time::timeout(
            self.step_timeout,
            self.executor.execute(org_id, step_id),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                // Timeout: fail the step and signal cancel so in-flight
                // children stop cooperatively.
                self.cancels.token_for(run_id).cancel();
                ExecutionOutcome {
                    status: StepStatus::Failed,
                    output: None,
                    error: Some(format!(
                        "timeout: step exceeded {} ms",
                        self.step_timeout.as_millis()
                    )),
                    usage: Usage::default(),
                    cost: 0.0,
                }
            }
        };

        self.finalize_step(org_id, step_id, outcome).await
    }

    /// Persist the outcome, emit events, and fire the completion rule.
    async fn finalize_step(
        &self,
        org_id: Uuid,
        step_id: Uuid,
        outcome: ExecutionOutcome,
    ) -> Result<()> {
        let store = self.scheduler.store();
        let step = store.steps.get(org_id, step_id)?;
        let run_id = step.run_id;

        // A timed-out (dropped) execution can leave a tool node mid-flight;
        // sweep it so the run cannot wedge on a node nobody will finish.
        let orphaned: Vec<Uuid> = store
            .steps
            .for_run(org_id, run_id)
            .iter()
            .filter(|s| {
                s.parent_step_id == Some(step_id)
                    && s.step_type == StepType::ToolCall
                    && s.status.is_active()
            })
            .map(|s| s.id)
            .collect();
        for tool_step_id in orphaned {
            let _ = store.steps.update(org_id, tool_step_id, |s| {
                if !s.status.is_terminal() {
                    s.finish(StepStatus::Canceled);
                }
            });
        }

        // A finished step with children still active parks on them instead
        // of terminating; the completion rule promotes it later.
        let children_active = store
            .steps
            .for_run(org_id, run_id)
            .iter()
            .any(|s| s.parent_step_id == Some(step_id) && s.status.is_active());
        let parked = outcome.status == StepStatus::Completed && children_active;

        let updated = store.steps.update(org_id, step_id, |s| {
            s.output = outcome.output.clone().map(Value::String);
            s.error = outcome.error.clone();
            if parked {
                s.status = StepStatus::BlockedOnDependency;
            } else if !s.status.is_terminal() {
                s.finish(outcome.status);
            }
        })?;

        tracing::info!(
            %step_id,
            status = ?updated.status,
            prompt_tokens = updated.prompt_tokens,
            completion_tokens = updated.completion_tokens,
            "step finished"
        );

        if outcome.status == StepStatus::Completed {
            if let Some(text) = &outcome.output {
                let mut message =
                    A2aMessage::agent_text(Uuid::new_v4().to_string(), text.clone());
                message.task_id = Some(step_id.to_string());
                message.context_id = Some(run_id.to_string());
                self.scheduler
                    .events()
                    .emit(run_id, RunEvent::Message(message));
            }
        }

        self.scheduler.emit_step_update(org_id, &updated);
        if !parked {
            self.scheduler.on_step_terminal(org_id, run_id).await?;
        }
        Ok(())
    }
}

fn parse_payload(payload: &Value) -> Result<(Uuid, Uuid)> {
    let org_id = payload
        .get("orgId")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::InvalidRequest("payload missing orgId".into()))?;
    let step_id = payload
        .get("stepId")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::InvalidRequest("payload missing stepId".into()))?;
    Ok((org_id, step_id))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recursive calls through the internal persona
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dispatches recursive agent calls as `message/send` against the internal
/// A2A surface, carrying run linkage in the reserved metadata keys. Depth
/// lives in step metadata, not the host's call stack — the child runs on a
/// worker, not inside this one.
pub struct InternalA2aCaller {
    internal_url: String,
    jwt_secret: String,
}

impl InternalA2aCaller {
    pub fn new(internal_url: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            internal_url: internal_url.into(),
            jwt_secret: jwt_secret.into(),
        }
    }
}

#[async_trait::async_trait]
impl AgentCaller for InternalA2aCaller {
    async fn call_agent(
        &self,
        ctx: &ToolDispatchContext,
        target: &str,
        message: &str,
        context_data: Option<Value>,
        async_call: bool,
    ) -> Result<AgentCallOutcome> {
        let token = issue_internal_token(
            &self.jwt_secret,
            ctx.org_id,
            Some(ctx.run_id),
            Some(ctx.step_id.to_string()),
        )
        .map_err(|e| Error::Other(format!("token issue failed: {e}")))?;

        let mut a2a_message = A2aMessage::user_text(Uuid::new_v4().to_string(), message);
        if let Some(data) = context_data {
            a2a_message.parts.push(Part::data(data));
        }
        let mut metadata = serde_json::Map::new();
        metadata.insert(META_AGENT.into(), json!(target));
        metadata.insert(META_RUN_ID.into(), json!(ctx.run_id.to_string()));
        metadata.insert(META_PARENT_STEP_ID.into(), json!(ctx.step_id.to_string()));
        metadata.insert(META_DEPTH.into(), json!(ctx.depth + 1));
        metadata.insert(META_ORGANIZATION_ID.into(), json!(ctx.org_id.to_string()));
        metadata.insert(META_CALL_STACK.into(), json!(ctx.call_stack));
        a2a_message.metadata = Some(metadata);

        let params = MessageSendParams {
            message: a2a_message,
            configuration: Some(SendConfiguration {
                blocking: !async_call,
            }),
            metadata: None,
        };

        let client = A2aClient::new(&self.internal_url, Credential::Bearer(token));
        let outcome = client.send_message(&params).await?;

        match outcome {
            SendOutcome::Task(task) => {
                let state = serde_json::to_value(task.status.state)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from));
                let output = task
                    .artifacts
                    .first()
                    .and_then(|a| a.parts.first())
                    .and_then(Part::as_text)
                    .map(String::from)
                    .or_else(|| {
                        task.status
                            .message
                            .as_ref()
                            .map(|m| m.text_content())
                    });
                Ok(AgentCallOutcome {
                    task_id: task.id,
                    output,
                    state: if async_call { None } else { state },
                })
            }
            SendOutcome::Message(message) => Ok(AgentCallOutcome {
                task_id: message.task_id.clone().unwrap_or_default(),
                output: Some(message.text_content()),
                state: Some("completed".into()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trip() {
        let org = Uuid::new_v4();
        let step = Uuid::new_v4();
        let payload = json!({ "orgId": org.to_string(), "stepId": step.to_string() });
        assert_eq!(parse_payload(&payload).unwrap(), (org, step));
    }

    #[test]
    fn bad_payload_is_invalid() {
        assert!(parse_payload(&json!({ "orgId": "nope" })).is_err());
        assert!(parse_payload(&json!({})).is_err());
    }
}
