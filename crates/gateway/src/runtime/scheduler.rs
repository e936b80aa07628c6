//! Run scheduler and step orchestrator.
//!
//! Turns `message/send` into a run plus root step, attaches recursive
//! internal sends as child steps of the same run, projects run/step state
//! onto A2A tasks, applies the completion rule on every terminal step
//! transition, and serves the streaming methods off the run event hub.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use shaman_domain::config::Config;
use shaman_domain::run::{Run, RunStatus};
use shaman_domain::step::{Step, StepStatus, StepType};
use shaman_domain::{Error, Result};
use shaman_protocol::{
    A2aMessage, A2aTask, Artifact, MessageSendParams, Part, TaskState, META_CALL_STACK,
    META_PARENT_STEP_ID, META_RUN_ID,
};
use shaman_queue::{TaskQueue, TASK_TYPE_AGENT_EXECUTION};
use shaman_store::StoreGateway;

use crate::api::auth::AuthContext;

use super::cancel::CancelMap;
use super::events::{RunEvent, RunEventHub};
use super::resolver::AgentResolver;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State projection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Internal run lattice → external task state.
pub fn project_run_state(status: RunStatus) -> TaskState {
    match status {
        RunStatus::Submitted => TaskState::Submitted,
        RunStatus::Working => TaskState::Working,
        RunStatus::InputRequired => TaskState::InputRequired,
        RunStatus::BlockedOnDependency => TaskState::Working,
        RunStatus::Completed => TaskState::Completed,
        RunStatus::Failed => TaskState::Failed,
        RunStatus::Canceling | RunStatus::Canceled => TaskState::Canceled,
        RunStatus::Rejected => TaskState::Rejected,
    }
}

/// Step status → external task state, for tasks handed out on child steps.
pub fn project_step_state(status: StepStatus) -> TaskState {
    match status {
        StepStatus::Queued => TaskState::Submitted,
        StepStatus::Working | StepStatus::BlockedOnDependency => TaskState::Working,
        StepStatus::InputRequired => TaskState::InputRequired,
        StepStatus::Completed => TaskState::Completed,
        StepStatus::Failed => TaskState::Failed,
        StepStatus::Canceled => TaskState::Canceled,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A task created by `message/send` before its step is enqueued.
pub struct CreatedTask {
    pub task: A2aTask,
    pub run_id: Uuid,
    pub step_id: Uuid,
}

pub struct Scheduler {
    config: Arc<Config>,
    store: StoreGateway,
    queue: Arc<dyn TaskQueue>,
    events: Arc<RunEventHub>,
    cancels: Arc<CancelMap>,
    resolver: Arc<dyn AgentResolver>,
}

impl Scheduler {
    pub fn new(
        config: Arc<Config>,
        store: StoreGateway,
        queue: Arc<dyn TaskQueue>,
        events: Arc<RunEventHub>,
        cancels: Arc<CancelMap>,
        resolver: Arc<dyn AgentResolver>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            events,
            cancels,
            resolver,
        }
    }

    pub fn store(&self) -> &StoreGateway {
        &self.store
    }

    pub fn events(&self) -> &Arc<RunEventHub> {
        &self.events
    }

    // ── message/send ───────────────────────────────────────────────

    pub async fn send_message(
        &self,
        params: MessageSendParams,
        ctx: &AuthContext,
    ) -> Result<A2aTask> {
        let blocking = params
            .configuration
            .as_ref()
            .map(|c| c.blocking)
            .unwrap_or(false);

        let created = self.create_task(&params, ctx).await?;

        if blocking {
            let rx = self.events.subscribe(created.run_id);
            self.enqueue_step(created.run_id, ctx.org_id, created.step_id)
                .await?;
            self.wait_for_terminal(ctx.org_id, created.step_id, rx).await
        } else {
            self.enqueue_step(created.run_id, ctx.org_id, created.step_id)
                .await?;
            Ok(created.task)
        }
    }

    /// Validate params, create (or attach) the run and step, and hand back
    /// the submitted task. The caller decides when to enqueue — streaming
    /// subscribes to the event hub first so no update is missed.
    pub async fn create_task(
        &self,
        params: &MessageSendParams,
        ctx: &AuthContext,
    ) -> Result<CreatedTask> {
        let agent_name = params
            .agent_name()
            .ok_or_else(|| Error::InvalidRequest("metadata.agent is required".into()))?
            .to_owned();

        // The agent must exist up front; discovering mid-run is a worker
        // failure, not a submit-time one.
        match self.resolver.resolve(ctx.org_id, &agent_name).await {
            Ok(_) => {}
            Err(Error::AgentNotFound(name)) => {
                return Err(Error::InvalidRequest(format!("unknown agent: {name}")));
            }
            Err(e) => return Err(e),
        }

        let input_text = params.message.text_content();

        let step = if let Some(run_id_raw) = params.message.metadata_str(META_RUN_ID) {
            self.attach_child_step(params, ctx, &agent_name, run_id_raw, &input_text)?
        } else {
            let mut run = Run::new(ctx.org_id, input_text.clone());
            run.created_by = ctx.user_id.clone();
            let run_id = run.id;
            self.store.runs.insert(ctx.org_id, run)?;

            let mut step = Step::root(run_id, ctx.org_id, &agent_name, json!(input_text));
            step.call_stack = vec![agent_name.clone()];
            self.store.steps.insert(ctx.org_id, step.clone())?;
            step
        };

        tracing::info!(
            run_id = %step.run_id,
            step_id = %step.id,
            agent = %agent_name,
            depth = step.depth,
            "task created"
        );

        let task = self.project_task(ctx.org_id, &step)?;
        Ok(CreatedTask {
            task,
            run_id: step.run_id,
            step_id: step.id,
        })
    }

    /// A recursive internal send carries `shaman:runId` metadata: the new
    /// execution joins the existing run as a child step of the caller.
    fn attach_child_step(
        &self,
        params: &MessageSendParams,
        ctx: &AuthContext,
        agent_name: &str,
        run_id_raw: &str,
        input_text: &str,
    ) -> Result<Step> {
        let run_id: Uuid = run_id_raw
            .parse()
            .map_err(|_| Error::InvalidRequest(format!("bad {META_RUN_ID}: {run_id_raw}")))?;
        // Tenant predicate: a cross-tenant run id is indistinguishable
        // from absence.
        let run = self.store.runs.get(ctx.org_id, run_id)?;
        if run.status.is_terminal() {
            return Err(Error::InvalidRequest(format!(
                "run {run_id} is already terminal"
            )));
        }

        let parent_id_raw = params
            .message
            .metadata_str(META_PARENT_STEP_ID)
            .ok_or_else(|| {
                Error::InvalidRequest(format!(
                    "{META_PARENT_STEP_ID} is required alongside {META_RUN_ID}"
                ))
            })?;
        let parent_id: Uuid = parent_id_raw.parse().map_err(|_| {
            Error::InvalidRequest(format!("bad {META_PARENT_STEP_ID}: {parent_id_raw}"))
        })?;
        let parent = self.store.steps.get(ctx.org_id, parent_id)?;

        if parent.depth + 1 > self.config.limits.max_depth {
            return Err(Error::DepthLimit(format!(
                "child of step {parent_id} would exceed max depth {}",
                self.config.limits.max_depth
            )));
        }

        let mut step = Step::child(&parent, StepType::AgentExecution, json!(input_text))
            .with_agent(agent_name);

        // The caller ships its call stack; fall back to the parent's.
        if let Some(stack) = params
            .message
            .metadata
            .as_ref()
            .and_then(|m| m.get(META_CALL_STACK))
            .and_then(Value::as_array)
        {
            step.call_stack = stack
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
        }
        step.call_stack.push(agent_name.to_owned());

        self.store.steps.insert(ctx.org_id, step.clone())?;
        Ok(step)
    }

    async fn enqueue_step(&self, run_id: Uuid, org_id: Uuid, step_id: Uuid) -> Result<()> {
        self.queue
            .enqueue(
                run_id,
                TASK_TYPE_AGENT_EXECUTION,
                json!({ "stepId": step_id, "orgId": org_id }),
                json!({}),
            )
            .await?;
        Ok(())
    }

    /// Block until the task reaches a terminal state, bounded by the step
    /// timeout. Used by `configuration.blocking` and recursive calls.
    pub async fn wait_for_terminal(
        &self,
        org_id: Uuid,
        step_id: Uuid,
        mut rx: tokio::sync::broadcast::Receiver<RunEvent>,
    ) -> Result<A2aTask> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.limits.step_timeout_ms);

        loop {
            // Re-project from the store first: the terminal event may have
            // fired before we subscribed.
            let step = self.store.steps.get(org_id, step_id)?;
            let task = self.project_task(org_id, &step)?;
            if task.status.state.is_terminal() {
                return Ok(task);
            }

            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Ok(_event)) => continue,
                Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => {
                    let step = self.store.steps.get(org_id, step_id)?;
                    return self.project_task(org_id, &step);
                }
                Err(_) => {
                    tracing::warn!(%step_id, "blocking wait hit the step timeout");
                    let step = self.store.steps.get(org_id, step_id)?;
                    return self.project_task(org_id, &step);
                }
            }
        }
    }

    // ── tasks/get ──────────────────────────────────────────────────

    pub async fn get_task(&self, id: &str, ctx: &AuthContext) -> Result<A2aTask> {
        let step_id = parse_task_id(id)?;
        let step = self.store.steps.get(ctx.org_id, step_id)?;
        self.project_task(ctx.org_id, &step)
    }

    // ── tasks/cancel ───────────────────────────────────────────────

    pub async fn cancel_task(&self, id: &str, ctx: &AuthContext) -> Result<A2aTask> {
        let step_id = parse_task_id(id)?;
        let step = self.store.steps.get(ctx.org_id, step_id)?;
        let run = self.store.runs.get(ctx.org_id, step.run_id)?;

        if run.status.is_terminal() {
            return Err(Error::TaskNotCancelable(format!(
                "task {id} is already {:?}",
                run.status
            )));
        }

        self.store.runs.update(ctx.org_id, run.id, |r| {
            if !r.status.is_terminal() {
                r.status = RunStatus::Canceling;
            }
        })?;
        self.cancels.token_for(run.id).cancel();
        tracing::info!(run_id = %run.id, "cancel requested");

        // Steps that never reached a worker are finalized here; in-flight
        // ones observe the flag cooperatively.
        let queued: Vec<Step> = self
            .store
            .steps
            .active_for_run(ctx.org_id, run.id)
            .into_iter()
            .filter(|s| s.status == StepStatus::Queued)
            .collect();
        for queued_step in queued {
            self.store.steps.update(ctx.org_id, queued_step.id, |s| {
                if s.status == StepStatus::Queued {
                    s.finish(StepStatus::Canceled);
                }
            })?;
        }
        self.on_step_terminal(ctx.org_id, run.id).await?;

        let step = self.store.steps.get(ctx.org_id, step_id)?;
        self.project_task(ctx.org_id, &step)
    }

    // ── streaming ──────────────────────────────────────────────────

    /// `message/stream`: create the task, then lazily emit the initial
    /// task followed by updates until the task terminates.
    pub async fn stream_message(
        &self,
        params: MessageSendParams,
        ctx: &AuthContext,
    ) -> Result<shaman_domain::stream::BoxStream<'static, RunEvent>> {
        let created = self.create_task(&params, ctx).await?;
        let rx = self.events.subscribe(created.run_id);
        self.enqueue_step(created.run_id, ctx.org_id, created.step_id)
            .await?;
        Ok(forward_events(rx, created.step_id, Some(created.task)))
    }

    /// `tasks/resubscribe`: current state first, then subsequent updates.
    /// A task already terminal yields exactly one event and never
    /// re-emits it.
    pub async fn resubscribe(
        &self,
        id: &str,
        ctx: &AuthContext,
    ) -> Result<shaman_domain::stream::BoxStream<'static, RunEvent>> {
        let step_id = parse_task_id(id)?;
        let step = self.store.steps.get(ctx.org_id, step_id)?;

        let current = self.project_task(ctx.org_id, &step)?;
        if current.status.state.is_terminal() {
            // No live channel needed — the single terminal event is the
            // whole stream.
            return Ok(Box::pin(async_stream::stream! {
                yield RunEvent::Task(current);
            }));
        }

        // Subscribe before re-projecting so a terminal transition between
        // the two is never missed.
        let rx = self.events.subscribe(step.run_id);
        let step = self.store.steps.get(ctx.org_id, step_id)?;
        let current = self.project_task(ctx.org_id, &step)?;
        Ok(forward_events(rx, step_id, Some(current)))
    }

    // ── Completion rule ────────────────────────────────────────────

    /// Fired whenever a step transitions to a terminal state. Promotes
    /// parents whose children are all done, then finalizes the run when no
    /// step remains active.
    pub async fn on_step_terminal(&self, org_id: Uuid, run_id: Uuid) -> Result<()> {
        // Parents parked on children resume (terminally) once the last
        // child settles.
        loop {
            let all = self.store.steps.for_run(org_id, run_id);
            let mut promoted = false;
            for step in all
                .iter()
                .filter(|s| s.status == StepStatus::BlockedOnDependency)
            {
                let children_active = all
                    .iter()
                    .any(|s| s.parent_step_id == Some(step.id) && s.status.is_active());
                if !children_active {
                    let updated = self.store.steps.update(org_id, step.id, |s| {
                        if s.status == StepStatus::BlockedOnDependency {
                            s.finish(StepStatus::Completed);
                        }
                    })?;
                    self.emit_step_update(org_id, &updated);
                    promoted = true;
                }
            }
            if !promoted {
                break;
            }
        }

        self.check_completion(org_id, run_id).await
    }

    async fn check_completion(&self, org_id: Uuid, run_id: Uuid) -> Result<()> {
        if !self.store.steps.active_for_run(org_id, run_id).is_empty() {
            return Ok(());
        }

        let steps = self.store.steps.for_run(org_id, run_id);
        if steps.is_empty() {
            return Ok(());
        }

        let canceling = self.store.runs.get(org_id, run_id)?.status == RunStatus::Canceling;
        let all_clean = steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Completed | StepStatus::Canceled));
        let final_status = if canceling {
            RunStatus::Canceled
        } else if all_clean {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };

        let first_error = steps.iter().find_map(|s| s.error.clone());
        let total_tokens: u64 = steps
            .iter()
            .map(|s| s.prompt_tokens + s.completion_tokens)
            .sum();
        let total_cost: f64 = steps.iter().map(|s| s.cost).sum();

        let mut became_terminal = false;
        self.store.runs.update(org_id, run_id, |r| {
            if !r.status.is_terminal() {
                r.total_tokens = total_tokens;
                r.total_cost = total_cost;
                r.error = first_error.clone();
                r.finish(final_status);
                became_terminal = true;
            }
        })?;

        if became_terminal {
            tracing::info!(
                %run_id,
                status = ?final_status,
                total_tokens,
                "run finalized"
            );
            if let Some(root) = steps.iter().find(|s| s.parent_step_id.is_none()) {
                let task = self.project_task(org_id, root)?;
                self.events.emit(run_id, RunEvent::Task(task));
            }
            self.events.cleanup(run_id);
            self.cancels.remove(run_id);
        }
        Ok(())
    }

    // ── Projection ─────────────────────────────────────────────────

    /// Build the external task for a step. Root steps project the run's
    /// state; child steps (recursive calls) project their own, so a
    /// blocked parent can observe the child settle while the run keeps
    /// working.
    pub fn project_task(&self, org_id: Uuid, step: &Step) -> Result<A2aTask> {
        let run = self.store.runs.get(org_id, step.run_id)?;
        let state = if step.parent_step_id.is_none() {
            project_run_state(run.status)
        } else {
            project_step_state(step.status)
        };

        let mut task = A2aTask::new(step.id.to_string(), run.id.to_string(), state);

        if state == TaskState::Failed {
            let reason = step
                .error
                .clone()
                .or_else(|| run.error.clone())
                .unwrap_or_else(|| "execution failed".into());
            task.status.message = Some(A2aMessage::agent_text(
                format!("status-{}", step.id),
                reason,
            ));
        }

        if state.is_terminal() {
            task.history = self.build_history(org_id, step.id);
            if let Some(output) = step.output.as_ref().and_then(Value::as_str) {
                task.artifacts.push(Artifact {
                    artifact_id: format!("result-{}", step.id),
                    name: Some("result".into()),
                    parts: vec![Part::text(output)],
                });
            }
        }

        Ok(task)
    }

    /// The step's conversation as A2A messages (tool traffic elided).
    fn build_history(&self, org_id: Uuid, step_id: Uuid) -> Vec<A2aMessage> {
        use shaman_domain::message::MessageRole;
        use shaman_protocol::A2aRole;

        self.store
            .messages
            .for_step(org_id, step_id)
            .into_iter()
            .filter(|m| m.role != MessageRole::Tool)
            .map(|m| {
                let role = match m.role {
                    MessageRole::System => A2aRole::System,
                    MessageRole::User => A2aRole::User,
                    _ => A2aRole::Agent,
                };
                let mut msg = A2aMessage::user_text(m.id.to_string(), m.content);
                msg.role = role;
                msg.task_id = Some(step_id.to_string());
                msg
            })
            .collect()
    }

    /// Emit the projection of a step to the run's subscribers.
    pub fn emit_step_update(&self, org_id: Uuid, step: &Step) {
        if let Ok(task) = self.project_task(org_id, step) {
            self.events.emit(step.run_id, RunEvent::Task(task));
        }
    }
}

/// Task ids on the wire are the root step's UUID. Unparseable ids are
/// indistinguishable from unknown ones.
fn parse_task_id(id: &str) -> Result<Uuid> {
    id.parse()
        .map_err(|_| Error::NotFound(format!("task {id}")))
}

/// Forward run events to a subscriber stream: optionally an initial task,
/// then task updates for `step_id` and messages, until the task terminates.
fn forward_events(
    mut rx: tokio::sync::broadcast::Receiver<RunEvent>,
    step_id: Uuid,
    initial: Option<A2aTask>,
) -> shaman_domain::stream::BoxStream<'static, RunEvent> {
    let step_id = step_id.to_string();
    Box::pin(async_stream::stream! {
        if let Some(task) = initial {
            let terminal = task.status.state.is_terminal();
            yield RunEvent::Task(task);
            if terminal {
                return;
            }
        }
        loop {
            match rx.recv().await {
                Ok(RunEvent::Task(task)) if task.id == step_id => {
                    let terminal = task.status.state.is_terminal();
                    yield RunEvent::Task(task);
                    if terminal {
                        break;
                    }
                }
                Ok(RunEvent::Message(msg)) => yield RunEvent::Message(msg),
                // Other steps' updates are not this subscriber's concern.
                Ok(RunEvent::Task(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "stream subscriber lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
