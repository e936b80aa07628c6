//! Agent execution loop — drives one step to a terminal state.
//!
//! Context assembly → LLM round-trip → tool dispatch, looping until the
//! model answers without tool calls, the iteration bound trips, or a cancel
//! arrives. Tool-level errors are returned to the model as TOOL messages;
//! LLM-level errors retry in-loop when retryable and otherwise fail the
//! step.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use shaman_domain::chat::{ChatMessage, ToolCall};
use shaman_domain::message::{MessageRole, StepMessage};
use shaman_domain::step::{Step, StepStatus};
use shaman_domain::stream::{FinishReason, Usage};
use shaman_domain::{Error, Result};
use shaman_providers::{CompletionRequest, PricingTable, ProviderRegistry};
use shaman_store::StoreGateway;

use super::cancel::CancelMap;
use super::resolver::AgentResolver;
use super::tools::{ToolDispatchContext, ToolRouter};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Terminal result of one step's execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: StepStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub usage: Usage,
    pub cost: f64,
}

impl ExecutionOutcome {
    fn completed(output: String, usage: Usage, cost: f64) -> Self {
        Self {
            status: StepStatus::Completed,
            output: Some(output),
            error: None,
            usage,
            cost,
        }
    }

    fn failed(error: impl Into<String>, usage: Usage, cost: f64) -> Self {
        Self {
            status: StepStatus::Failed,
            output: None,
            error: Some(error.into()),
            usage,
            cost,
        }
    }

    fn canceled(usage: Usage, cost: f64) -> Self {
        Self {
            status: StepStatus::Canceled,
            output: None,
            error: None,
            usage,
            cost,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Executor {
    store: StoreGateway,
    providers: Arc<ProviderRegistry>,
    pricing: Arc<PricingTable>,
    router: Arc<ToolRouter>,
    resolver: Arc<dyn AgentResolver>,
    cancels: Arc<CancelMap>,
    /// In-loop retry attempts for retryable LLM errors.
    llm_retry_attempts: u32,
    /// Depth bound for DAG nodes spawned by tool dispatch.
    max_depth: u32,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: StoreGateway,
        providers: Arc<ProviderRegistry>,
        pricing: Arc<PricingTable>,
        router: Arc<ToolRouter>,
        resolver: Arc<dyn AgentResolver>,
        cancels: Arc<CancelMap>,
        llm_retry_attempts: u32,
        max_depth: u32,
    ) -> Self {
        Self {
            store,
            providers,
            pricing,
            router,
            resolver,
            cancels,
            llm_retry_attempts,
            max_depth,
        }
    }

    /// Drive one step to a terminal outcome. Failures are folded into the
    /// outcome — the worker decides how they land on the step row.
    pub async fn execute(&self, org_id: Uuid, step_id: Uuid) -> ExecutionOutcome {
        match self.execute_inner(org_id, step_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(%step_id, error = %e, "step execution failed");
                ExecutionOutcome::failed(e.to_string(), Usage::default(), 0.0)
            }
        }
    }

    async fn execute_inner(&self, org_id: Uuid, step_id: Uuid) -> Result<ExecutionOutcome> {
        let step = self.store.steps.get(org_id, step_id)?;
        let agent_name = step
            .agent_name
            .clone()
            .ok_or_else(|| Error::InvalidRequest("step has no agent name".into()))?;

        let definition = match self.resolver.resolve(org_id, &agent_name).await {
            Ok(def) => def,
            Err(Error::AgentNotFound(name)) => {
                return Ok(ExecutionOutcome::failed(
                    format!("agent not found: {name}"),
                    Usage::default(),
                    0.0,
                ));
            }
            Err(e) => return Err(e),
        };

        let token = self.cancels.token_for(step.run_id);
        let dispatch_ctx = ToolDispatchContext {
            org_id,
            run_id: step.run_id,
            step_id,
            agent: definition.clone(),
            call_stack: step.call_stack.clone(),
            depth: step.depth,
        };

        // ── Context assembly ─────────────────────────────────────────
        let mut messages = self.assemble_context(&step, &definition)?;
        let tool_defs = self.router.definitions_for(&definition).await;

        let mut total_usage = Usage::default();
        let mut total_cost = 0.0;

        // ── Tool loop ────────────────────────────────────────────────
        for iteration in 0..definition.max_iterations {
            if token.is_cancelled() {
                tracing::info!(%step_id, iteration, "cancel observed, stopping loop");
                return Ok(ExecutionOutcome::canceled(total_usage, total_cost));
            }

            let request = CompletionRequest {
                messages: messages.clone(),
                model: definition.model.clone(),
                temperature: definition.temperature,
                max_tokens: None,
                tools: tool_defs.clone(),
                tool_choice: Default::default(),
            };

            let response = match self.complete_with_retry(&request).await {
                Ok(resp) => resp,
                Err(e) => {
                    return Ok(ExecutionOutcome::failed(
                        format!("llm error: {e}"),
                        total_usage,
                        total_cost,
                    ));
                }
            };

            // ── Accounting ───────────────────────────────────────────
            let call_cost = self.pricing.cost_of(&definition.model, &response.usage);
            total_usage.add(&response.usage);
            total_cost += call_cost;
            self.store.steps.update(org_id, step_id, |s| {
                s.prompt_tokens += response.usage.prompt_tokens;
                s.completion_tokens += response.usage.completion_tokens;
                s.cost += call_cost;
            })?;

            let content = response.content.clone().unwrap_or_default();
            self.persist_message(
                &step,
                StepMessage::new(step_id, org_id, MessageRole::Assistant, content.clone())
                    .with_tool_calls(response.tool_calls.clone()),
            );
            messages.push(ChatMessage::assistant_with_tools(
                content.clone(),
                response.tool_calls.clone(),
            ));

            // ── Terminal: content without tool calls ─────────────────
            if response.tool_calls.is_empty() {
                if response.finish_reason == FinishReason::Stop {
                    return Ok(ExecutionOutcome::completed(content, total_usage, total_cost));
                }
                return Ok(ExecutionOutcome::failed(
                    format!(
                        "completion ended without tool calls but finish_reason was {:?}",
                        response.finish_reason
                    ),
                    total_usage,
                    total_cost,
                ));
            }

            // ── Tool dispatch (sequential within a step) ─────────────
            for tool_call in &response.tool_calls {
                if token.is_cancelled() {
                    return Ok(ExecutionOutcome::canceled(total_usage, total_cost));
                }
                let result = self
                    .dispatch_tool(&step, &dispatch_ctx, tool_call)
                    .await;
                let content = result.to_tool_content();

                self.persist_message(
                    &step,
                    StepMessage::tool_result(step_id, org_id, &tool_call.id, &content),
                );
                messages.push(ChatMessage::tool_result(&tool_call.id, content));
            }

            tracing::debug!(%step_id, iteration, "tool loop iteration complete");
        }

        Ok(ExecutionOutcome::failed(
            format!(
                "iteration_limit: no terminal completion after {} iterations",
                definition.max_iterations
            ),
            total_usage,
            total_cost,
        ))
    }

    /// Initial message list: system prompt, optional run-data snapshot,
    /// then the user input. Each is also persisted on the step.
    fn assemble_context(
        &self,
        step: &Step,
        definition: &shaman_domain::config::AgentDefinition,
    ) -> Result<Vec<ChatMessage>> {
        let mut messages = vec![ChatMessage::system(&definition.system_prompt)];

        if definition.context_scope == shaman_domain::config::ContextScope::Full {
            let snapshot = self.store.run_data.snapshot(step.org_id, step.run_id);
            if !snapshot.is_empty() {
                let rendered: Vec<String> = snapshot
                    .iter()
                    .map(|e| format!("{}: {}", e.key, e.value))
                    .collect();
                messages.push(ChatMessage::system(format!(
                    "Shared run data:\n{}",
                    rendered.join("\n")
                )));
            }
        }

        messages.push(ChatMessage::user(input_text(&step.input)));

        for message in &messages {
            let role = match message.role {
                shaman_domain::chat::ChatRole::System => MessageRole::System,
                _ => MessageRole::User,
            };
            self.persist_message(
                step,
                StepMessage::new(step.id, step.org_id, role, &message.content),
            );
        }

        Ok(messages)
    }

    async fn dispatch_tool(
        &self,
        step: &Step,
        ctx: &ToolDispatchContext,
        tool_call: &ToolCall,
    ) -> shaman_domain::tool::ToolResult {
        self.router
            .record(ctx, &tool_call.id, &tool_call.name, &tool_call.arguments);

        // Local tool work gets its own TOOL_CALL node in the DAG.
        // Recursive agent calls attach their execution step through the
        // scheduler instead, and a step pinned at the depth ceiling keeps
        // its tool work inline so no node exceeds the bound.
        let is_agent_call =
            tool_call.name == "call_agent" || tool_call.name.starts_with("agent:");
        let tool_step_id = if !is_agent_call
            && step.depth + 1 <= self.max_depth
        {
            let mut tool_step =
                Step::child(step, shaman_domain::step::StepType::ToolCall, tool_call.arguments.clone());
            tool_step.tool_name = Some(tool_call.name.clone());
            tool_step.tool_call_id = Some(tool_call.id.clone());
            tool_step.begin();
            match self.store.steps.insert(step.org_id, tool_step.clone()) {
                Ok(()) => Some(tool_step.id),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to create tool step");
                    None
                }
            }
        } else {
            None
        };

        let result = self
            .router
            .dispatch(ctx, &tool_call.name, &tool_call.arguments)
            .await;

        if let Some(tool_step_id) = tool_step_id {
            let output = result.output.clone();
            let error = result.error.clone();
            let _ = self.store.steps.update(step.org_id, tool_step_id, |s| {
                s.output = output.clone();
                // A tool error is data for the model, not a DAG failure:
                // the node completes and the error rides its error field.
                s.error = error.clone();
                s.finish(StepStatus::Completed);
            });
        }

        if !result.success {
            tracing::debug!(
                tool = %tool_call.name,
                error = result.error.as_deref().unwrap_or(""),
                "tool returned error to the model"
            );
        }
        result
    }

    async fn complete_with_retry(
        &self,
        request: &CompletionRequest,
    ) -> Result<shaman_providers::CompletionResponse> {
        let provider = self.providers.for_model(&request.model)?;
        let mut attempt: u32 = 0;
        loop {
            match provider.complete(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt + 1 < self.llm_retry_attempts => {
                    let delay = Duration::from_millis(500 * 2u64.saturating_pow(attempt));
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying LLM call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Message persistence is best-effort from the loop's perspective:
    /// a failed append is logged and the loop continues with its in-memory
    /// conversation.
    fn persist_message(&self, step: &Step, message: StepMessage) {
        if let Err(e) = self.store.messages.append(step.org_id, message) {
            tracing::warn!(step_id = %step.id, error = %e, "failed to persist message");
        }
    }
}

fn input_text(input: &Value) -> String {
    match input {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
