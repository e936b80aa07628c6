//! Tool router — resolves a tool name to a platform tool, a recursive
//! agent call, or an MCP-backed external tool.
//!
//! Dispatch order:
//! 1. `agent:<name>` prefix (and the `call_agent` platform tool) — recursive
//!    agent call, allow-list and depth/circularity checked first.
//! 2. The closed set of platform tools, executed against the run-data store.
//! 3. The agent's MCP server bindings, tried in declaration order; the
//!    first server whose selection covers the tool wins.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use shaman_domain::chat::ToolDefinition;
use shaman_domain::config::{AgentDefinition, LimitsConfig};
use shaman_domain::message::ToolCallRecord;
use shaman_domain::rundata::{RunDataEntry, RunDataFilter, SortOrder};
use shaman_domain::tool::{ToolInvoker, ToolKind, ToolResult};
use shaman_domain::Result;
use shaman_store::StoreGateway;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recursive-call seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of a recursive agent call.
#[derive(Debug, Clone)]
pub struct AgentCallOutcome {
    /// Task id of the child execution.
    pub task_id: String,
    /// Final text, present for synchronous calls.
    pub output: Option<String>,
    /// Terminal state name of the child task (sync calls).
    pub state: Option<String>,
}

/// Dispatches a recursive agent call through the internal A2A surface.
#[async_trait::async_trait]
pub trait AgentCaller: Send + Sync {
    async fn call_agent(
        &self,
        ctx: &ToolDispatchContext,
        target: &str,
        message: &str,
        context_data: Option<Value>,
        async_call: bool,
    ) -> Result<AgentCallOutcome>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a single tool dispatch needs to know about where it runs.
#[derive(Debug, Clone)]
pub struct ToolDispatchContext {
    pub org_id: Uuid,
    pub run_id: Uuid,
    pub step_id: Uuid,
    pub agent: AgentDefinition,
    /// Agent names from the root to (and including) the current agent.
    pub call_stack: Vec<String>,
    pub depth: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const PLATFORM_TOOLS: &[&str] = &[
    "run_data_write",
    "run_data_read",
    "run_data_query",
    "run_data_list",
    "run_data_delete",
    "call_agent",
];

pub struct ToolRouter {
    store: StoreGateway,
    agent_caller: Arc<dyn AgentCaller>,
    invoker: Option<Arc<dyn ToolInvoker>>,
    limits: LimitsConfig,
}

impl ToolRouter {
    pub fn new(
        store: StoreGateway,
        agent_caller: Arc<dyn AgentCaller>,
        invoker: Option<Arc<dyn ToolInvoker>>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            store,
            agent_caller,
            invoker,
            limits,
        }
    }

    /// Tool definitions offered to the LLM for `agent`: the platform set
    /// plus whatever the agent's MCP bindings advertise.
    pub async fn definitions_for(&self, agent: &AgentDefinition) -> Vec<ToolDefinition> {
        let mut defs = platform_tool_definitions();

        if let Some(invoker) = &self.invoker {
            for (server, selection) in agent.mcp_servers.iter() {
                match invoker.list_tools(server).await {
                    Ok(tools) => {
                        for tool in tools {
                            if selection.allows(&tool)
                                && !defs.iter().any(|d| d.name == tool)
                            {
                                defs.push(ToolDefinition {
                                    name: tool.clone(),
                                    description: format!("Tool {tool} served by {server}"),
                                    parameters: json!({ "type": "object" }),
                                });
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            server,
                            error = %e,
                            "MCP tool listing failed, skipping server"
                        );
                    }
                }
            }
        }

        defs
    }

    /// Route one tool call and return the uniform result. Errors never
    /// escape as `Err` — they become failed `ToolResult`s so the LLM can
    /// react.
    pub async fn dispatch(
        &self,
        ctx: &ToolDispatchContext,
        tool_name: &str,
        arguments: &Value,
    ) -> ToolResult {
        // 1. Recursive agent call by prefix.
        if let Some(target) = tool_name.strip_prefix("agent:") {
            let message = arguments
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            return self.dispatch_agent_call(ctx, target, &message, None, false).await;
        }

        // 2. Platform tools.
        if PLATFORM_TOOLS.contains(&tool_name) {
            return self.dispatch_platform(ctx, tool_name, arguments).await;
        }

        // 3. MCP fallback, first matching binding wins.
        self.dispatch_external(ctx, tool_name, arguments).await
    }

    /// Record the call row for auditing. Failures here are logged, not
    /// surfaced — the tool result is what the LLM sees.
    fn record_call(
        &self,
        ctx: &ToolDispatchContext,
        call_id: &str,
        tool_name: &str,
        input: &Value,
        is_platform: bool,
        is_agent: bool,
    ) {
        let record = ToolCallRecord {
            id: call_id.to_owned(),
            step_id: ctx.step_id,
            org_id: ctx.org_id,
            tool_name: tool_name.to_owned(),
            input: input.clone(),
            is_platform_tool: is_platform,
            is_agent_call: is_agent,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.tool_calls.insert(ctx.org_id, record) {
            tracing::warn!(error = %e, tool_name, "failed to record tool call");
        }
    }

    // ── Agent calls ────────────────────────────────────────────────

    pub async fn dispatch_agent_call(
        &self,
        ctx: &ToolDispatchContext,
        target: &str,
        message: &str,
        context_data: Option<Value>,
        async_call: bool,
    ) -> ToolResult {
        // Allow-list first: empty set denies everything, "*" opts in.
        if !ctx.agent.may_call(target) {
            return ToolResult::err(
                ToolKind::Agent,
                format!(
                    "permission_denied: agent {} may not call {target}",
                    ctx.agent.name
                ),
            );
        }

        // Depth bound. The child would run at depth + 1.
        if ctx.depth + 1 > self.limits.max_depth {
            return ToolResult::err(
                ToolKind::Agent,
                format!(
                    "depth_limit: call to {target} would exceed max depth {}",
                    self.limits.max_depth
                ),
            );
        }

        // Circular-call refusal: calling back into an agent elsewhere on
        // the stack (A → B → A) is refused. Direct self-recursion is not a
        // cycle through another agent — it is allowed and bounded by the
        // depth limit.
        let current = ctx.call_stack.last().map(String::as_str).unwrap_or("");
        if target != current && ctx.call_stack.iter().any(|caller| caller == target) {
            return ToolResult::err(
                ToolKind::Agent,
                format!(
                    "circular_call: {target} is already on the call stack {:?}",
                    ctx.call_stack
                ),
            );
        }

        match self
            .agent_caller
            .call_agent(ctx, target, message, context_data, async_call)
            .await
        {
            Ok(outcome) => {
                let mut output = json!({ "taskId": outcome.task_id });
                if let Some(state) = &outcome.state {
                    output["state"] = json!(state);
                }
                if let Some(text) = &outcome.output {
                    output["output"] = json!(text);
                }
                if outcome.state.as_deref() == Some("failed") {
                    ToolResult::err(
                        ToolKind::Agent,
                        format!(
                            "agent {target} failed: {}",
                            outcome.output.as_deref().unwrap_or("no output")
                        ),
                    )
                } else {
                    ToolResult::ok(ToolKind::Agent, output)
                }
            }
            Err(e) => ToolResult::err(ToolKind::Agent, e.to_string()),
        }
    }

    // ── Platform tools ─────────────────────────────────────────────

    async fn dispatch_platform(
        &self,
        ctx: &ToolDispatchContext,
        tool_name: &str,
        arguments: &Value,
    ) -> ToolResult {
        let result = match tool_name {
            "run_data_write" => self.run_data_write(ctx, arguments),
            "run_data_read" => self.run_data_read(ctx, arguments),
            "run_data_query" => self.run_data_query(ctx, arguments),
            "run_data_list" => self.run_data_list(ctx, arguments),
            "run_data_delete" => self.run_data_delete(ctx, arguments),
            "call_agent" => {
                let Some(target) = arguments.get("agent").and_then(Value::as_str) else {
                    return ToolResult::err(ToolKind::Platform, "call_agent requires \"agent\"");
                };
                let message = arguments
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                let context_data = arguments.get("contextData").cloned();
                let async_call = arguments
                    .get("async")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                return self
                    .dispatch_agent_call(ctx, target, &message, context_data, async_call)
                    .await;
            }
            _ => unreachable!("platform dispatch on unknown tool {tool_name}"),
        };

        match result {
            Ok(output) => ToolResult::ok(ToolKind::Platform, output),
            Err(e) => ToolResult::err(ToolKind::Platform, e.to_string()),
        }
    }

    fn run_data_write(&self, ctx: &ToolDispatchContext, args: &Value) -> Result<Value> {
        let key = require_str(args, "key")?;
        let value = args
            .get("value")
            .cloned()
            .ok_or_else(|| shaman_domain::Error::InvalidRequest("missing \"value\"".into()))?;

        // Caller-supplied tags plus platform provenance tags.
        let mut tags: Vec<String> = args
            .get("tags")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        tags.push(format!("agent:{}", ctx.agent.name));
        tags.push(format!("step:{}", ctx.step_id));

        let entry = self.store.run_data.write(
            ctx.org_id,
            RunDataEntry {
                id: Uuid::new_v4(),
                run_id: ctx.run_id,
                org_id: ctx.org_id,
                key: key.to_owned(),
                value,
                created_by_step_id: Some(ctx.step_id),
                created_by_agent_name: Some(ctx.agent.name.clone()),
                tags,
                created_at: Utc::now(),
            },
        )?;
        Ok(json!({ "id": entry.id, "key": entry.key }))
    }

    fn run_data_read(&self, ctx: &ToolDispatchContext, args: &Value) -> Result<Value> {
        let key = require_str(args, "key")?;
        Ok(
            match self.store.run_data.read_latest(ctx.org_id, ctx.run_id, key) {
                Some(entry) => json!({
                    "value": entry.value,
                    "tags": entry.tags,
                    "created_at": entry.created_at,
                }),
                None => Value::Null,
            },
        )
    }

    fn run_data_query(&self, ctx: &ToolDispatchContext, args: &Value) -> Result<Value> {
        let filter = RunDataFilter {
            key: args.get("key").and_then(Value::as_str).map(String::from),
            key_starts_with: args
                .get("keyStartsWith")
                .and_then(Value::as_str)
                .map(String::from),
            tags: args
                .get("tags")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            limit: args.get("limit").and_then(Value::as_u64).map(|v| v as usize),
            offset: args.get("offset").and_then(Value::as_u64).map(|v| v as usize),
            sort_order: match args.get("sortOrder").and_then(Value::as_str) {
                Some("desc") => Some(SortOrder::Desc),
                Some("asc") => Some(SortOrder::Asc),
                _ => None,
            },
        };
        let page = self.store.run_data.query(ctx.org_id, ctx.run_id, &filter);
        Ok(json!({ "data": page.data, "pagination": page.pagination }))
    }

    fn run_data_list(&self, ctx: &ToolDispatchContext, args: &Value) -> Result<Value> {
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(100) as usize;
        let offset = args.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;
        let page = self.store.run_data.list(ctx.org_id, ctx.run_id, limit, offset);
        Ok(json!({ "data": page.data, "pagination": page.pagination }))
    }

    fn run_data_delete(&self, ctx: &ToolDispatchContext, args: &Value) -> Result<Value> {
        let key = require_str(args, "key")?;
        let deleted = self.store.run_data.delete(ctx.org_id, ctx.run_id, key);
        Ok(json!({ "deleted": deleted }))
    }

    // ── External (MCP) tools ───────────────────────────────────────

    async fn dispatch_external(
        &self,
        ctx: &ToolDispatchContext,
        tool_name: &str,
        arguments: &Value,
    ) -> ToolResult {
        let Some(invoker) = &self.invoker else {
            return ToolResult::err(
                ToolKind::External,
                format!("unknown tool {tool_name}: no MCP invoker configured"),
            );
        };

        for (server, selection) in ctx.agent.mcp_servers.iter() {
            if !selection.allows(tool_name) {
                continue;
            }
            let served = match invoker.list_tools(server).await {
                Ok(tools) => tools.iter().any(|t| t == tool_name),
                Err(e) => {
                    tracing::warn!(server, error = %e, "MCP listing failed");
                    false
                }
            };
            if !served {
                continue;
            }
            return match invoker.invoke(server, tool_name, arguments.clone()).await {
                Ok(output) => ToolResult::ok(ToolKind::External, output),
                Err(e) => ToolResult::err(ToolKind::External, e.to_string()),
            };
        }

        ToolResult::err(
            ToolKind::External,
            format!("unknown tool {tool_name}: no server of agent {} lists it", ctx.agent.name),
        )
    }

    /// Record-keeping entry point used by the executor around dispatch.
    pub fn record(&self, ctx: &ToolDispatchContext, call_id: &str, tool_name: &str, input: &Value) {
        let is_agent = tool_name == "call_agent" || tool_name.starts_with("agent:");
        let is_platform = !is_agent && PLATFORM_TOOLS.contains(&tool_name);
        self.record_call(ctx, call_id, tool_name, input, is_platform, is_agent);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Platform tool schemas
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn require_str<'a>(args: &'a Value, field: &str) -> Result<&'a str> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| shaman_domain::Error::InvalidRequest(format!("missing \"{field}\"")))
}

pub fn platform_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "run_data_write".into(),
            description: "Append a key/value record shared across this run.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string" },
                    "value": {},
                    "tags": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["key", "value"]
            }),
        },
        ToolDefinition {
            name: "run_data_read".into(),
            description: "Read the latest value stored under a key in this run.".into(),
            parameters: json!({
                "type": "object",
                "properties": { "key": { "type": "string" } },
                "required": ["key"]
            }),
        },
        ToolDefinition {
            name: "run_data_query".into(),
            description: "Query run data by key prefix and tags, with pagination.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string" },
                    "keyStartsWith": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "limit": { "type": "integer" },
                    "offset": { "type": "integer" },
                    "sortOrder": { "type": "string", "enum": ["asc", "desc"] }
                }
            }),
        },
        ToolDefinition {
            name: "run_data_list".into(),
            description: "List all run data entries, newest first.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer" },
                    "offset": { "type": "integer" }
                }
            }),
        },
        ToolDefinition {
            name: "run_data_delete".into(),
            description: "Delete every entry stored under a key in this run.".into(),
            parameters: json!({
                "type": "object",
                "properties": { "key": { "type": "string" } },
                "required": ["key"]
            }),
        },
        ToolDefinition {
            name: "call_agent".into(),
            description:
                "Call another agent and wait for its answer. Set async to true to \
                 get a task id back immediately instead."
                    .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "agent": { "type": "string" },
                    "message": { "type": "string" },
                    "contextData": {},
                    "async": { "type": "boolean" }
                },
                "required": ["agent", "message"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use shaman_domain::Error;

    struct NoCaller;

    #[async_trait::async_trait]
    impl AgentCaller for NoCaller {
        async fn call_agent(
            &self,
            _ctx: &ToolDispatchContext,
            target: &str,
            _message: &str,
            _context_data: Option<Value>,
            _async_call: bool,
        ) -> Result<AgentCallOutcome> {
            Ok(AgentCallOutcome {
                task_id: format!("task-for-{target}"),
                output: Some("done".into()),
                state: Some("completed".into()),
            })
        }
    }

    struct FailingInvoker;

    #[async_trait::async_trait]
    impl ToolInvoker for FailingInvoker {
        async fn invoke(&self, _server: &str, _tool: &str, _arguments: Value) -> Result<Value> {
            Err(Error::Other("unreachable".into()))
        }
        async fn list_tools(&self, _server: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    fn agent(allowed: &[&str]) -> AgentDefinition {
        serde_json::from_value(json!({
            "name": "Caller",
            "system_prompt": "p",
            "model": "m",
            "allowed_agents": allowed
        }))
        .unwrap()
    }

    fn ctx(agent_def: AgentDefinition, depth: u32, stack: &[&str]) -> ToolDispatchContext {
        ToolDispatchContext {
            org_id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            step_id: Uuid::new_v4(),
            agent: agent_def,
            call_stack: stack.iter().map(|s| s.to_string()).collect(),
            depth,
        }
    }

    fn router() -> ToolRouter {
        ToolRouter::new(
            StoreGateway::in_memory(),
            Arc::new(NoCaller),
            None,
            LimitsConfig::default(),
        )
    }

    #[tokio::test]
    async fn write_then_read_round_trips_with_platform_tags() {
        let router = router();
        let ctx = ctx(agent(&[]), 0, &["Caller"]);

        let write = router
            .dispatch(&ctx, "run_data_write", &json!({ "key": "x", "value": 42, "tags": ["mine"] }))
            .await;
        assert!(write.success, "{write:?}");
        assert_eq!(write.kind, ToolKind::Platform);

        let read = router
            .dispatch(&ctx, "run_data_read", &json!({ "key": "x" }))
            .await;
        let output = read.output.unwrap();
        assert_eq!(output["value"], 42);
        let tags: Vec<String> =
            serde_json::from_value(output["tags"].clone()).unwrap();
        assert!(tags.contains(&"mine".to_string()));
        assert!(tags.contains(&"agent:Caller".to_string()));
        assert!(tags.iter().any(|t| t.starts_with("step:")));
    }

    #[tokio::test]
    async fn read_missing_key_returns_null() {
        let router = router();
        let ctx = ctx(agent(&[]), 0, &["Caller"]);
        let read = router
            .dispatch(&ctx, "run_data_read", &json!({ "key": "missing" }))
            .await;
        assert!(read.success);
        assert_eq!(read.output, Some(Value::Null));
    }

    #[tokio::test]
    async fn delete_reports_count() {
        let router = router();
        let ctx = ctx(agent(&[]), 0, &["Caller"]);
        for _ in 0..2 {
            router
                .dispatch(&ctx, "run_data_write", &json!({ "key": "k", "value": 1 }))
                .await;
        }
        let deleted = router
            .dispatch(&ctx, "run_data_delete", &json!({ "key": "k" }))
            .await;
        assert_eq!(deleted.output.unwrap()["deleted"], 2);
    }

    #[tokio::test]
    async fn call_agent_denied_when_not_allowed() {
        let router = router();
        let ctx = ctx(agent(&[]), 0, &["Caller"]);
        let result = router
            .dispatch(&ctx, "call_agent", &json!({ "agent": "Other", "message": "hi" }))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("permission_denied"));
    }

    #[tokio::test]
    async fn call_agent_depth_limit_is_tool_error() {
        let router = router();
        let ctx = ctx(agent(&["*"]), 10, &["Caller"]);
        let result = router
            .dispatch(&ctx, "call_agent", &json!({ "agent": "Other", "message": "hi" }))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("depth_limit"));
        assert_eq!(result.kind, ToolKind::Agent);
    }

    #[tokio::test]
    async fn circular_call_refused_but_self_recursion_allowed() {
        let router = router();
        // A → B → A is circular.
        let ctx_b = ctx(agent(&["*"]), 1, &["A", "B"]);
        let result = router
            .dispatch(&ctx_b, "call_agent", &json!({ "agent": "A", "message": "hi" }))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("circular_call"));

        // X → X self-recursion is bounded by depth, not circularity.
        let ctx_x = ctx(
            {
                let mut a = agent(&["*"]);
                a.name = "X".into();
                a
            },
            1,
            &["X", "X"],
        );
        let result = router
            .dispatch(&ctx_x, "call_agent", &json!({ "agent": "X", "message": "go" }))
            .await;
        assert!(result.success, "{result:?}");
    }

    #[tokio::test]
    async fn agent_prefix_routes_to_caller() {
        let router = router();
        let ctx = ctx(agent(&["Helper"]), 0, &["Caller"]);
        let result = router
            .dispatch(&ctx, "agent:Helper", &json!({ "message": "hi" }))
            .await;
        assert!(result.success);
        assert_eq!(result.output.unwrap()["taskId"], "task-for-Helper");
    }

    #[tokio::test]
    async fn unknown_tool_without_invoker_errors() {
        let router = router();
        let ctx = ctx(agent(&[]), 0, &["Caller"]);
        let result = router.dispatch(&ctx, "web_search", &json!({})).await;
        assert!(!result.success);
        assert_eq!(result.kind, ToolKind::External);
    }

    #[tokio::test]
    async fn unknown_tool_with_empty_invoker_names_agent() {
        let router = ToolRouter::new(
            StoreGateway::in_memory(),
            Arc::new(NoCaller),
            Some(Arc::new(FailingInvoker)),
            LimitsConfig::default(),
        );
        let ctx = ctx(agent(&[]), 0, &["Caller"]);
        let result = router.dispatch(&ctx, "web_search", &json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown tool web_search"));
    }

    #[test]
    fn platform_definitions_cover_the_closed_set() {
        let defs = platform_tool_definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, PLATFORM_TOOLS);
    }
}
