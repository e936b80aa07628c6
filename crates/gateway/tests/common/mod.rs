//! Shared test harness: scripted LLM provider, seeded config, and an
//! internal persona server on an ephemeral port for recursive calls.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use shaman_domain::chat::{ChatRole, ToolCall};
use shaman_domain::config::Config;
use shaman_domain::error::Result;
use shaman_domain::stream::{BoxStream, CompletionChunk, FinishReason, Usage};
use shaman_gateway::api;
use shaman_gateway::api::auth::{ApiKeyIndex, AuthContext, Persona};
use shaman_gateway::state::{AppBuilder, AppState};
use shaman_providers::{CompletionRequest, CompletionResponse, LlmProvider, ProviderRegistry};

pub const API_KEY_A: &str = "test-key-org-a";
pub const API_KEY_B: &str = "test-key-org-b";
pub const JWT_SECRET: &str = "test-jwt-secret";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deterministic provider: behavior is keyed on a marker word in the
/// system prompt, so each test agent scripts its own conversation.
pub struct ScriptedProvider;

fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

fn respond_content(text: impl Into<String>) -> CompletionResponse {
    CompletionResponse {
        content: Some(text.into()),
        tool_calls: Vec::new(),
        finish_reason: FinishReason::Stop,
        usage: Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
        },
    }
}

fn respond_tools(tool_calls: Vec<ToolCall>) -> CompletionResponse {
    CompletionResponse {
        content: None,
        tool_calls,
        finish_reason: FinishReason::ToolCalls,
        usage: Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
        },
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let system = req
            .messages
            .iter()
            .find(|m| m.role == ChatRole::System)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let user = req
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::User)
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let tool_messages: Vec<&str> = req
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::Tool)
            .map(|m| m.content.as_str())
            .collect();

        if system.contains("ECHO") {
            return Ok(respond_content(format!("You said: {user}")));
        }

        if system.contains("STORE_THEN_READ") {
            return Ok(match tool_messages.len() {
                0 => respond_tools(vec![tool_call(
                    "call_write",
                    "run_data_write",
                    json!({ "key": "x", "value": 42 }),
                )]),
                1 => respond_tools(vec![tool_call(
                    "call_read",
                    "run_data_read",
                    json!({ "key": "x" }),
                )]),
                _ => {
                    let read_back = tool_messages.last().copied().unwrap_or("");
                    if read_back.contains("42") {
                        respond_content("Stored and read back x = 42")
                    } else {
                        respond_content(format!("read failed: {read_back}"))
                    }
                }
            });
        }

        if system.contains("ORCHESTRATE") {
            if let Some(worker_said) = tool_messages.iter().find(|m| m.contains("output")) {
                return Ok(respond_content(format!("delegated ok: {worker_said}")));
            }
            return Ok(respond_tools(vec![tool_call(
                "call_worker",
                "call_agent",
                json!({ "agent": "WorkerAgent", "message": "please do the work" }),
            )]));
        }

        if system.contains("WORKER") {
            return Ok(respond_content("work done"));
        }

        if system.contains("LOOPER") {
            // Stop on the refusal itself, or on a child that already
            // stopped — either way the recursion unwinds.
            if tool_messages
                .iter()
                .any(|m| m.contains("depth_limit") || m.contains("stopped"))
            {
                return Ok(respond_content("stopped at the depth limit"));
            }
            return Ok(respond_tools(vec![tool_call(
                "call_self",
                "call_agent",
                json!({ "agent": "Looper", "message": "go deeper" }),
            )]));
        }

        if system.contains("SLEEPER") {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let tick = tool_messages.len();
            return Ok(respond_tools(vec![tool_call(
                &format!("tick_{tick}"),
                "run_data_write",
                json!({ "key": "tick", "value": tick }),
            )]));
        }

        Ok(respond_content("unscripted agent"))
    }

    async fn stream(
        &self,
        req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<CompletionChunk>>> {
        let response = self.complete(req).await?;
        let stream = async_stream::stream! {
            if let Some(content) = response.content {
                yield Ok(CompletionChunk::Content { text: content });
            }
            yield Ok(CompletionChunk::Finish {
                reason: response.finish_reason,
                usage: Some(response.usage),
            });
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TestHarness {
    pub state: AppState,
    pub org_a: Uuid,
    pub org_b: Uuid,
    pub internal_addr: SocketAddr,
}

impl TestHarness {
    pub fn auth_a(&self) -> AuthContext {
        AuthContext {
            org_id: self.org_a,
            user_id: Some("tester".into()),
            run_id: None,
            persona: Persona::Public,
        }
    }

    pub fn auth_b(&self) -> AuthContext {
        AuthContext {
            org_id: self.org_b,
            user_id: None,
            run_id: None,
            persona: Persona::Public,
        }
    }
}

fn agent(system_marker: &str, allowed: &[&str], exposed: bool) -> serde_json::Value {
    let max_iterations = if system_marker == "SLEEPER" { 100 } else { 10 };
    json!({
        "description": format!("test agent {system_marker}"),
        "system_prompt": format!("You are a test agent. Mode: {system_marker}."),
        "model": "test-model",
        "allowed_agents": allowed,
        "exposed": exposed,
        "max_iterations": max_iterations,
    })
}

pub fn test_config(org_a: Uuid, org_b: Uuid) -> Config {
    let config = json!({
        "server": {
            "public_port": 0,
            "internal_port": 1,
            "host": "127.0.0.1"
        },
        "auth": {
            "api_keys": [
                { "org_id": org_a, "key_hash": ApiKeyIndex::digest_hex(API_KEY_A) },
                { "org_id": org_b, "key_hash": ApiKeyIndex::digest_hex(API_KEY_B) }
            ]
        },
        "queue": { "worker_concurrency": 32 },
        "limits": { "max_depth": 10, "step_timeout_ms": 30_000 },
        "agents": {
            "EchoAgent": agent("ECHO", &[], true),
            "DataProcessorAgent": agent("STORE_THEN_READ", &[], true),
            "OrchestratorAgent": agent("ORCHESTRATE", &["WorkerAgent"], true),
            "WorkerAgent": agent("WORKER", &[], false),
            "Looper": agent("LOOPER", &["Looper"], false),
            "Sleeper": agent("SLEEPER", &[], false)
        }
    });
    serde_json::from_value(config).expect("test config deserializes")
}

/// Build the full service graph with the scripted provider and a live
/// internal persona server for recursion.
pub async fn harness() -> TestHarness {
    let org_a = Uuid::new_v4();
    let org_b = Uuid::new_v4();
    let config = Arc::new(test_config(org_a, org_b));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind internal listener");
    let internal_addr = listener.local_addr().unwrap();

    let state = AppBuilder::new(config)
        .providers(Arc::new(ProviderRegistry::single(Arc::new(ScriptedProvider))))
        .internal_url(format!("http://{internal_addr}"))
        .jwt_secret(JWT_SECRET)
        .build();

    let internal = api::internal_router(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, internal.into_make_service()).await;
    });

    TestHarness {
        state,
        org_a,
        org_b,
        internal_addr,
    }
}

/// Poll until `predicate` passes or the deadline hits.
pub async fn wait_until<F>(timeout: Duration, mut predicate: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
