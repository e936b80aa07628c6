//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Ollama, vLLM, Together, and any other endpoint that
//! follows the OpenAI chat completions contract.

use serde_json::Value;

use shaman_domain::chat::{ChatMessage, ChatRole, ToolCall, ToolDefinition};
use shaman_domain::config::LlmProviderConfig;
use shaman_domain::error::{Error, Result};
use shaman_domain::stream::{
    BoxStream, CompletionChunk, FinishReason, ToolCallFunction, Usage,
};

use crate::sse::sse_response_stream;
use crate::traits::{CompletionRequest, CompletionResponse, LlmProvider, ToolChoice};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider from its config entry. The API key is read once
    /// from the environment variable the config names.
    pub fn from_config(id: &str, cfg: &LlmProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env).unwrap_or_default();
        if api_key.is_empty() {
            tracing::warn!(
                provider = id,
                env_var = %cfg.api_key_env,
                "no API key in environment — requests will be unauthenticated"
            );
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            id: id.to_owned(),
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }
        builder
    }

    fn build_body(&self, req: &CompletionRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "stream": stream,
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = match req.tool_choice {
                ToolChoice::Auto => Value::String("auto".into()),
                ToolChoice::None => Value::String("none".into()),
                ToolChoice::Required => Value::String("required".into()),
            };
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }

    /// Map a non-success HTTP status onto the shared error taxonomy.
    fn status_error(&self, status: reqwest::StatusCode, body: &str) -> Error {
        if status.as_u16() == 429 {
            Error::RateLimited(format!("{}: {body}", self.id))
        } else if status.is_server_error() {
            Error::ProviderUnavailable(format!("{}: HTTP {status}", self.id))
        } else if status.as_u16() == 400 {
            Error::InvalidRequest(format!("{}: {body}", self.id))
        } else {
            Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {body}", status.as_u16()),
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

fn msg_to_openai(msg: &ChatMessage) -> Value {
    match msg.role {
        ChatRole::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
            "content": msg.content,
        }),
        ChatRole::Assistant if !msg.tool_calls.is_empty() => {
            let tool_calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.arguments.to_string(),
                        }
                    })
                })
                .collect();
            serde_json::json!({
                "role": "assistant",
                "content": if msg.content.is_empty() { Value::Null } else { Value::String(msg.content.clone()) },
                "tool_calls": tool_calls,
            })
        }
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content,
        }),
    }
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_finish_reason(s: Option<&str>) -> FinishReason {
    match s {
        Some("length") => FinishReason::Length,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()?,
        completion_tokens: v.get("completion_tokens")?.as_u64()?,
    })
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(Value::as_array) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments").and_then(Value::as_str).unwrap_or("{}");
            let arguments: Value =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            Some(ToolCall { id, name, arguments })
        })
        .collect()
}

fn parse_completion(provider: &str, body: &Value) -> Result<CompletionResponse> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Provider {
        provider: provider.into(),
        message: "no message in choice".into(),
    })?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from);
    let tool_calls = parse_tool_calls(message);
    let finish_reason =
        parse_finish_reason(choice.get("finish_reason").and_then(Value::as_str));
    let usage = body
        .get("usage")
        .and_then(parse_usage)
        .unwrap_or_default();

    Ok(CompletionResponse {
        content,
        tool_calls,
        finish_reason,
        usage,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_stream_data(data: &str) -> Vec<Result<CompletionChunk>> {
    if data.trim() == "[DONE]" {
        return Vec::new(); // the finish chunk already carried the reason
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let choice = v
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|a| a.first());

    // Usage-only chunk (stream_options.include_usage).
    let Some(choice) = choice else {
        if let Some(usage) = v.get("usage").and_then(parse_usage) {
            return vec![Ok(CompletionChunk::Finish {
                reason: FinishReason::Stop,
                usage: Some(usage),
            })];
        }
        return Vec::new();
    };

    if let Some(fr) = choice.get("finish_reason").and_then(Value::as_str) {
        return vec![Ok(CompletionChunk::Finish {
            reason: parse_finish_reason(Some(fr)),
            usage: v.get("usage").and_then(parse_usage),
        })];
    }

    let delta = choice.get("delta").unwrap_or(&Value::Null);
    let mut chunks = Vec::new();

    if let Some(tc_arr) = delta.get("tool_calls").and_then(Value::as_array) {
        for tc in tc_arr {
            let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let id = tc
                .get("id")
                .and_then(Value::as_str)
                .map(String::from);
            let name = tc
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .map(String::from);
            let arguments = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            chunks.push(Ok(CompletionChunk::ToolCallDelta {
                index,
                id,
                function: ToolCallFunction { name, arguments },
            }));
        }
    }

    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            chunks.push(Ok(CompletionChunk::Content {
                text: text.to_string(),
            }));
        }
    }

    chunks
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(req, false);

        tracing::debug!(provider = %self.id, model = %req.model, "completion request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(self.status_error(status, &text));
        }

        let json: Value = serde_json::from_str(&text)?;
        parse_completion(&self.id, &json)
    }

    async fn stream(
        &self,
        req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<CompletionChunk>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(req, true);

        tracing::debug!(provider = %self.id, model = %req.model, "streaming request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(self.status_error(status, &text));
        }

        Ok(sse_response_stream(resp, parse_stream_data))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_message_with_tool_calls_serializes_arguments_as_string() {
        let msg = ChatMessage::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "c1".into(),
                name: "run_data_write".into(),
                arguments: json!({ "key": "x", "value": 42 }),
            }],
        );
        let wire = msg_to_openai(&msg);
        assert_eq!(wire["role"], "assistant");
        assert!(wire["content"].is_null());
        let args = wire["tool_calls"][0]["function"]["arguments"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(args).unwrap();
        assert_eq!(parsed["value"], 42);
    }

    #[test]
    fn tool_message_carries_call_id() {
        let wire = msg_to_openai(&ChatMessage::tool_result("c1", "out"));
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "c1");
    }

    #[test]
    fn parse_completion_with_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "run_data_read", "arguments": "{\"key\":\"x\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 7 }
        });
        let resp = parse_completion("test", &body).unwrap();
        assert!(resp.content.is_none());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].arguments["key"], "x");
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
        assert_eq!(resp.usage.prompt_tokens, 12);
    }

    #[test]
    fn parse_completion_without_choices_is_provider_error() {
        assert!(parse_completion("test", &json!({})).is_err());
    }

    #[test]
    fn stream_content_delta() {
        let chunks =
            parse_stream_data(r#"{"choices":[{"delta":{"content":"hel"}}]}"#);
        assert_eq!(chunks.len(), 1);
        assert!(matches!(
            chunks[0].as_ref().unwrap(),
            CompletionChunk::Content { text } if text == "hel"
        ));
    }

    #[test]
    fn stream_finish_reason_with_usage() {
        let chunks = parse_stream_data(
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":1}}"#,
        );
        match chunks[0].as_ref().unwrap() {
            CompletionChunk::Finish { reason, usage } => {
                assert_eq!(*reason, FinishReason::Stop);
                assert_eq!(usage.unwrap().prompt_tokens, 3);
            }
            other => panic!("expected finish, got {other:?}"),
        }
    }

    #[test]
    fn stream_tool_call_delta_carries_index() {
        let chunks = parse_stream_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"c2","function":{"name":"f","arguments":"{\"a\""}}]}}]}"#,
        );
        match chunks[0].as_ref().unwrap() {
            CompletionChunk::ToolCallDelta { index, id, function } => {
                assert_eq!(*index, 1);
                assert_eq!(id.as_deref(), Some("c2"));
                assert_eq!(function.name.as_deref(), Some("f"));
                assert_eq!(function.arguments, "{\"a\"");
            }
            other => panic!("expected tool call delta, got {other:?}"),
        }
    }

    #[test]
    fn stream_done_sentinel_yields_nothing() {
        assert!(parse_stream_data("[DONE]").is_empty());
    }
}
