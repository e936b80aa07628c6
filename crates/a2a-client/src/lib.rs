//! JSON-RPC/SSE client for the A2A surface.
//!
//! Used by the scheduler and workers for recursive internal calls, and by
//! external callers as a library interface. Remote failures come back as
//! error values — the only panics are bugs.

mod backoff;
mod sse;

pub use backoff::RetryPolicy;
pub use sse::SseParser;

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use shaman_domain::stream::BoxStream;
use shaman_domain::{Error, Result};
use shaman_protocol::{
    codes, methods, A2aMessage, A2aTask, JsonRpcRequest, JsonRpcResponse, MessageSendParams,
    TaskIdParams,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Credential presented to the server.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Public persona: `X-API-Key` header.
    ApiKey(String),
    /// Internal persona: `Authorization: Bearer <jwt>`.
    Bearer(String),
    None,
}

/// A `message/send` result: the server answers with a task handle, or a
/// bare message for trivially-answered requests.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Task(A2aTask),
    Message(A2aMessage),
}

/// One item of a streaming response.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Task(A2aTask),
    Message(A2aMessage),
}

pub struct A2aClient {
    base_url: String,
    credential: Credential,
    client: reqwest::Client,
    retry: RetryPolicy,
    /// Monotonic request ids, per client instance.
    next_id: AtomicU64,
}

impl A2aClient {
    pub fn new(base_url: impl Into<String>, credential: Credential) -> Self {
        Self {
            base_url: base_url.into(),
            credential,
            client: reqwest::Client::new(),
            retry: RetryPolicy::default(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // ── Unary methods ──────────────────────────────────────────────

    pub async fn send_message(&self, params: &MessageSendParams) -> Result<SendOutcome> {
        let result = self
            .call_unary(methods::MESSAGE_SEND, serde_json::to_value(params)?)
            .await?;
        decode_send_outcome(result)
    }

    pub async fn get_task(&self, id: &str) -> Result<A2aTask> {
        let result = self
            .call_unary(
                methods::TASKS_GET,
                serde_json::to_value(TaskIdParams { id: id.into() })?,
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn cancel_task(&self, id: &str) -> Result<A2aTask> {
        let result = self
            .call_unary(
                methods::TASKS_CANCEL,
                serde_json::to_value(TaskIdParams { id: id.into() })?,
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    // ── Streaming methods ──────────────────────────────────────────

    /// `message/stream`: the initial task followed by status updates and
    /// messages until the run terminates.
    pub async fn stream_message(
        &self,
        params: &MessageSendParams,
    ) -> Result<BoxStream<'static, Result<StreamItem>>> {
        self.call_streaming(methods::MESSAGE_STREAM, serde_json::to_value(params)?)
            .await
    }

    /// `tasks/resubscribe`: current state first, then subsequent updates.
    pub async fn resubscribe(
        &self,
        id: &str,
    ) -> Result<BoxStream<'static, Result<StreamItem>>> {
        self.call_streaming(
            methods::TASKS_RESUBSCRIBE,
            serde_json::to_value(TaskIdParams { id: id.into() })?,
        )
        .await
    }

    // ── Internals ──────────────────────────────────────────────────

    fn rpc_url(&self) -> String {
        format!("{}/a2a/v1", self.base_url.trim_end_matches('/'))
    }

    fn next_request(&self, method: &str, params: Value) -> JsonRpcRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) as i64;
        JsonRpcRequest::new(id, method, params)
    }

    fn apply_credential(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credential {
            Credential::ApiKey(key) => builder.header("X-API-Key", key),
            Credential::Bearer(token) => {
                builder.header("Authorization", format!("Bearer {token}"))
            }
            Credential::None => builder,
        }
    }

    /// Whether an HTTP response status warrants a retry.
    fn status_retryable(status: reqwest::StatusCode) -> bool {
        status.is_server_error() || status.as_u16() == 429
    }

    async fn call_unary(&self, method: &str, params: Value) -> Result<Value> {
        let request = self.next_request(method, params);

        let mut attempt: u32 = 0;
        loop {
            let send_result = self
                .apply_credential(self.client.post(self.rpc_url()))
                .json(&request)
                .send()
                .await;

            let retry_reason = match send_result {
                Ok(resp) if Self::status_retryable(resp.status()) => {
                    format!("HTTP {}", resp.status())
                }
                Ok(resp) => {
                    let body: JsonRpcResponse = resp
                        .json()
                        .await
                        .map_err(|e| Error::Http(format!("invalid JSON-RPC response: {e}")))?;
                    return response_result(body);
                }
                Err(e) => e.to_string(),
            };

            if self.retry.attempts_exhausted(attempt) {
                return Err(Error::Http(format!(
                    "{method} failed after {} attempts: {retry_reason}",
                    attempt + 1
                )));
            }
            let delay = self.retry.delay_for_attempt(attempt);
            tracing::warn!(
                method,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %retry_reason,
                "retrying A2A call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn call_streaming(
        &self,
        method: &str,
        params: Value,
    ) -> Result<BoxStream<'static, Result<StreamItem>>> {
        let request = self.next_request(method, params);

        let resp = self
            .apply_credential(self.client.post(self.rpc_url()))
            .header("Accept", "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            // Streaming endpoints answer errors as plain JSON-RPC bodies.
            if let Ok(rpc) = serde_json::from_str::<JsonRpcResponse>(&body) {
                if let Err(e) = response_result(rpc) {
                    return Err(e);
                }
            }
            return Err(Error::Http(format!("{method}: HTTP {status}")));
        }

        let stream = async_stream::stream! {
            let mut resp = resp;
            let mut parser = SseParser::new();

            loop {
                match resp.chunk().await {
                    Ok(Some(bytes)) => {
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        for payload in parser.feed(&text) {
                            if let Some(item) = decode_stream_payload(&payload) {
                                yield item;
                            }
                        }
                    }
                    Ok(None) => {
                        if let Some(payload) = parser.finish() {
                            if let Some(item) = decode_stream_payload(&payload) {
                                yield item;
                            }
                        }
                        break;
                    }
                    Err(e) => {
                        yield Err(Error::Http(e.to_string()));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decoding helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map a JSON-RPC response onto the shared error taxonomy.
fn response_result(response: JsonRpcResponse) -> Result<Value> {
    if let Some(err) = response.error {
        return Err(match err.code {
            codes::TASK_NOT_FOUND => Error::NotFound(err.message),
            codes::UNAUTHORIZED => Error::Unauthorized(err.message),
            codes::TASK_NOT_CANCELABLE => Error::TaskNotCancelable(err.message),
            codes::CIRCULAR_CALL => Error::CircularCall(err.message),
            codes::INVALID_PARAMS | codes::INVALID_REQUEST => Error::InvalidRequest(err.message),
            _ => Error::Other(format!("remote error {}: {}", err.code, err.message)),
        });
    }
    response
        .result
        .ok_or_else(|| Error::Other("JSON-RPC response carried neither result nor error".into()))
}

fn decode_send_outcome(result: Value) -> Result<SendOutcome> {
    match result.get("kind").and_then(Value::as_str) {
        Some("task") => Ok(SendOutcome::Task(serde_json::from_value(result)?)),
        Some("message") => Ok(SendOutcome::Message(serde_json::from_value(result)?)),
        other => Err(Error::Other(format!(
            "unexpected result kind {other:?} from message/send"
        ))),
    }
}

/// Decode one SSE `data:` payload. Payloads are JSON-RPC responses whose
/// `result` is a task or message; undecodable payloads are skipped.
fn decode_stream_payload(payload: &str) -> Option<Result<StreamItem>> {
    let rpc: JsonRpcResponse = match serde_json::from_str(payload) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(error = %e, "skipping undecodable SSE payload");
            return None;
        }
    };
    let result = match response_result(rpc) {
        Ok(v) => v,
        Err(e) => return Some(Err(e)),
    };
    match result.get("kind").and_then(Value::as_str) {
        Some("task") => match serde_json::from_value(result) {
            Ok(task) => Some(Ok(StreamItem::Task(task))),
            Err(e) => Some(Err(Error::Json(e))),
        },
        Some("message") => match serde_json::from_value(result) {
            Ok(msg) => Some(Ok(StreamItem::Message(msg))),
            Err(e) => Some(Err(Error::Json(e))),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shaman_protocol::{JsonRpcError, RequestId, TaskState};

    #[test]
    fn request_ids_increase_monotonically() {
        let client = A2aClient::new("http://localhost:4001", Credential::None);
        let r1 = client.next_request("tasks/get", Value::Null);
        let r2 = client.next_request("tasks/get", Value::Null);
        match (r1.id.unwrap(), r2.id.unwrap()) {
            (RequestId::Number(a), RequestId::Number(b)) => assert!(b > a),
            other => panic!("expected numeric ids, got {other:?}"),
        }
    }

    #[test]
    fn remote_task_not_found_maps_to_not_found() {
        let resp = JsonRpcResponse::err(
            None,
            JsonRpcError::new(codes::TASK_NOT_FOUND, "task not found"),
        );
        assert!(matches!(
            response_result(resp),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn remote_not_cancelable_maps_to_typed_error() {
        let resp = JsonRpcResponse::err(
            None,
            JsonRpcError::new(codes::TASK_NOT_CANCELABLE, "already completed"),
        );
        assert!(matches!(
            response_result(resp),
            Err(Error::TaskNotCancelable(_))
        ));
    }

    #[test]
    fn stream_payload_decodes_task() {
        let task = A2aTask::new("t1", "ctx", TaskState::Working);
        let payload = serde_json::to_string(&JsonRpcResponse::ok(
            None,
            serde_json::to_value(&task).unwrap(),
        ))
        .unwrap();
        match decode_stream_payload(&payload) {
            Some(Ok(StreamItem::Task(t))) => assert_eq!(t.id, "t1"),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn stream_payload_skips_garbage() {
        assert!(decode_stream_payload("not json").is_none());
    }

    #[test]
    fn send_outcome_distinguishes_kind() {
        let task = serde_json::to_value(A2aTask::new("t", "c", TaskState::Submitted)).unwrap();
        assert!(matches!(
            decode_send_outcome(task),
            Ok(SendOutcome::Task(_))
        ));
        let msg =
            serde_json::to_value(A2aMessage::agent_text("m", "hello")).unwrap();
        assert!(matches!(
            decode_send_outcome(msg),
            Ok(SendOutcome::Message(_))
        ));
        assert!(decode_send_outcome(serde_json::json!({ "kind": "mystery" })).is_err());
    }
}
