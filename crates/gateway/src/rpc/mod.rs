//! JSON-RPC 2.0 transport: method registry, per-request context, dispatch.
//!
//! Single and batch requests decode through [`RpcPayload`]; each element is
//! validated and dispatched independently so one bad element in a batch
//! does not sink the others. Batch responses preserve request order, though
//! callers must only rely on id matching.

pub mod sse;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use shaman_domain::stream::BoxStream;
use shaman_domain::{Error, Result};
use shaman_protocol::{
    codes, methods, JsonRpcError, JsonRpcRequest, JsonRpcResponse, MessageSendParams, RequestId,
    TaskIdParams,
};

use crate::api::auth::AuthContext;
use crate::runtime::{RunEvent, Scheduler};

pub type BoxFut<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub type EventStream = BoxStream<'static, RunEvent>;

/// Per-request context handed to method handlers.
#[derive(Clone)]
pub struct RequestContext {
    pub auth: AuthContext,
    pub correlation_id: Uuid,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Method registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type UnaryFn = Arc<dyn Fn(RequestContext, Value) -> BoxFut<Result<Value>> + Send + Sync>;
type StreamFn = Arc<dyn Fn(RequestContext, Value) -> BoxFut<Result<EventStream>> + Send + Sync>;

pub enum RpcHandler {
    Unary(UnaryFn),
    Streaming(StreamFn),
}

/// Name → (handler, streaming?) registry. Both personas expose the same
/// method set; authentication differs at the HTTP layer.
pub struct MethodRegistry {
    methods: HashMap<&'static str, RpcHandler>,
}

impl MethodRegistry {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let mut methods: HashMap<&'static str, RpcHandler> = HashMap::new();

        let s = scheduler.clone();
        methods.insert(
            methods::MESSAGE_SEND,
            RpcHandler::Unary(Arc::new(move |ctx, params| {
                let s = s.clone();
                Box::pin(async move {
                    let params: MessageSendParams = parse_params(params)?;
                    let task = s.send_message(params, &ctx.auth).await?;
                    Ok(serde_json::to_value(task)?)
                })
            })),
        );

        let s = scheduler.clone();
        methods.insert(
            methods::TASKS_GET,
            RpcHandler::Unary(Arc::new(move |ctx, params| {
                let s = s.clone();
                Box::pin(async move {
                    let params: TaskIdParams = parse_params(params)?;
                    let task = s.get_task(&params.id, &ctx.auth).await?;
                    Ok(serde_json::to_value(task)?)
                })
            })),
        );

        let s = scheduler.clone();
        methods.insert(
            methods::TASKS_CANCEL,
            RpcHandler::Unary(Arc::new(move |ctx, params| {
                let s = s.clone();
                Box::pin(async move {
                    let params: TaskIdParams = parse_params(params)?;
                    let task = s.cancel_task(&params.id, &ctx.auth).await?;
                    Ok(serde_json::to_value(task)?)
                })
            })),
        );

        let s = scheduler.clone();
        methods.insert(
            methods::MESSAGE_STREAM,
            RpcHandler::Streaming(Arc::new(move |ctx, params| {
                let s = s.clone();
                Box::pin(async move {
                    let params: MessageSendParams = parse_params(params)?;
                    s.stream_message(params, &ctx.auth).await
                })
            })),
        );

        let s = scheduler;
        methods.insert(
            methods::TASKS_RESUBSCRIBE,
            RpcHandler::Streaming(Arc::new(move |ctx, params| {
                let s = s.clone();
                Box::pin(async move {
                    let params: TaskIdParams = parse_params(params)?;
                    s.resubscribe(&params.id, &ctx.auth).await
                })
            })),
        );

        Self { methods }
    }

    pub fn get(&self, method: &str) -> Option<&RpcHandler> {
        self.methods.get(method)
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::InvalidRequest(format!("invalid params: {e}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map the shared error taxonomy onto JSON-RPC codes. Cross-tenant and
/// unknown ids both answer "task not found" so tenants cannot enumerate
/// each other; internal detail never leaves the process.
pub fn error_to_rpc(error: &Error) -> JsonRpcError {
    match error {
        Error::NotFound(_) => JsonRpcError::new(codes::TASK_NOT_FOUND, "task not found"),
        Error::Unauthorized(msg) => JsonRpcError::new(codes::UNAUTHORIZED, msg.clone()),
        Error::TaskNotCancelable(msg) => {
            JsonRpcError::new(codes::TASK_NOT_CANCELABLE, msg.clone())
        }
        Error::CircularCall(msg) => JsonRpcError::new(codes::CIRCULAR_CALL, msg.clone()),
        Error::InvalidRequest(msg) => JsonRpcError::new(codes::INVALID_PARAMS, msg.clone()),
        Error::AgentNotFound(name) => {
            JsonRpcError::new(codes::INVALID_PARAMS, format!("unknown agent: {name}"))
        }
        Error::DepthLimit(msg) => JsonRpcError::new(codes::INVALID_PARAMS, msg.clone()),
        other => {
            tracing::error!(error = %other, "request failed internally");
            JsonRpcError::new(codes::INTERNAL_ERROR, "internal error")
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub enum DispatchOutcome {
    Response(JsonRpcResponse),
    Stream {
        id: Option<RequestId>,
        stream: EventStream,
    },
}

/// Validate and run one request element. Streaming methods are only legal
/// where the transport can answer with SSE (single requests).
pub async fn dispatch_value(
    registry: &MethodRegistry,
    ctx: RequestContext,
    raw: Value,
    allow_streaming: bool,
) -> DispatchOutcome {
    let request: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(req) => req,
        Err(e) => {
            return DispatchOutcome::Response(JsonRpcResponse::err(
                None,
                JsonRpcError::new(codes::INVALID_REQUEST, format!("invalid request: {e}")),
            ));
        }
    };
    if !request.is_valid() {
        return DispatchOutcome::Response(JsonRpcResponse::err(
            request.id,
            JsonRpcError::new(codes::INVALID_REQUEST, "invalid request"),
        ));
    }

    let id = request.id.clone();
    let params = request.params.unwrap_or(Value::Null);

    tracing::debug!(
        method = %request.method,
        correlation_id = %ctx.correlation_id,
        "dispatching"
    );

    match registry.get(&request.method) {
        None => DispatchOutcome::Response(JsonRpcResponse::err(
            id,
            JsonRpcError::new(
                codes::METHOD_NOT_FOUND,
                format!("method not found: {}", request.method),
            ),
        )),
        Some(RpcHandler::Unary(handler)) => match handler(ctx, params).await {
            Ok(result) => DispatchOutcome::Response(JsonRpcResponse::ok(id, result)),
            Err(e) => DispatchOutcome::Response(JsonRpcResponse::err(id, error_to_rpc(&e))),
        },
        Some(RpcHandler::Streaming(handler)) => {
            if !allow_streaming {
                return DispatchOutcome::Response(JsonRpcResponse::err(
                    id,
                    JsonRpcError::new(
                        codes::INVALID_REQUEST,
                        "streaming methods are not allowed in a batch",
                    ),
                ));
            }
            match handler(ctx, params).await {
                Ok(stream) => DispatchOutcome::Stream { id, stream },
                Err(e) => DispatchOutcome::Response(JsonRpcResponse::err(id, error_to_rpc(&e))),
            }
        }
    }
}
