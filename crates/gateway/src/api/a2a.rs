//! The JSON-RPC endpoint mounted at `POST /a2a/v1` on both personas.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use uuid::Uuid;

use shaman_protocol::{JsonRpcResponse, RpcPayload};

use crate::api::auth::AuthContext;
use crate::rpc::{dispatch_value, sse::sse_response, DispatchOutcome, RequestContext};
use crate::state::AppState;

pub async fn rpc_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Bytes,
) -> Response {
    let payload = match RpcPayload::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            return Json(JsonRpcResponse::err(None, err)).into_response();
        }
    };

    match payload {
        RpcPayload::Single(value) => {
            let ctx = RequestContext {
                auth: auth.clone(),
                correlation_id: Uuid::new_v4(),
            };
            match dispatch_value(&state.registry, ctx, value, true).await {
                DispatchOutcome::Response(response) => Json(response).into_response(),
                DispatchOutcome::Stream { id, stream } => sse_response(id, stream),
            }
        }
        RpcPayload::Batch(items) => {
            // Elements run sequentially; the response array preserves
            // request order (callers must only rely on id matching).
            let mut responses = Vec::with_capacity(items.len());
            for item in items {
                let ctx = RequestContext {
                    auth: auth.clone(),
                    correlation_id: Uuid::new_v4(),
                };
                match dispatch_value(&state.registry, ctx, item, false).await {
                    DispatchOutcome::Response(response) => responses.push(response),
                    DispatchOutcome::Stream { .. } => {
                        unreachable!("streaming disallowed in batch dispatch")
                    }
                }
            }
            Json(responses).into_response()
        }
    }
}
