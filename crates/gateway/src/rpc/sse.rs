//! SSE responses for the streaming JSON-RPC methods.
//!
//! Each run event is wrapped in a JSON-RPC response envelope carrying the
//! original request id and written as one `data:` frame. Proxy buffering is
//! disabled so events reach the client as they happen; the stream closes
//! after the terminal event or on client disconnect.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;

use shaman_protocol::{JsonRpcResponse, RequestId};

use crate::rpc::EventStream;
use crate::runtime::RunEvent;

pub fn sse_response(id: Option<RequestId>, stream: EventStream) -> Response {
    let frames = stream.map(move |event| {
        let result = match event {
            RunEvent::Task(task) => serde_json::to_value(task),
            RunEvent::Message(message) => serde_json::to_value(message),
        };
        let envelope = match result {
            Ok(value) => JsonRpcResponse::ok(id.clone(), value),
            Err(e) => JsonRpcResponse::err(
                id.clone(),
                shaman_protocol::JsonRpcError::new(
                    shaman_protocol::codes::INTERNAL_ERROR,
                    format!("serialization failed: {e}"),
                ),
            ),
        };
        let data = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".into());
        Ok::<Event, Infallible>(Event::default().data(data))
    });

    let mut response = Sse::new(frames)
        .keep_alive(KeepAlive::default())
        .into_response();
    response.headers_mut().insert(
        "X-Accel-Buffering",
        axum::http::HeaderValue::from_static("no"),
    );
    response
}
