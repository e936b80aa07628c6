//! HTTP surface: the two A2A personas.
//!
//! Both mount the same method set at `POST /a2a/v1` plus the discovery
//! endpoints; they differ in authentication (API key vs. bearer JWT) and
//! in rate limiting (public only).

pub mod a2a;
pub mod auth;
pub mod discovery;
pub mod rate_limit;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Public persona: `X-API-Key` authentication, sliding-window rate limit.
pub fn public_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/a2a/v1", post(a2a::rpc_endpoint))
        .route("/.well-known/a2a/agents", get(discovery::list_agents))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce_rate_limit,
        ));

    Router::new()
        .route("/.well-known/agent.json", get(discovery::agent_card))
        .route("/healthz", get(discovery::healthz))
        .merge(protected)
        .with_state(state)
}

/// Internal persona: bearer-JWT authentication, no rate limit.
pub fn internal_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/a2a/v1", post(a2a::rpc_endpoint))
        .route("/.well-known/a2a/agents", get(discovery::list_agents))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_internal_jwt,
        ));

    Router::new()
        .route("/.well-known/agent.json", get(discovery::agent_card))
        .route("/healthz", get(discovery::healthz))
        .merge(protected)
        .with_state(state)
}
