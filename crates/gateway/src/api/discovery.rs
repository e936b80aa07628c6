//! Discovery endpoints.
//!
//! - `GET /.well-known/agent.json` — the server's agent card. Served
//!   without authentication; when a valid credential accompanies the
//!   request the card also lists the agents visible to that tenant.
//! - `GET /.well-known/a2a/agents` — the tenant-visible agent list
//!   (authenticated). The public persona sees only exposed agents, the
//!   internal persona sees everything.
//! - `GET /healthz` — liveness.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use axum::Extension;
use serde_json::{json, Value};

use shaman_protocol::{AgentCard, AgentCardSkill};

use crate::api::auth::{AuthContext, Persona};
use crate::state::AppState;

pub async fn agent_card(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<AgentCard> {
    let mut card = AgentCard::new(
        "shaman",
        "Multi-tenant agent orchestration platform speaking the A2A protocol",
    );

    // Credentials are optional here; a valid one scopes the skill listing
    // to the caller's tenant.
    if let Some((org_id, persona)) = optional_identity(&state, &headers) {
        let exposed_only = persona == Persona::Public;
        card.skills = state
            .resolver
            .list(org_id, exposed_only)
            .await
            .into_iter()
            .map(|agent| AgentCardSkill {
                name: agent.name,
                description: agent.description,
            })
            .collect();
    }

    Json(card)
}

fn optional_identity(state: &AppState, headers: &HeaderMap) -> Option<(uuid::Uuid, Persona)> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if let Some(org_id) = state.api_keys.org_for_key(key) {
            return Some((org_id, Persona::Public));
        }
    }
    if let Some(token) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        if let Ok(claims) = crate::api::auth::decode_internal_token(&state.jwt_secret, token) {
            return Some((claims.organization_id, Persona::Internal));
        }
    }
    None
}

pub async fn list_agents(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Json<Value> {
    let exposed_only = auth.persona == Persona::Public;
    let agents: Vec<Value> = state
        .resolver
        .list(auth.org_id, exposed_only)
        .await
        .into_iter()
        .map(|agent| {
            json!({
                "name": agent.name,
                "description": agent.description,
                "version": agent.version,
            })
        })
        .collect();
    Json(json!({ "agents": agents }))
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
