//! Persona authentication middleware.
//!
//! - Public persona: `X-API-Key` header, SHA-256 digest compared in constant
//!   time against the tenant's issued keys (hashed at startup, never stored
//!   in the clear).
//! - Internal persona: `Authorization: Bearer <jwt>` signed HS256 with the
//!   symmetric secret shared by scheduler and workers. Claims carry the
//!   organization and optional user/run/task context.
//!
//! Presenting the wrong credential type on a persona is an `Unauthorized`.
//! Both middlewares insert an [`AuthContext`] request extension on success
//! and answer HTTP 401 with a JSON-RPC `-32001` body on miss.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use shaman_protocol::{codes, JsonRpcError, JsonRpcResponse};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AuthContext
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persona {
    Public,
    Internal,
}

/// Authenticated tenant context, attached as a request extension.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub org_id: Uuid,
    pub user_id: Option<String>,
    pub run_id: Option<Uuid>,
    pub persona: Persona,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JWT claims
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize, Deserialize)]
pub struct InternalClaims {
    #[serde(rename = "organizationId")]
    pub organization_id: Uuid,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "runId", skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(rename = "taskId", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub exp: u64,
}

/// Issue a short-lived internal token for worker → internal-persona calls.
pub fn issue_internal_token(
    secret: &str,
    org_id: Uuid,
    run_id: Option<Uuid>,
    task_id: Option<String>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = InternalClaims {
        organization_id: org_id,
        user_id: None,
        run_id,
        task_id,
        exp: jsonwebtoken::get_current_timestamp() + 3600,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub(crate) fn decode_internal_token(
    secret: &str,
    token: &str,
) -> Result<InternalClaims, jsonwebtoken::errors::Error> {
    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.validate_exp = true;
    jsonwebtoken::decode::<InternalClaims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hashed API keys
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Issued API keys as `(org_id, SHA-256 digest)`, read once at startup.
#[derive(Clone)]
pub struct ApiKeyIndex {
    entries: Vec<(Uuid, Vec<u8>)>,
}

impl ApiKeyIndex {
    pub fn from_hashes(entries: Vec<(Uuid, Vec<u8>)>) -> Self {
        Self { entries }
    }

    /// Hash an opaque key for config storage.
    pub fn digest_hex(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    /// Constant-time lookup of the organization owning `presented`.
    pub fn org_for_key(&self, presented: &str) -> Option<Uuid> {
        let presented_hash = Sha256::digest(presented.as_bytes());
        let mut found = None;
        // Scan every entry regardless of match to keep timing flat.
        for (org_id, digest) in &self.entries {
            if bool::from(presented_hash.ct_eq(digest.as_slice())) {
                found = Some(*org_id);
            }
        }
        found
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Middlewares
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn unauthorized(message: &str) -> Response {
    (
        axum::http::StatusCode::UNAUTHORIZED,
        axum::Json(JsonRpcResponse::err(
            None,
            JsonRpcError::new(codes::UNAUTHORIZED, message),
        )),
    )
        .into_response()
}

/// Public persona: `X-API-Key`.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if presented.is_empty() {
        return unauthorized("missing X-API-Key header");
    }
    match state.api_keys.org_for_key(presented) {
        Some(org_id) => {
            req.extensions_mut().insert(AuthContext {
                org_id,
                user_id: None,
                run_id: None,
                persona: Persona::Public,
            });
            next.run(req).await
        }
        None => unauthorized("invalid API key"),
    }
}

/// Internal persona: `Authorization: Bearer <jwt>`.
pub async fn require_internal_jwt(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    if token.is_empty() {
        return unauthorized("missing bearer token");
    }
    match decode_internal_token(&state.jwt_secret, token) {
        Ok(claims) => {
            req.extensions_mut().insert(AuthContext {
                org_id: claims.organization_id,
                user_id: claims.user_id,
                run_id: claims.run_id,
                persona: Persona::Internal,
            });
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!(error = %e, "bearer token rejected");
            unauthorized("invalid bearer token")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_lookup_finds_owning_org() {
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let index = ApiKeyIndex::from_hashes(vec![
            (org_a, Sha256::digest(b"key-a").to_vec()),
            (org_b, Sha256::digest(b"key-b").to_vec()),
        ]);
        assert_eq!(index.org_for_key("key-a"), Some(org_a));
        assert_eq!(index.org_for_key("key-b"), Some(org_b));
        assert_eq!(index.org_for_key("key-c"), None);
        assert_eq!(index.org_for_key(""), None);
    }

    #[test]
    fn digest_hex_matches_config_format() {
        let digest = ApiKeyIndex::digest_hex("hello");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn jwt_round_trip_preserves_claims() {
        let org = Uuid::new_v4();
        let run = Uuid::new_v4();
        let token =
            issue_internal_token("secret", org, Some(run), Some("t-1".into())).unwrap();
        let claims = decode_internal_token("secret", &token).unwrap();
        assert_eq!(claims.organization_id, org);
        assert_eq!(claims.run_id, Some(run));
        assert_eq!(claims.task_id.as_deref(), Some("t-1"));
    }

    #[test]
    fn jwt_with_wrong_secret_rejected() {
        let token = issue_internal_token("secret", Uuid::new_v4(), None, None).unwrap();
        assert!(decode_internal_token("other-secret", &token).is_err());
    }
}
