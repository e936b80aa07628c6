/// Shared error type used across all Shaman crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// An operation touched a row belonging to another organization.
    /// Fatal — must never be retried or downgraded to `NotFound` internally
    /// (the RPC boundary maps it to a generic not-found to avoid enumeration).
    #[error("tenant mismatch: {0}")]
    TenantMismatch(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("circular agent call: {0}")]
    CircularCall(String),

    #[error("depth limit exceeded: {0}")]
    DepthLimit(String),

    #[error("iteration limit reached: {0}")]
    IterationLimit(String),

    #[error("task not cancelable: {0}")]
    TaskNotCancelable(String),

    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Provider rejected the request for rate reasons. Retryable.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Provider rejected the request shape. Never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Provider transport failure. Retryable up to the configured attempts.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the originating call site may retry this error with backoff.
    ///
    /// Matches the taxonomy in the error-handling design: transient transport
    /// failures retry, validation/authorization/domain-fatal errors do not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::Timeout(_)
                | Error::RateLimited(_)
                | Error::ProviderUnavailable(_)
                | Error::QueueUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
