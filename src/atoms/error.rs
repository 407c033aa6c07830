// ── Atoms: Error Types ─────────────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained, named after the error-handling policy's
//     kinds rather than the internal cause.
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • No variant carries secret material (API keys, tokens, signatures) in
//     its message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Referenced entity does not exist (or isn't visible to the caller's tenant).
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller is authenticated but not permitted to perform this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Request body or parameters fail validation.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A cryptographic signature, HMAC, or token check failed.
    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),

    /// Caller did not present valid credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Required configuration is absent or incomplete.
    #[error("configuration missing: {0}")]
    ConfigMissing(String),

    /// A downstream collaborator (embedding provider, LLM, messaging
    /// substrate, crawl target) failed or returned an unusable response.
    #[error("upstream failure ({upstream}): {message}")]
    UpstreamFailure { upstream: String, message: String },

    /// The operation conflicts with existing state (duplicate, stale version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Unclassified internal failure. Prefer a named variant over this one.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }

    pub fn upstream(upstream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamFailure { upstream: upstream.into(), message: message.into() }
    }

    pub fn config_missing(what: impl Into<String>) -> Self {
        Self::ConfigMissing(what.into())
    }

    /// True when this error represents a caller mistake (4xx-shaped) rather
    /// than a server/upstream condition (5xx-shaped). Used by `api::errors`.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound(_)
                | EngineError::Forbidden(_)
                | EngineError::InvalidPayload(_)
                | EngineError::SignatureMismatch(_)
                | EngineError::Unauthorized(_)
                | EngineError::Conflict(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_vs_server_classification() {
        assert!(EngineError::not_found("project").is_client_error());
        assert!(!EngineError::upstream("ollama", "timeout").is_client_error());
        assert!(!EngineError::InternalError("boom".into()).is_client_error());
    }

    #[test]
    fn messages_carry_no_secret_material() {
        let err = EngineError::SignatureMismatch("dingtalk".into());
        assert!(!err.to_string().contains("secret"));
    }
}
