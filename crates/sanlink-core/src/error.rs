// ── Core error types ──
//
// Backend-level errors. Consumers see what went wrong with a backend, not
// which wire exchange failed. The `From<sanlink_api::Error>` impl folds
// session-layer failures into these variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to backend at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        message: String,
        /// Business code returned by the array, if any.
        code: Option<i64>,
    },

    /// Site or system state is in flux; the caller should retry.
    #[error("Backend temporarily unavailable: {message}")]
    Unavailable { message: String },

    // ── Registry errors ──────────────────────────────────────────────
    #[error("Backend not found: {name}")]
    BackendNotFound { name: String },

    #[error("Backend already registered: {name}")]
    AlreadyRegistered { name: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api { message: String, code: Option<i64> },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from session-layer errors ─────────────────────────────

impl From<sanlink_api::Error> for CoreError {
    fn from(err: sanlink_api::Error) -> Self {
        use sanlink_api::Error as Api;

        match err {
            Api::Unconnected { url, message } => CoreError::ConnectionFailed {
                url,
                reason: message,
            },
            Api::Transport(ref e) => CoreError::ConnectionFailed {
                url: e.url().map(ToString::to_string).unwrap_or_default(),
                reason: e.to_string(),
            },
            Api::NoTransport { backend } => CoreError::Internal(format!(
                "backend {backend} has no HTTP transport"
            )),
            Api::AuthRejected {
                url,
                code,
                description,
            } => CoreError::AuthenticationFailed {
                message: format!("login to {url} rejected: {description}"),
                code: Some(code),
            },
            Api::SessionExpired { code } => CoreError::AuthenticationFailed {
                message: "Session expired -- re-authentication required".into(),
                code: Some(code),
            },
            Api::Secret { secret, message } => CoreError::AuthenticationFailed {
                message: format!("credentials {secret} unavailable: {message}"),
                code: None,
            },
            e @ (Api::SiteRefreshing | Api::SiteMismatch { .. } | Api::SystemInfoUnavailable(_)) => {
                CoreError::Unavailable {
                    message: e.to_string(),
                }
            }
            Api::Api { code, description } => CoreError::Api {
                message: description,
                code: Some(code),
            },
            Api::Decode { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            Api::Config { field, reason } => CoreError::Config {
                message: format!("invalid {field}: {reason}"),
            },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            e @ (Api::StatusSink(_) | Api::PermitsClosed) => CoreError::Internal(e.to_string()),
        }
    }
}
