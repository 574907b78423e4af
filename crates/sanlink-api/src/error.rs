use thiserror::Error;

/// Top-level error type for the `sanlink-api` crate.
///
/// Covers every failure mode of the session/transport layer:
/// connectivity, authentication, site routing, envelope decoding and
/// construction-time configuration. `sanlink-core` maps these into
/// backend-level diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connectivity ────────────────────────────────────────────────
    /// The endpoint could not be reached (refused, timed out, reset).
    ///
    /// During login this drives failover to the next candidate address.
    #[error("Unconnected: cannot reach {url}: {message}")]
    Unconnected { url: String, message: String },

    /// Any other HTTP transport failure, returned as-is.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// No HTTP transport is attached to the session (e.g. a duplicated
    /// client that has not logged in yet).
    #[error("no HTTP transport configured for backend {backend}")]
    NoTransport { backend: String },

    // ── Authentication ──────────────────────────────────────────────
    /// The login call returned a non-zero business code.
    #[error("login to {url} rejected (code {code}): {description}")]
    AuthRejected {
        url: String,
        code: i64,
        description: String,
    },

    /// The array reports the authenticated session is no longer valid.
    #[error("session expired (code {code}) -- re-authentication required")]
    SessionExpired { code: i64 },

    /// The secret store could not supply credentials.
    #[error("secret lookup failed for {secret}: {message}")]
    Secret { secret: String, message: String },

    /// The backend-status sink rejected an update.
    #[error("backend status update failed: {0}")]
    StatusSink(String),

    // ── Site awareness ──────────────────────────────────────────────
    /// System/site information is being refreshed; retry shortly.
    #[error("querying logical interface and system information, please retry")]
    SiteRefreshing,

    /// The active management port migrated to another site since login.
    #[error(
        "logical interface is not running on its own site (observed {observed}, active {current}); re-authenticate"
    )]
    SiteMismatch { observed: String, current: String },

    /// A relogin succeeded but the follow-up system query failed.
    #[error("after re-login, can't get system info: {0}")]
    SystemInfoUnavailable(Box<Error>),

    // ── Data ────────────────────────────────────────────────────────
    /// Malformed response body or unexpected payload shape.
    #[error("Deserialization error: {message}")]
    Decode { message: String, body: String },

    /// Non-zero business code surfaced by a typed accessor.
    #[error("API error {code}: {description}")]
    Api { code: i64, description: String },

    // ── Construction ────────────────────────────────────────────────
    /// A required construction parameter is missing or invalid.
    #[error("invalid {field}: {reason}")]
    Config { field: String, reason: String },

    /// TLS setup for the HTTP client failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A concurrency permit pool was closed.
    #[error("request permits closed")]
    PermitsClosed,
}

impl Error {
    /// Returns `true` for the `Unconnected` sentinel.
    pub fn is_unconnected(&self) -> bool {
        matches!(self, Self::Unconnected { .. })
    }

    /// Returns `true` if the caller may simply retry the same call later.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::SiteRefreshing | Self::Unconnected { .. })
    }

    /// Returns `true` if the caller must re-authenticate before retrying.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::SiteMismatch { .. } | Self::SessionExpired { .. })
    }

    /// Extract the array's business code, if available.
    pub fn api_code(&self) -> Option<i64> {
        match self {
            Self::AuthRejected { code, .. }
            | Self::SessionExpired { code }
            | Self::Api { code, .. } => Some(*code),
            Self::SystemInfoUnavailable(inner) => inner.api_code(),
            _ => None,
        }
    }

    pub(crate) fn decode(message: impl Into<String>, body: &[u8]) -> Self {
        let body = String::from_utf8_lossy(body);
        Self::Decode {
            message: message.into(),
            body: body.chars().take(512).collect(),
        }
    }
}
