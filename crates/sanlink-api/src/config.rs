// ── Session construction configuration ──
//
// Describes *how* to reach one backend. Carries no secret material: the
// secret reference is resolved through the secret store on every login.
// Validation happens here, at construction time, never at call time.

use url::Url;

use crate::auth::SecretRef;
use crate::error::Error;
use crate::throttle::parallel_count;
use crate::transport::TransportConfig;

/// Configuration for one session against one backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend name used in logs.
    pub name: String,
    /// Identity reported to the backend-status sink.
    pub backend_id: String,
    /// Storage product label (e.g. `oceanstor-san`).
    pub storage: String,
    /// Ordered candidate management addresses.
    pub urls: Vec<Url>,
    pub user: String,
    pub secret: SecretRef,
    /// Logical partition to log into; `None` means the default one.
    pub vstore_name: Option<String>,
    /// Raw per-client concurrency setting, clamped to 1..=30.
    pub parallel_num: Option<String>,
    pub transport: TransportConfig,
}

impl ClientConfig {
    pub fn new(
        name: impl Into<String>,
        urls: Vec<Url>,
        user: impl Into<String>,
        secret: SecretRef,
    ) -> Self {
        let name = name.into();
        Self {
            backend_id: name.clone(),
            name,
            storage: String::new(),
            urls,
            user: user.into(),
            secret,
            vstore_name: None,
            parallel_num: None,
            transport: TransportConfig::default(),
        }
    }

    pub fn with_backend_id(mut self, backend_id: impl Into<String>) -> Self {
        self.backend_id = backend_id.into();
        self
    }

    pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = storage.into();
        self
    }

    pub fn with_vstore(mut self, vstore_name: impl Into<String>) -> Self {
        self.vstore_name = Some(vstore_name.into());
        self
    }

    pub fn with_parallel_num(mut self, parallel_num: impl Into<String>) -> Self {
        self.parallel_num = Some(parallel_num.into());
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Check required parameters.
    pub fn validate(&self) -> Result<(), Error> {
        if self.urls.is_empty() {
            return Err(invalid("urls", "urls must be provided"));
        }
        if let Some(bad) = self
            .urls
            .iter()
            .find(|u| !matches!(u.scheme(), "http" | "https"))
        {
            return Err(invalid("urls", &format!("unsupported scheme in {bad}")));
        }
        if self.user.trim().is_empty() {
            return Err(invalid("user", "user must be provided"));
        }
        if self.secret.name.trim().is_empty() {
            return Err(invalid("secret", "secret name must be provided"));
        }
        if self.backend_id.trim().is_empty() {
            return Err(invalid("backend_id", "backend id must be provided"));
        }
        Ok(())
    }

    /// Effective per-client concurrency bound.
    pub fn parallel_count(&self) -> usize {
        parallel_count(self.parallel_num.as_deref())
    }
}

fn invalid(field: &str, reason: &str) -> Error {
    Error::Config {
        field: field.into(),
        reason: reason.into(),
    }
}
