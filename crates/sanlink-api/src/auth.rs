// Credentials and external collaborators
//
// The session layer never stores passwords: every login asks the secret
// store for fresh credentials. Authentication lockouts are reported to a
// backend-status sink so the orchestrator can take the backend out of
// scheduling.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};

use crate::error::Error;
use crate::throttle::DeviceRegistry;

/// Default authorization scope (local user).
pub const DEFAULT_SCOPE: &str = "0";

/// Name of the default logical partition. Never sent on login.
pub const DEFAULT_VSTORE_NAME: &str = "System_vStore";

/// Id of the default logical partition.
pub const DEFAULT_VSTORE_ID: &str = "0";

/// Reference to the secret holding a backend's credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretRef {
    pub name: String,
    pub namespace: Option<String>,
}

impl SecretRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Credentials returned by the secret store.
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub user: String,
    pub password: SecretString,
    pub scope: String,
}

impl AuthInfo {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: SecretString::from(password.into()),
            scope: DEFAULT_SCOPE.into(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Body of the login request. `vstorename` is only sent for a
    /// non-default logical partition.
    pub(crate) fn login_body(&self, vstore_name: Option<&str>) -> Value {
        let mut body = Map::new();
        body.insert("username".into(), json!(self.user));
        body.insert("password".into(), json!(self.password.expose_secret()));
        body.insert("scope".into(), json!(self.scope));
        if let Some(name) = vstore_name.filter(|n| !n.is_empty() && *n != DEFAULT_VSTORE_NAME) {
            body.insert("vstorename".into(), json!(name));
        }
        Value::Object(body)
    }
}

// ── Collaborator traits ─────────────────────────────────────────────

/// Source of backend credentials.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn auth_info(&self, secret: &SecretRef) -> Result<AuthInfo, Error>;
}

/// Receiver of backend online/offline transitions.
#[async_trait]
pub trait BackendStatusSink: Send + Sync {
    async fn set_online(&self, backend_id: &str, online: bool) -> Result<(), Error>;
}

/// In-memory secret store keyed by secret name.
#[derive(Debug, Default, Clone)]
pub struct StaticSecrets {
    entries: HashMap<String, AuthInfo>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, secret: impl Into<String>, info: AuthInfo) -> Self {
        self.entries.insert(secret.into(), info);
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecrets {
    async fn auth_info(&self, secret: &SecretRef) -> Result<AuthInfo, Error> {
        self.entries
            .get(&secret.name)
            .cloned()
            .ok_or_else(|| Error::Secret {
                secret: secret.to_string(),
                message: "no such secret".into(),
            })
    }
}

/// Status sink that discards updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatusSink;

#[async_trait]
impl BackendStatusSink for NoopStatusSink {
    async fn set_online(&self, _backend_id: &str, _online: bool) -> Result<(), Error> {
        Ok(())
    }
}

/// Shared services a session needs but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub devices: Arc<DeviceRegistry>,
    pub secrets: Arc<dyn SecretStore>,
    pub status: Arc<dyn BackendStatusSink>,
}

impl Collaborators {
    pub fn new(
        devices: Arc<DeviceRegistry>,
        secrets: Arc<dyn SecretStore>,
        status: Arc<dyn BackendStatusSink>,
    ) -> Self {
        Self {
            devices,
            secrets,
            status,
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}
