// ── Backend manager ──
//
// Registers storage backends: authenticates a session, reads system
// information, picks the client flavor for the product series and records
// the backend as online. All sessions share one device registry so that
// per-array concurrency holds across backends pointing at the same array.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{error, info, warn};

use sanlink_api::{
    BackendStatusSink, ClientConfig, Collaborators, DeviceRegistry, SecretStore, SessionClient,
    SystemInfo,
};

use crate::error::CoreError;
use crate::product::ProductSeries;
use crate::status::StatusBoard;

// ── Backend ──────────────────────────────────────────────────────

/// A registered backend and its active session.
#[derive(Debug)]
pub struct Backend {
    name: String,
    backend_id: String,
    series: ProductSeries,
    system: SystemInfo,
    client: Arc<SessionClient>,
}

impl Backend {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    pub fn series(&self) -> ProductSeries {
        self.series
    }

    /// System information captured at registration.
    pub fn system(&self) -> &SystemInfo {
        &self.system
    }

    pub fn client(&self) -> &Arc<SessionClient> {
        &self.client
    }
}

// ── BackendManager ───────────────────────────────────────────────

/// Process-wide registry of storage backends.
pub struct BackendManager {
    devices: Arc<DeviceRegistry>,
    status: Arc<StatusBoard>,
    secrets: Arc<dyn SecretStore>,
    backends: DashMap<String, Arc<Backend>>,
}

impl BackendManager {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self::with_devices(secrets, Arc::new(DeviceRegistry::default()))
    }

    pub fn with_devices(secrets: Arc<dyn SecretStore>, devices: Arc<DeviceRegistry>) -> Self {
        Self {
            devices,
            status: Arc::new(StatusBoard::new()),
            secrets,
            backends: DashMap::new(),
        }
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    pub fn status(&self) -> &Arc<StatusBoard> {
        &self.status
    }

    fn collaborators(&self) -> Collaborators {
        let status: Arc<dyn BackendStatusSink> = self.status.clone();
        Collaborators::new(Arc::clone(&self.devices), Arc::clone(&self.secrets), status)
    }

    /// Authenticate and register a backend.
    ///
    /// With `keep_login == false` the session is logged out after
    /// registration and logs in again on first use.
    pub async fn register(
        &self,
        config: ClientConfig,
        keep_login: bool,
    ) -> Result<Arc<Backend>, CoreError> {
        let name = config.name.clone();
        if self.backends.contains_key(&name) {
            return Err(CoreError::AlreadyRegistered { name });
        }
        let backend_id = config.backend_id.clone();

        let client = SessionClient::new(config, self.collaborators())?;
        client.login().await.inspect_err(|e| {
            error!(backend = %name, error = %e, "backend init login failed");
        })?;

        let system = match client.refresh_system_info().await {
            Ok(system) => system,
            Err(e) => {
                error!(backend = %name, error = %e, "set client info failed");
                client.logout().await;
                return Err(e.into());
            }
        };

        let version = match client.storage_version() {
            v if v.is_empty() => system.product_version().unwrap_or_default().to_owned(),
            v => v,
        };
        let series = ProductSeries::from_version(&version);
        info!(backend = %name, %version, %series, "detected product series");

        let (client, system) = if series.is_modern() {
            Self::migrate(client, &name).await?
        } else {
            (client, system)
        };

        if !keep_login {
            client.logout().await;
        }

        let backend = Arc::new(Backend {
            name: name.clone(),
            backend_id,
            series,
            system,
            client: Arc::new(client),
        });
        // A concurrent registration of the same name may have won meanwhile.
        let inserted = match self.backends.entry(name.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&backend));
                true
            }
        };
        if !inserted {
            warn!(backend = %name, "backend registered concurrently, dropping session");
            if backend.client.has_token() {
                backend.client.logout().await;
            }
            return Err(CoreError::AlreadyRegistered { name });
        }

        self.status.set(&backend.backend_id, true);
        Ok(backend)
    }

    /// Move a session onto a fresh duplicate for the modern capability set.
    async fn migrate(
        client: SessionClient,
        name: &str,
    ) -> Result<(SessionClient, SystemInfo), CoreError> {
        let modern = client.duplicate();
        let observed = client.site().snapshot().observed;
        client.logout().await;

        modern.login().await.inspect_err(|e| {
            error!(backend = %name, error = %e, "modern client login failed");
        })?;
        // The duplicate continues the original session's site.
        if let Some(identity) = observed {
            modern.site().set_observed(identity);
        }
        match modern.refresh_system_info().await {
            Ok(system) => {
                info!(backend = %name, "using modern client");
                Ok((modern, system))
            }
            Err(e) => {
                error!(backend = %name, error = %e, "modern client system info failed");
                modern.logout().await;
                Err(e.into())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Backend>> {
        self.backends.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Unregister a backend and close its session.
    pub async fn remove(&self, name: &str) -> Result<(), CoreError> {
        let Some((_, backend)) = self.backends.remove(name) else {
            warn!(backend = %name, "remove of unknown backend");
            return Err(CoreError::BackendNotFound {
                name: name.to_owned(),
            });
        };
        if backend.client.has_token() {
            backend.client.logout().await;
        }
        self.status.forget(&backend.backend_id);
        info!(backend = %name, "backend removed");
        Ok(())
    }

    /// `false` for unknown backends.
    pub fn is_online(&self, backend_id: &str) -> bool {
        self.status.is_online(backend_id).unwrap_or(false)
    }

    /// All registered backends, sorted by name.
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        let mut all: Vec<_> = self.backends.iter().map(|b| Arc::clone(b.value())).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

impl std::fmt::Debug for BackendManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendManager")
            .field("devices", &self.devices)
            .field("status", &self.status)
            .field("backends", &self.backends.len())
            .finish_non_exhaustive()
    }
}
