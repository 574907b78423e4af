// ── Backend status board ──
//
// Records online/offline transitions per backend id. Sessions report
// authentication lockouts here; the manager marks backends online once
// they finish registration.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use sanlink_api::{BackendStatusSink, Error};

/// In-memory backend status sink.
#[derive(Debug, Default)]
pub struct StatusBoard {
    online: DashMap<String, bool>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the backend never reported a status.
    pub fn is_online(&self, backend_id: &str) -> Option<bool> {
        self.online.get(backend_id).map(|v| *v)
    }

    pub fn set(&self, backend_id: &str, online: bool) {
        let previous = self.online.insert(backend_id.to_owned(), online);
        if previous != Some(online) {
            info!(backend_id, online, "backend status changed");
        }
    }

    pub fn forget(&self, backend_id: &str) {
        self.online.remove(backend_id);
    }

    /// Snapshot of every recorded status.
    pub fn snapshot(&self) -> Vec<(String, bool)> {
        let mut all: Vec<_> = self
            .online
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        all.sort();
        all
    }
}

#[async_trait]
impl BackendStatusSink for StatusBoard {
    async fn set_online(&self, backend_id: &str, online: bool) -> Result<(), Error> {
        self.set(backend_id, online);
        Ok(())
    }
}
