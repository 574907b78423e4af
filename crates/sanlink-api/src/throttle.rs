// Two-level request throttling
//
// Every request holds one permit from its logical client's pool and one
// from the pool of the physical device it targets. Device pools live in a
// process-wide registry keyed by device serial number, so sessions that
// reach the same array through different clients share one bound.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::Error;

/// Default in-flight bound per logical client.
pub const DEFAULT_PARALLEL_COUNT: usize = 30;
/// Upper bound for the per-client setting.
pub const MAX_PARALLEL_COUNT: usize = 30;
/// Lower bound for the per-client setting.
pub const MIN_PARALLEL_COUNT: usize = 1;
/// Default in-flight bound per physical device.
pub const DEFAULT_DEVICE_CAPACITY: usize = 100;
/// Registry key used before a device identity is known.
pub const UNINITIALIZED_DEVICE: &str = "uninitialized-storage";

/// Parse the configured per-client bound, falling back to the default
/// (with a warning) when it is missing, unparsable or out of range.
pub fn parallel_count(raw: Option<&str>) -> usize {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return DEFAULT_PARALLEL_COUNT;
    };
    match raw.parse::<usize>() {
        Ok(n) if (MIN_PARALLEL_COUNT..=MAX_PARALLEL_COUNT).contains(&n) => n,
        _ => {
            warn!(
                configured = raw,
                default = DEFAULT_PARALLEL_COUNT,
                "invalid parallel count, using default"
            );
            DEFAULT_PARALLEL_COUNT
        }
    }
}

// ── DeviceRegistry ──────────────────────────────────────────────────

/// Process-wide map from device serial number to its request pool.
///
/// Owned by the top-level backend manager and handed to every session by
/// `Arc`. Pools are created on first use; insertion is synchronized per
/// shard, lookups never serialize against each other.
#[derive(Debug)]
pub struct DeviceRegistry {
    capacity: usize,
    pools: DashMap<String, Arc<Semaphore>>,
}

impl DeviceRegistry {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let pools = DashMap::new();
        pools.insert(UNINITIALIZED_DEVICE.to_owned(), Arc::new(Semaphore::new(capacity)));
        Self { capacity, pools }
    }

    /// Capacity of every device pool.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ensure a pool exists for `device_id`, creating it on first use.
    pub fn ensure(&self, device_id: &str) -> Arc<Semaphore> {
        if let Some(pool) = self.pools.get(device_id) {
            return Arc::clone(pool.value());
        }
        let pool = self.pools.entry(device_id.to_owned()).or_insert_with(|| {
            debug!(device_id, capacity = self.capacity, "registering device request pool");
            Arc::new(Semaphore::new(self.capacity))
        });
        Arc::clone(pool.value())
    }

    /// The pool for `device_id`, or the default bucket if the device is
    /// unknown or the identity is still empty.
    pub fn pool_for(&self, device_id: &str) -> Arc<Semaphore> {
        self.pools
            .get(device_id)
            .or_else(|| self.pools.get(UNINITIALIZED_DEVICE))
            .map_or_else(
                || Arc::new(Semaphore::new(self.capacity)),
                |pool| Arc::clone(pool.value()),
            )
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.pools.contains_key(device_id)
    }

    /// Free permits in a device's pool.
    pub fn available(&self, device_id: &str) -> Option<usize> {
        self.pools.get(device_id).map(|p| p.available_permits())
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_CAPACITY)
    }
}

// ── ConcurrencyGate ─────────────────────────────────────────────────

/// Client-level pool plus the shared device registry.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    client: Arc<Semaphore>,
    devices: Arc<DeviceRegistry>,
}

/// Both permits of one in-flight request. Dropping it releases both.
#[derive(Debug)]
pub struct GatePermit {
    _device: OwnedSemaphorePermit,
    _client: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    pub fn new(parallel: usize, devices: Arc<DeviceRegistry>) -> Self {
        Self {
            client: Arc::new(Semaphore::new(parallel.max(1))),
            devices,
        }
    }

    /// Acquire the client permit, then the device permit. Waits until
    /// both are available.
    pub async fn acquire(&self, device_id: &str) -> Result<GatePermit, Error> {
        let client = Arc::clone(&self.client)
            .acquire_owned()
            .await
            .map_err(|_| Error::PermitsClosed)?;
        let device = self
            .devices
            .pool_for(device_id)
            .acquire_owned()
            .await
            .map_err(|_| Error::PermitsClosed)?;
        Ok(GatePermit {
            _device: device,
            _client: client,
        })
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    /// Free permits in the client-level pool.
    pub fn client_available(&self) -> usize {
        self.client.available_permits()
    }
}
