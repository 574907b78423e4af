// sanlink-api: Async session/transport client for storage array management APIs

pub mod auth;
pub mod config;
pub mod endpoints;
pub mod envelope;
pub mod error;
pub mod session;
pub mod site;
pub mod system;
pub mod throttle;
pub mod transport;
pub mod vstore;

mod request_log;

// ── Primary re-exports ──────────────────────────────────────────────
pub use auth::{
    AuthInfo, BackendStatusSink, Collaborators, NoopStatusSink, SecretRef, SecretStore,
    StaticSecrets,
};
pub use config::ClientConfig;
pub use endpoints::EndpointRing;
pub use envelope::{ErrorInfo, Payload, ResponseEnvelope};
pub use error::Error;
pub use session::{SessionClient, SessionState};
pub use site::{SiteGuard, SiteMode, SiteState};
pub use system::{SystemApi, SystemInfo};
pub use throttle::{ConcurrencyGate, DeviceRegistry, GatePermit};
pub use transport::{TlsMode, TransportConfig};
pub use vstore::{VStore, VStoreApi};

// Downstream crates build requests against these.
pub use reqwest::Method;
