// sanlink-core: Backend registration and status on top of sanlink-api sessions.

pub mod error;
pub mod manager;
pub mod product;
pub mod status;

// ── Primary re-exports ──────────────────────────────────────────────
pub use error::CoreError;
pub use manager::{Backend, BackendManager};
pub use product::ProductSeries;
pub use status::StatusBoard;
