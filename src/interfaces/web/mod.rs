mod handlers;
mod router;

use std::sync::Arc;
use std::time::Instant;

use crate::core::jobs::JobManager;
use crate::core::storage::Storage;

pub use router::build_router;

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub jobs: Arc<JobManager>,
    pub started_at: Instant,
    pub version: &'static str,
}
