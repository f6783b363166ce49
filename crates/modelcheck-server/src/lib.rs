//! modelcheck Server
//!
//! Validation service for packaged ML model artifacts. A request names an
//! artifact URL, its declared size and its model family; the service fetches
//! the zip, checks the size, unpacks it into a per-request scratch directory
//! and hands the result to the family's validator. Requests are served one at
//! a time, in arrival order.

pub mod config;
pub mod extract;
pub mod fetch;
pub mod orchestrator;
pub mod queue;
pub mod routes;
pub mod scratch;
pub mod security;
pub mod state;

pub use config::{ConfigOverrides, ServiceConfig};
pub use orchestrator::ValidationOrchestrator;
pub use queue::{QueueError, ValidationQueue};
pub use routes::create_router;
pub use scratch::{ScratchDirectory, ScratchSpace};
pub use state::AppState;
