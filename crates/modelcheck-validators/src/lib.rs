//! modelcheck Validators
//!
//! One validator per model family, selected through a [`ValidatorRegistry`]:
//! - `GRAPH_RUNTIME_V1`: the SavedModel serving graph is loaded into a session
//!   inside a short-lived `modelcheck-graph-worker` process
//! - `STATIC_FILE_V1`: a weights file and a topology descriptor must both be
//!   present at the archive root

pub mod config;
pub mod file_shape;
pub mod graph_load;
pub mod registry;
pub mod saved_model;
pub mod validator;
pub mod worker;

pub use config::{GraphConfig, Isolation};
pub use file_shape::FileShapeValidator;
pub use graph_load::{GraphLoadValidator, WorkerOutput, WorkerProcess};
pub use registry::ValidatorRegistry;
pub use saved_model::GraphSession;
pub use validator::ModelValidator;
pub use worker::WorkerReport;
