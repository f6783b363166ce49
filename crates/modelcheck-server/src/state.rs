//! Application state shared by the HTTP handlers

use crate::queue::ValidationQueue;
use crate::scratch::ScratchSpace;
use metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    /// Submits requests to the sequential validation worker
    pub queue: ValidationQueue,

    /// Scratch root, probed by the health check
    pub scratch: ScratchSpace,

    /// Prometheus metrics handle for rendering
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    pub fn new(queue: ValidationQueue, scratch: ScratchSpace, metrics_handle: PrometheusHandle) -> Self {
        Self {
            queue,
            scratch,
            metrics_handle,
        }
    }
}
