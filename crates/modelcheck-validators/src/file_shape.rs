//! Companion-file presence check for static-file model families
//!
//! The static family cannot be executed without dedicated accelerator
//! hardware, so the presence of a weights file next to a topology descriptor
//! is the accepted proxy for validity. Only top-level entries are considered
//! and names are matched by case-sensitive suffix.

use crate::validator::ModelValidator;
use async_trait::async_trait;
use modelcheck_core::{Error, ModelFamily, Result, ValidationResult};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Suffix of the binary weights file
pub const WEIGHTS_EXTENSION: &str = ".bin";

/// Suffix of the topology descriptor
pub const TOPOLOGY_EXTENSION: &str = ".xml";

/// Prefix shared by every rejection message
pub const MISSING_COMPANION: &str = "missing required companion file";

/// Validator for [`ModelFamily::StaticFileV1`]
#[derive(Debug, Clone)]
pub struct FileShapeValidator {
    weights_extension: String,
    topology_extension: String,
}

impl FileShapeValidator {
    /// Create a validator using the standard `.bin` / `.xml` pair
    pub fn new() -> Self {
        Self {
            weights_extension: WEIGHTS_EXTENSION.to_string(),
            topology_extension: TOPOLOGY_EXTENSION.to_string(),
        }
    }

    /// Override the designated extensions
    pub fn with_extensions(weights: impl Into<String>, topology: impl Into<String>) -> Self {
        Self {
            weights_extension: weights.into(),
            topology_extension: topology.into(),
        }
    }

    fn verdict(&self, has_weights: bool, has_topology: bool) -> ValidationResult {
        match (has_weights, has_topology) {
            (true, true) => ValidationResult::valid(),
            (false, true) => ValidationResult::invalid(format!(
                "{}: archive contains no {} weights file",
                MISSING_COMPANION, self.weights_extension
            )),
            (true, false) => ValidationResult::invalid(format!(
                "{}: archive contains no {} topology file",
                MISSING_COMPANION, self.topology_extension
            )),
            (false, false) => ValidationResult::invalid(format!(
                "{}: archive contains neither a {} weights file nor a {} topology file",
                MISSING_COMPANION, self.weights_extension, self.topology_extension
            )),
        }
    }
}

impl Default for FileShapeValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelValidator for FileShapeValidator {
    async fn check_model(
        &self,
        model_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ValidationResult> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut has_weights = false;
        let mut has_topology = false;

        let mut entries = tokio::fs::read_dir(model_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(&self.weights_extension) {
                has_weights = true;
            }
            if name.ends_with(&self.topology_extension) {
                has_topology = true;
            }
        }

        debug!(has_weights, has_topology, "Scanned static model entries");

        let result = self.verdict(has_weights, has_topology);
        if !result.is_valid {
            warn!("{}", result.message);
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "file_shape"
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::StaticFileV1
    }
}
