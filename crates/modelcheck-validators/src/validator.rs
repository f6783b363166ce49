//! Validator trait shared by every model family

use async_trait::async_trait;
use modelcheck_core::{ModelFamily, Result, ValidationResult};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Trait for all model validators
///
/// Problems with the artifact itself are reported as an invalid
/// [`ValidationResult`]; `Err` is reserved for failures of the validator's own
/// machinery (a worker that cannot be spawned, an unreadable directory,
/// cancellation).
#[async_trait]
pub trait ModelValidator: Send + Sync {
    /// Inspect the extracted artifact rooted at `model_dir`
    async fn check_model(
        &self,
        model_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ValidationResult>;

    /// Get the validator name
    fn name(&self) -> &str;

    /// The family this validator answers for
    fn family(&self) -> ModelFamily;
}
