//! Validation orchestrator
//!
//! Runs one request through allocate, fetch, size check, extract and validate,
//! then always removes the scratch directory. Every failure on the way becomes
//! an invalid [`ValidationResult`]; `validate` itself never fails.

use crate::config::{ServiceConfig, TimeoutConfig};
use crate::extract::Extractor;
use crate::fetch::Fetcher;
use crate::scratch::{ScratchDirectory, ScratchSpace};
use crate::security::{validate_artifact_url, EgressPolicy};
use modelcheck_core::{Error, Result, ValidationRequest, ValidationResult};
use modelcheck_validators::{ModelValidator, ValidatorRegistry};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

/// Sequences the stages of one validation
pub struct ValidationOrchestrator {
    scratch: ScratchSpace,
    fetcher: Fetcher,
    extractor: Extractor,
    registry: ValidatorRegistry,
    egress: EgressPolicy,
    timeouts: TimeoutConfig,
    max_artifact_bytes: u64,
}

impl ValidationOrchestrator {
    /// Orchestrator with the built-in validators
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Self::new(config, ValidatorRegistry::with_defaults(config.graph.clone()))
    }

    /// Orchestrator dispatching to `registry`
    pub fn new(config: &ServiceConfig, registry: ValidatorRegistry) -> Result<Self> {
        Ok(Self {
            scratch: ScratchSpace::new(&config.scratch_root),
            fetcher: Fetcher::new(config.egress.clone())?,
            extractor: Extractor::new(config.limits.extract_limits()),
            registry,
            egress: config.egress.clone(),
            timeouts: config.timeouts.clone(),
            max_artifact_bytes: config.limits.max_artifact_bytes,
        })
    }

    pub fn scratch(&self) -> &ScratchSpace {
        &self.scratch
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    /// Validate one artifact
    ///
    /// Returns once the scratch directory is gone and any worker process has
    /// been reaped. `cancel` aborts whichever stage is running.
    pub async fn validate(
        &self,
        request: &ValidationRequest,
        cancel: &CancellationToken,
    ) -> ValidationResult {
        let request_id = format!("req_{}", Uuid::new_v4().simple());
        let span = info_span!(
            "validation",
            request_id = %request_id,
            family = %request.model_family
        );

        async move {
            let started = Instant::now();
            let outcome = self.run(&request_id, request, cancel).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            let result = match outcome {
                Ok(result) if result.is_valid => {
                    metrics::counter!("modelcheck_results_total", "outcome" => "valid", "kind" => "none")
                        .increment(1);
                    info!("Model is valid ({:.1}ms)", elapsed_ms);
                    result
                }
                Ok(result) => {
                    metrics::counter!("modelcheck_results_total", "outcome" => "invalid", "kind" => "model_structure")
                        .increment(1);
                    info!("Model is invalid ({:.1}ms): {}", elapsed_ms, result.message);
                    result
                }
                Err(e) => {
                    metrics::counter!("modelcheck_results_total", "outcome" => "invalid", "kind" => e.kind())
                        .increment(1);
                    match &e {
                        Error::WorkerSpawn(_) | Error::Internal(_) | Error::Io(_) => {
                            error!(kind = e.kind(), "Validation failed ({:.1}ms): {}", elapsed_ms, e)
                        }
                        _ => warn!(kind = e.kind(), "Validation failed ({:.1}ms): {}", elapsed_ms, e),
                    }
                    ValidationResult::from(e)
                }
            };
            metrics::histogram!("modelcheck_stage_latency_ms", "stage" => "total").record(elapsed_ms);
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request_id: &str,
        request: &ValidationRequest,
        cancel: &CancellationToken,
    ) -> Result<ValidationResult> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let validator = self.registry.resolve(&request.model_family)?;
        self.check_request(request)?;

        let url = validate_artifact_url(&request.url, &self.egress)
            .map_err(|e| Error::EgressDenied(e.to_string()))?;

        let scratch = self.scratch.allocate(request_id).await?;
        let result = self
            .run_in_scratch(&scratch, validator, &url, request.declared_size_bytes, cancel)
            .await;

        if let Err(e) = scratch.close().await {
            metrics::counter!("modelcheck_cleanup_failures_total").increment(1);
            error!("{}", e);
        }
        result
    }

    fn check_request(&self, request: &ValidationRequest) -> Result<()> {
        if request.url.trim().is_empty() {
            return Err(Error::InvalidRequest("url is empty".to_string()));
        }
        if request.declared_size_bytes > self.max_artifact_bytes {
            return Err(Error::InvalidRequest(format!(
                "declared size {} exceeds the limit of {} bytes",
                request.declared_size_bytes, self.max_artifact_bytes
            )));
        }
        Ok(())
    }

    async fn run_in_scratch(
        &self,
        scratch: &ScratchDirectory,
        validator: Arc<dyn ModelValidator>,
        url: &Url,
        declared_size: u64,
        cancel: &CancellationToken,
    ) -> Result<ValidationResult> {
        let token = cancel.child_token();
        let artifact_path = scratch.artifact_path();
        let fetched = within(
            "fetch",
            self.timeouts.fetch(),
            &token,
            self.fetcher.fetch(url, &artifact_path, declared_size, &token),
        )
        .await?;

        if fetched.bytes != declared_size {
            return Err(Error::SizeMismatch {
                actual: fetched.bytes,
                declared: declared_size,
            });
        }

        let token = cancel.child_token();
        let model_dir = scratch.model_dir();
        let summary = within(
            "extract",
            self.timeouts.extract(),
            &token,
            self.extractor.extract(&fetched.path, &model_dir, &token),
        )
        .await?;
        debug!("Unpacked {} entries", summary.entries);

        let token = cancel.child_token();
        within(
            "validate",
            self.timeouts.validate(),
            &token,
            validator.check_model(&model_dir, &token),
        )
        .await
    }
}

/// Run one stage under a deadline
///
/// On expiry `token` is cancelled and the stage is still awaited, so whatever
/// it holds (sockets, files, worker processes) is released before the timeout
/// is reported.
async fn within<T, F>(
    stage: &'static str,
    after: Duration,
    token: &CancellationToken,
    work: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    tokio::pin!(work);

    let result = tokio::select! {
        res = &mut work => res,
        _ = tokio::time::sleep(after) => {
            token.cancel();
            let _ = (&mut work).await;
            Err(Error::Timeout { stage, after })
        }
    };

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    metrics::histogram!("modelcheck_stage_latency_ms", "stage" => stage).record(elapsed_ms);
    debug!("Stage {} finished in {:.1}ms", stage, elapsed_ms);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use modelcheck_core::ModelFamily;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::io::{Cursor, Write};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    /// Validator that counts calls and accepts everything
    struct CountingValidator {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ModelValidator for CountingValidator {
        async fn check_model(
            &self,
            _model_dir: &Path,
            _cancel: &CancellationToken,
        ) -> Result<ValidationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ValidationResult::valid())
        }

        fn name(&self) -> &str {
            "counting"
        }

        fn family(&self) -> ModelFamily {
            ModelFamily::StaticFileV1
        }
    }

    /// Accepts the model, then leaves a file where its scratch directory was
    struct ScratchBlocker;

    #[async_trait]
    impl ModelValidator for ScratchBlocker {
        async fn check_model(
            &self,
            model_dir: &Path,
            _cancel: &CancellationToken,
        ) -> Result<ValidationResult> {
            let scratch = model_dir.parent().unwrap();
            std::fs::remove_dir_all(scratch)?;
            std::fs::write(scratch, b"in the way")?;
            Ok(ValidationResult::valid())
        }

        fn name(&self) -> &str {
            "scratch_blocker"
        }

        fn family(&self) -> ModelFamily {
            ModelFamily::StaticFileV1
        }
    }

    async fn serve_zip(name: &'static str) -> (String, u64) {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("weights.bin", SimpleFileOptions::default()).unwrap();
        writer.write_all(&[7u8; 128]).unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let size = bytes.len() as u64;

        let router = axum::Router::new().route(
            &format!("/{}", name),
            axum::routing::get(move || {
                let bytes = bytes.clone();
                async move { bytes }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{}/{}", addr, name), size)
    }

    fn orchestrator(root: &Path) -> (ValidationOrchestrator, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ValidatorRegistry::new();
        registry.register(Arc::new(CountingValidator {
            calls: calls.clone(),
        }));

        let config = ServiceConfig {
            scratch_root: root.to_path_buf(),
            ..Default::default()
        };
        (ValidationOrchestrator::new(&config, registry).unwrap(), calls)
    }

    #[tokio::test]
    async fn test_unsupported_family_allocates_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let (orchestrator, calls) = orchestrator(temp_dir.path());

        let request = ValidationRequest::new(
            "http://127.0.0.1:9/model.zip",
            10,
            ModelFamily::GraphRuntimeV1,
        );
        let result = orchestrator.validate(&request, &CancellationToken::new()).await;

        assert!(!result.is_valid);
        assert!(result.message.contains("unsupported model family"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_family_wins_over_request_checks() {
        let temp_dir = TempDir::new().unwrap();
        let (orchestrator, calls) = orchestrator(temp_dir.path());

        let empty_url = ValidationRequest::new("", 10, ModelFamily::from("ONNX_1"));
        let result = orchestrator.validate(&empty_url, &CancellationToken::new()).await;
        assert!(!result.is_valid);
        assert_eq!(result.message, "unsupported model family: ONNX_1");

        let oversized = ValidationRequest::new(
            "http://127.0.0.1:9/model.zip",
            u64::MAX,
            ModelFamily::from("ONNX_1"),
        );
        let result = orchestrator.validate(&oversized, &CancellationToken::new()).await;
        assert!(!result.is_valid);
        assert_eq!(result.message, "unsupported model family: ONNX_1");

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_failure_keeps_verdict_and_is_counted() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let temp_dir = TempDir::new().unwrap();
        let mut registry = ValidatorRegistry::new();
        registry.register(Arc::new(ScratchBlocker));
        let config = ServiceConfig {
            scratch_root: temp_dir.path().to_path_buf(),
            ..Default::default()
        };
        let orchestrator = ValidationOrchestrator::new(&config, registry).unwrap();

        let (url, size) = serve_zip("m.zip").await;
        let request = ValidationRequest::new(url, size, ModelFamily::StaticFileV1);
        let result = orchestrator.validate(&request, &CancellationToken::new()).await;

        assert_eq!(result, ValidationResult::valid());
        assert!(handle
            .render()
            .contains("modelcheck_cleanup_failures_total 1"));
    }

    #[tokio::test]
    async fn test_empty_url_is_invalid_request() {
        let temp_dir = TempDir::new().unwrap();
        let (orchestrator, _) = orchestrator(temp_dir.path());

        let request = ValidationRequest::new("  ", 10, ModelFamily::StaticFileV1);
        let result = orchestrator.validate(&request, &CancellationToken::new()).await;
        assert_eq!(result.message, "invalid request: url is empty");
    }

    #[tokio::test]
    async fn test_declared_size_over_limit() {
        let temp_dir = TempDir::new().unwrap();
        let (orchestrator, _) = orchestrator(temp_dir.path());

        let request = ValidationRequest::new(
            "http://127.0.0.1:9/model.zip",
            u64::MAX,
            ModelFamily::StaticFileV1,
        );
        let result = orchestrator.validate(&request, &CancellationToken::new()).await;
        assert!(result.message.starts_with("invalid request: declared size"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let temp_dir = TempDir::new().unwrap();
        let (orchestrator, calls) = orchestrator(temp_dir.path());

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let request = ValidationRequest::new(
            format!("http://127.0.0.1:{}/model.zip", port),
            10,
            ModelFamily::StaticFileV1,
        );
        let result = orchestrator.validate(&request, &CancellationToken::new()).await;

        assert!(!result.is_valid);
        assert!(result.message.starts_with("failed to download model artifact"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let temp_dir = TempDir::new().unwrap();
        let (orchestrator, _) = orchestrator(temp_dir.path());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = ValidationRequest::new("http://127.0.0.1:9/m.zip", 1, ModelFamily::StaticFileV1);
        let result = orchestrator.validate(&request, &cancel).await;
        assert_eq!(result.message, "validation cancelled");
    }

    #[tokio::test]
    async fn test_deadline_cancels_and_awaits_stage() {
        let token = CancellationToken::new();
        let observed = token.clone();
        let released = Arc::new(AtomicUsize::new(0));
        let released_by_stage = released.clone();

        let err = within("validate", Duration::from_millis(50), &token, async move {
            observed.cancelled().await;
            released_by_stage.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::Cancelled)
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Timeout { stage: "validate", .. }));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
