//! Graph-runtime validator
//!
//! Loads the SavedModel serving graph into a session. By default every call
//! spawns a fresh `modelcheck-graph-worker` process and waits for its report,
//! so whatever memory the load touches is returned to the OS when the worker
//! exits. The worker is owned by the call: it is either joined or killed and
//! reaped before `check_model` returns.
//!
//! In-process isolation loads on a blocking thread with a scoped session. A
//! cancelled in-process load returns immediately but the thread finishes its
//! read-only load in the background.

use crate::config::{GraphConfig, Isolation};
use crate::validator::ModelValidator;
use crate::worker::WorkerReport;
use async_trait::async_trait;
use modelcheck_core::{Error, ModelFamily, Result, ValidationResult};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest stderr tail quoted in a worker failure message
const STDERR_TAIL_BYTES: usize = 2048;

/// Validator for [`ModelFamily::GraphRuntimeV1`]
#[derive(Debug, Clone)]
pub struct GraphLoadValidator {
    config: GraphConfig,
}

impl GraphLoadValidator {
    /// Create a new graph validator
    pub fn new(config: GraphConfig) -> Self {
        Self { config }
    }

    async fn check_in_worker(
        &self,
        model_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ValidationResult> {
        let program = self
            .config
            .resolve_worker_program()
            .map_err(|e| Error::worker_spawn(format!("cannot locate graph worker: {}", e)))?;

        let mut command = Command::new(&program);
        for tag in &self.config.tags {
            command.arg("--tag").arg(tag);
        }
        command.arg(model_dir);

        let worker = WorkerProcess::spawn(&program, command)?;
        let output = worker.join(cancel).await?;

        if !output.status.success() {
            return Err(Error::worker_spawn(format!(
                "graph worker exited with {}: {}",
                output.status,
                output.stderr_tail()
            )));
        }

        Ok(WorkerReport::parse(&output.stdout)?.into())
    }

    async fn check_in_process(
        &self,
        model_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ValidationResult> {
        let dir = model_dir.to_path_buf();
        let tags = self.config.tags.clone();
        let load = tokio::task::spawn_blocking(move || WorkerReport::from_load(&dir, &tags));

        tokio::select! {
            joined = load => {
                let report = joined.map_err(|e| Error::internal(format!("graph load task failed: {}", e)))?;
                Ok(report.into())
            }
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

#[async_trait]
impl ModelValidator for GraphLoadValidator {
    async fn check_model(
        &self,
        model_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ValidationResult> {
        debug!(
            "Loading graph tagged {:?} from {:?} ({:?})",
            self.config.tags, model_dir, self.config.isolation
        );

        let result = match self.config.isolation {
            Isolation::Process => self.check_in_worker(model_dir, cancel).await?,
            Isolation::InProcess => self.check_in_process(model_dir, cancel).await?,
        };

        if result.is_valid {
            info!("Graph loaded successfully from {:?}", model_dir);
        } else {
            warn!("Graph load failed: {}", result.message);
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "graph_load"
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::GraphRuntimeV1
    }
}

/// Captured result of a finished worker
#[derive(Debug)]
pub struct WorkerOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl WorkerOutput {
    /// Last part of stderr, for diagnostics
    pub fn stderr_tail(&self) -> String {
        let start = self.stderr.len().saturating_sub(STDERR_TAIL_BYTES);
        let tail = String::from_utf8_lossy(&self.stderr[start..]);
        let tail = tail.trim();
        if tail.is_empty() {
            "no diagnostics on stderr".to_string()
        } else {
            tail.to_string()
        }
    }
}

/// Handle to one isolated worker process
///
/// The child is spawned with `kill_on_drop`, so even a handle dropped without
/// [`join`](Self::join) does not leave the process running.
pub struct WorkerProcess {
    child: Child,
    program: PathBuf,
}

impl WorkerProcess {
    /// Spawn `command` with piped output
    pub fn spawn(program: &Path, mut command: Command) -> Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            Error::worker_spawn(format!(
                "failed to spawn graph worker {}: {}",
                program.display(),
                e
            ))
        })?;

        debug!("Spawned graph worker pid={:?}", child.id());

        Ok(Self {
            child,
            program: program.to_path_buf(),
        })
    }

    /// OS process id, while the child has not been reaped
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the worker to exit, or kill it when `cancel` fires
    pub async fn join(mut self, cancel: &CancellationToken) -> Result<WorkerOutput> {
        let finished = tokio::select! {
            res = collect_output(&mut self.child) => Some(res),
            _ = cancel.cancelled() => None,
        };

        match finished {
            Some(Ok(output)) => {
                debug!("Graph worker exited with {}", output.status);
                Ok(output)
            }
            Some(Err(e)) => {
                self.terminate().await;
                Err(Error::worker_spawn(format!(
                    "lost contact with graph worker {}: {}",
                    self.program.display(),
                    e
                )))
            }
            None => {
                self.terminate().await;
                Err(Error::Cancelled)
            }
        }
    }

    /// Kill the worker and reap it
    async fn terminate(&mut self) {
        let pid = self.child.id();
        match self.child.kill().await {
            Ok(()) => debug!("Terminated graph worker pid={:?}", pid),
            Err(e) => warn!("Failed to terminate graph worker pid={:?}: {}", pid, e),
        }
    }
}

async fn collect_output(child: &mut Child) -> std::io::Result<WorkerOutput> {
    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdout not piped"))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stderr not piped"))?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let (out, err) = tokio::join!(
        stdout_pipe.read_to_end(&mut stdout),
        stderr_pipe.read_to_end(&mut stderr)
    );
    out?;
    err?;

    let status = child.wait().await?;
    Ok(WorkerOutput {
        status,
        stdout,
        stderr,
    })
}
