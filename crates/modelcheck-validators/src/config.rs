//! Configuration for validators

use crate::saved_model::SERVE_TAG;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name of the worker binary looked up next to the running executable
pub const GRAPH_WORKER_BINARY: &str = "modelcheck-graph-worker";

/// Configuration for the graph-runtime validator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Where the session is loaded
    #[serde(default)]
    pub isolation: Isolation,

    /// Worker executable; defaults to the worker installed beside this binary
    #[serde(default)]
    pub worker_program: Option<PathBuf>,

    /// Meta graph tags to load
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            isolation: Isolation::default(),
            worker_program: None,
            tags: default_tags(),
        }
    }
}

impl GraphConfig {
    /// Configuration loading sessions on a blocking thread of this process
    pub fn in_process() -> Self {
        Self {
            isolation: Isolation::InProcess,
            ..Default::default()
        }
    }

    /// Configuration using an explicit worker executable
    pub fn with_worker(program: impl Into<PathBuf>) -> Self {
        Self {
            isolation: Isolation::Process,
            worker_program: Some(program.into()),
            ..Default::default()
        }
    }

    /// Resolve the worker executable path
    pub fn resolve_worker_program(&self) -> std::io::Result<PathBuf> {
        if let Some(ref program) = self.worker_program {
            return Ok(program.clone());
        }

        let exe = std::env::current_exe()?;
        let dir = exe.parent().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "current executable has no parent directory",
            )
        })?;
        Ok(dir.join(format!("{}{}", GRAPH_WORKER_BINARY, std::env::consts::EXE_SUFFIX)))
    }
}

/// Session placement for graph loading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// One short-lived worker process per validation
    #[default]
    Process,
    /// Scoped session on a blocking thread of the host
    InProcess,
}

fn default_tags() -> Vec<String> {
    vec![SERVE_TAG.to_string()]
}
