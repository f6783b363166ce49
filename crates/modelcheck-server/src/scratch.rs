//! Per-request scratch storage
//!
//! Each request gets its own directory under a shared root, named from the
//! request id. Names never repeat, and a directory that already exists is an
//! allocation error rather than something to reuse.

use modelcheck_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of every directory the service creates under the scratch root
pub const SCRATCH_PREFIX: &str = "modelcheck-";

/// File the downloaded artifact is written to
pub const ARTIFACT_FILENAME: &str = "artifact.zip";

/// Directory the artifact is unpacked into
pub const MODEL_DIRNAME: &str = "model";

/// Shared root under which scratch directories are allocated
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root if it does not exist yet
    pub async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::allocation(format!(
                "cannot create scratch root {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Allocate the scratch directory for `request_id`
    pub async fn allocate(&self, request_id: &str) -> Result<ScratchDirectory> {
        self.prepare().await?;

        let path = self.root.join(format!("{}{}", SCRATCH_PREFIX, request_id));
        tokio::fs::create_dir(&path).await.map_err(|e| {
            Error::allocation(format!("cannot create {}: {}", path.display(), e))
        })?;

        debug!("Allocated scratch directory {:?}", path);
        Ok(ScratchDirectory {
            path,
            released: false,
        })
    }

    /// Check the root is writable by creating and removing a directory
    pub async fn probe(&self) -> Result<()> {
        let probe = self.allocate(&format!("health_{}", Uuid::new_v4().simple())).await?;
        probe.close().await
    }

    /// Remove scratch directories left behind by an earlier run
    ///
    /// Only entries carrying [`SCRATCH_PREFIX`] are touched. Returns how many
    /// were removed.
    pub async fn purge_stale(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(SCRATCH_PREFIX) {
                continue;
            }

            let path = entry.path();
            let outcome = if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };

            match outcome {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove stale scratch entry {:?}: {}", path, e),
            }
        }

        if removed > 0 {
            info!("Removed {} stale scratch directories from {:?}", removed, self.root);
        }
        Ok(removed)
    }
}

/// Scratch directory owned by exactly one request
///
/// Release it with [`close`](Self::close). If the value is dropped without
/// being closed, the directory is removed synchronously on drop.
#[derive(Debug)]
pub struct ScratchDirectory {
    path: PathBuf,
    released: bool,
}

impl ScratchDirectory {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the downloaded artifact goes
    pub fn artifact_path(&self) -> PathBuf {
        self.path.join(ARTIFACT_FILENAME)
    }

    /// Where the archive is unpacked
    pub fn model_dir(&self) -> PathBuf {
        self.path.join(MODEL_DIRNAME)
    }

    /// Remove the directory and everything in it
    pub async fn close(mut self) -> Result<()> {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                debug!("Removed scratch directory {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::cleanup(format!(
                "cannot remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

impl Drop for ScratchDirectory {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed scratch directory {:?} on drop", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove scratch directory {:?}: {}", self.path, e),
        }
    }
}
