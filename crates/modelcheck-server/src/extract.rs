//! Zip extraction
//!
//! Runs on a blocking thread. Entry paths that would land outside the
//! destination, archives with too many entries and archives that expand past
//! the configured size are all reported as corrupt. The cancellation token is
//! checked between entries and between chunks of an entry.

use modelcheck_core::{Error, Result};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const COPY_BUFFER_BYTES: usize = 64 * 1024;

/// Bounds on what one archive may unpack to
#[derive(Debug, Clone, Copy)]
pub struct ExtractLimits {
    pub max_extracted_bytes: u64,
    pub max_entries: usize,
}

/// What was unpacked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSummary {
    pub entries: usize,
    pub bytes: u64,
}

/// Zip archive extractor
#[derive(Debug, Clone)]
pub struct Extractor {
    limits: ExtractLimits,
}

impl Extractor {
    pub fn new(limits: ExtractLimits) -> Self {
        Self { limits }
    }

    /// Unpack `archive` into `dest`
    ///
    /// On error `dest` may hold part of the archive; the caller discards it
    /// with the rest of the scratch directory.
    pub async fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<ExtractSummary> {
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        let limits = self.limits;
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest, limits, &cancel))
            .await
            .map_err(|e| Error::internal(format!("extraction task failed: {}", e)))?
    }
}

fn extract_blocking(
    archive: &Path,
    dest: &Path,
    limits: ExtractLimits,
    cancel: &CancellationToken,
) -> Result<ExtractSummary> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| Error::corrupt_archive(e.to_string()))?;

    if zip.len() > limits.max_entries {
        return Err(Error::corrupt_archive(format!(
            "archive holds {} entries, limit is {}",
            zip.len(),
            limits.max_entries
        )));
    }

    std::fs::create_dir_all(dest)?;

    let mut buffer = vec![0u8; COPY_BUFFER_BYTES];
    let mut total: u64 = 0;

    for index in 0..zip.len() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut entry = zip
            .by_index(index)
            .map_err(|e| Error::corrupt_archive(format!("entry {}: {}", index, e)))?;
        let name = entry.name().to_string();
        let relative: PathBuf = entry.enclosed_name().ok_or_else(|| {
            Error::corrupt_archive(format!("entry '{}' escapes the extraction directory", name))
        })?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let read = entry
                .read(&mut buffer)
                .map_err(|e| Error::corrupt_archive(format!("entry '{}': {}", name, e)))?;
            if read == 0 {
                break;
            }

            total += read as u64;
            if total > limits.max_extracted_bytes {
                return Err(Error::corrupt_archive(format!(
                    "archive expands beyond {} bytes",
                    limits.max_extracted_bytes
                )));
            }
            out.write_all(&buffer[..read])?;
        }
    }

    debug!("Extracted {} entries ({} bytes) into {:?}", zip.len(), total, dest);
    Ok(ExtractSummary {
        entries: zip.len(),
        bytes: total,
    })
}
