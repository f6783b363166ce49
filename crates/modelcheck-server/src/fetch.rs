//! Artifact download
//!
//! Streams the response body to a file in the request's scratch directory,
//! hashing it on the way. The declared size is enforced while streaming: once
//! more bytes arrive than were declared the download stops.

use crate::security::{check_url, EgressPolicy};
use futures_util::StreamExt;
use modelcheck_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: usize = 10;

/// A downloaded artifact
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

/// HTTP(S) artifact downloader
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    /// Create a fetcher whose redirects are held to `policy`
    pub fn new(policy: EgressPolicy) -> Result<Self> {
        let redirect = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if let Err(e) = check_url(attempt.url(), &policy) {
                attempt.error(e)
            } else {
                attempt.follow()
            }
        });

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(redirect)
            .user_agent(concat!("modelcheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Download `url` into `dest`
    ///
    /// Fails with [`Error::SizeExceeded`] (or [`Error::SizeMismatch`] when the
    /// server announces a larger `Content-Length`) as soon as the artifact is
    /// known to be bigger than `declared_size`. A smaller artifact is fully
    /// downloaded; comparing the final count is the caller's size check.
    pub async fn fetch(
        &self,
        url: &Url,
        dest: &Path,
        declared_size: u64,
        cancel: &CancellationToken,
    ) -> Result<FetchedArtifact> {
        debug!("GET {}", url);

        let response = tokio::select! {
            res = self.client.get(url.clone()).send() => res.map_err(|e| Error::network(describe(&e)))?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::network(format!("GET {} returned {}", url, status)));
        }

        if let Some(length) = response.content_length() {
            if length > declared_size {
                return Err(Error::SizeMismatch {
                    actual: length,
                    declared: declared_size,
                });
            }
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = response.bytes_stream();
        let mut hasher = Sha256::new();
        let mut received: u64 = 0;

        loop {
            let next = tokio::select! {
                chunk = body.next() => chunk,
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| {
                Error::network(format!("error reading body of {}: {}", url, describe(&e)))
            })?;

            received += chunk.len() as u64;
            if received > declared_size {
                return Err(Error::SizeExceeded {
                    received,
                    declared: declared_size,
                });
            }

            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        let sha256 = format!("{:x}", hasher.finalize());
        info!("Downloaded {} bytes from {} (sha256 {})", received, url, sha256);

        Ok(FetchedArtifact {
            path: dest.to_path_buf(),
            bytes: received,
            sha256,
        })
    }
}

/// Error text including its sources, which reqwest keeps out of `Display`
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}
