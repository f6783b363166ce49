//! Graph worker protocol
//!
//! The worker writes exactly one JSON line on stdout and exits 0 whatever the
//! load outcome. Anything else (non-zero exit, no parsable line) means the
//! worker itself failed, which the host reports as [`Error::WorkerSpawn`].

use crate::saved_model;
use modelcheck_core::{Error, Result, ValidationResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Outcome of one load attempt, as sent across the process boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub valid: bool,

    #[serde(default)]
    pub message: String,
}

impl WorkerReport {
    /// Run the session loader against `model_dir`
    pub fn from_load(model_dir: &Path, tags: &[String]) -> Self {
        match saved_model::probe(model_dir, tags) {
            Ok(()) => Self {
                valid: true,
                message: String::new(),
            },
            Err(message) => Self {
                valid: false,
                message,
            },
        }
    }

    /// Parse the report from captured stdout
    ///
    /// The last non-empty line wins so that stray output from native code
    /// loaded into the worker cannot shadow the report.
    pub fn parse(stdout: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(stdout);
        let line = text
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| Error::worker_spawn("worker exited without a report"))?;

        serde_json::from_str(line)
            .map_err(|e| Error::worker_spawn(format!("unreadable worker report: {}", e)))
    }
}

impl From<WorkerReport> for ValidationResult {
    fn from(report: WorkerReport) -> Self {
        if report.valid {
            ValidationResult::valid()
        } else {
            ValidationResult::invalid(report.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_last_line() {
        let stdout = b"native runtime banner\n{\"valid\":false,\"message\":\"boom\"}\n\n";
        let report = WorkerReport::parse(stdout).unwrap();
        assert!(!report.valid);
        assert_eq!(report.message, "boom");
    }

    #[test]
    fn test_parse_empty_output() {
        let err = WorkerReport::parse(b"   \n").unwrap_err();
        assert_eq!(err.kind(), "worker_spawn");
    }

    #[test]
    fn test_parse_garbage() {
        let err = WorkerReport::parse(b"Segmentation fault").unwrap_err();
        assert!(err.to_string().contains("unreadable worker report"));
    }

    #[test]
    fn test_valid_report_has_empty_message() {
        let result: ValidationResult = WorkerReport {
            valid: true,
            message: "ignored".to_string(),
        }
        .into();
        assert_eq!(result, ValidationResult::valid());
    }
}
