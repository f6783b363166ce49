//! Service configuration

use crate::extract::ExtractLimits;
use crate::security::EgressPolicy;
use anyhow::{bail, Context};
use modelcheck_validators::GraphConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory under which per-request scratch directories are created
    #[serde(default = "default_scratch_root")]
    pub scratch_root: PathBuf,

    /// Requests that may wait behind the one being validated
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Per-stage deadlines
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Size limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Graph-runtime validator settings
    #[serde(default)]
    pub graph: GraphConfig,

    /// Artifact URL policy
    #[serde(default)]
    pub egress: EgressPolicy,
}

/// Values given on the command line, taking precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen: Option<String>,
    pub port: Option<u16>,
    pub scratch_root: Option<PathBuf>,
}

impl ServiceConfig {
    /// Load configuration from file and CLI overrides
    pub fn load(config_path: impl AsRef<Path>, overrides: &ConfigOverrides) -> anyhow::Result<Self> {
        let config_path = config_path.as_ref();

        // Try to load from file, or use defaults
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        if let Some(listen) = &overrides.listen {
            config.listen = listen.clone();
        }

        if let Some(port) = overrides.port {
            config.port = port;
        }

        if let Some(scratch_root) = &overrides.scratch_root {
            config.scratch_root = scratch_root.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Address to bind, from `listen` and `port`
    ///
    /// `listen` is a bare IPv4 or IPv6 address such as `0.0.0.0` or `::`.
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .listen
            .parse()
            .with_context(|| format!("listen must be an IP address, got {:?}", self.listen))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        self.socket_addr()?;
        if self.queue_depth == 0 {
            bail!("queue_depth must be at least 1");
        }
        if self.timeouts.fetch_secs == 0
            || self.timeouts.extract_secs == 0
            || self.timeouts.validate_secs == 0
        {
            bail!("stage timeouts must be at least one second");
        }
        if self.limits.max_archive_entries == 0 || self.limits.max_extracted_bytes == 0 {
            bail!("archive limits must be non-zero");
        }
        if self.graph.tags.is_empty() {
            bail!("graph.tags must name at least one meta graph tag");
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            scratch_root: default_scratch_root(),
            queue_depth: default_queue_depth(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            graph: GraphConfig::default(),
            egress: EgressPolicy::default(),
        }
    }
}

/// Stage deadlines in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_fetch_secs")]
    pub fetch_secs: u64,

    #[serde(default = "default_extract_secs")]
    pub extract_secs: u64,

    #[serde(default = "default_validate_secs")]
    pub validate_secs: u64,
}

impl TimeoutConfig {
    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }

    pub fn extract(&self) -> Duration {
        Duration::from_secs(self.extract_secs)
    }

    pub fn validate(&self) -> Duration {
        Duration::from_secs(self.validate_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch_secs: default_fetch_secs(),
            extract_secs: default_extract_secs(),
            validate_secs: default_validate_secs(),
        }
    }
}

/// Size limits for artifacts and their contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest declared artifact size accepted
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,

    /// Largest total uncompressed size of an archive
    #[serde(default = "default_max_extracted_bytes")]
    pub max_extracted_bytes: u64,

    /// Most entries an archive may hold
    #[serde(default = "default_max_archive_entries")]
    pub max_archive_entries: usize,
}

impl LimitsConfig {
    pub fn extract_limits(&self) -> ExtractLimits {
        ExtractLimits {
            max_extracted_bytes: self.max_extracted_bytes,
            max_entries: self.max_archive_entries,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_artifact_bytes: default_max_artifact_bytes(),
            max_extracted_bytes: default_max_extracted_bytes(),
            max_archive_entries: default_max_archive_entries(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8500
}

fn default_scratch_root() -> PathBuf {
    std::env::temp_dir().join("modelcheck")
}

fn default_queue_depth() -> usize {
    64
}

fn default_fetch_secs() -> u64 {
    600
}

fn default_extract_secs() -> u64 {
    300
}

fn default_validate_secs() -> u64 {
    300
}

fn default_max_artifact_bytes() -> u64 {
    4 * 1024 * 1024 * 1024
}

fn default_max_extracted_bytes() -> u64 {
    16 * 1024 * 1024 * 1024
}

fn default_max_archive_entries() -> usize {
    100_000
}
