// src/config.rs

//! osimage configuration file
//!
//! TOML with four optional sections. Every key has a default, so a missing
//! file behaves like an empty one:
//!
//! ```toml
//! [solver]
//! helper = ["/usr/libexec/osbuild-depsolve-dnf"]
//! cache_dir = "/var/cache/osimage/rpmmd"
//! api_version = "auto"
//!
//! [aws]
//! region = "us-east-1"
//! bucket = "images"
//! share_with = ["123456789012"]
//! boot_mode = "uefi"
//!
//! [azure]
//! resource_group = "images-rg"
//! upload_concurrency = 16
//!
//! [boot]
//! username = "azure"
//! ssh_public_key = "~/.ssh/id_ed25519.pub"
//! ```
//!
//! Credentials never live here; they come from flags or the environment.

use crate::cloud::aws::BootMode;
use crate::cloud::azure::{DEFAULT_UPLOAD_CONCURRENCY, STORAGE_CONTAINER};
use crate::depsolve::{ApiVersion, DEFAULT_HELPER};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub solver: SolverSection,
    pub aws: AwsSection,
    pub azure: AzureSection,
    pub boot: BootSection,
}

/// `[solver]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverSection {
    /// Helper program followed by leading arguments
    pub helper: Vec<String>,
    pub cache_dir: PathBuf,
    pub api_version: ApiVersion,
    pub proxy: Option<String>,
    /// Root whose repository files are used when a package set has none
    pub root_dir: Option<PathBuf>,
}

impl Default for SolverSection {
    fn default() -> Self {
        Self {
            helper: vec![DEFAULT_HELPER.to_string()],
            cache_dir: default_cache_dir(),
            api_version: ApiVersion::Auto,
            proxy: None,
            root_dir: None,
        }
    }
}

/// `[aws]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AwsSection {
    pub region: Option<String>,
    pub bucket: Option<String>,
    pub share_with: Vec<String>,
    /// `legacy`, `uefi` or `hybrid`
    pub boot_mode: Option<String>,
    pub instance_type: String,
    pub poll_interval_secs: u64,
}

impl Default for AwsSection {
    fn default() -> Self {
        Self {
            region: None,
            bucket: None,
            share_with: Vec::new(),
            boot_mode: None,
            instance_type: crate::cloud::aws::boot::DEFAULT_INSTANCE_TYPE.to_string(),
            poll_interval_secs: crate::cloud::DEFAULT_POLL_INTERVAL.as_secs(),
        }
    }
}

impl AwsSection {
    pub fn boot_mode(&self) -> Result<Option<BootMode>> {
        self.boot_mode.as_deref().map(str::parse).transpose()
    }
}

/// `[azure]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AzureSection {
    pub subscription: Option<String>,
    pub tenant: Option<String>,
    pub resource_group: Option<String>,
    pub container: String,
    pub upload_concurrency: usize,
}

impl Default for AzureSection {
    fn default() -> Self {
        Self {
            subscription: None,
            tenant: None,
            resource_group: None,
            container: STORAGE_CONTAINER.to_string(),
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
        }
    }
}

/// `[boot]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootSection {
    pub username: Option<String>,
    pub ssh_public_key: Option<PathBuf>,
    pub ssh_private_key: Option<PathBuf>,
    /// Overrides the architecture's default VM size
    pub vm_size: Option<String>,
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/var/cache"))
        .join("osimage")
        .join("rpmmd")
}

/// `$XDG_CONFIG_HOME/osimage/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("osimage").join("config.toml"))
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

impl Config {
    /// Parse a configuration document
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content).map_err(|e| e.context(path.display().to_string()))
    }

    /// Load `path`, or the default file if it exists, or the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => {
                debug!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.solver.helper.is_empty() || self.solver.helper[0].is_empty() {
            return Err(Error::ConfigError("solver.helper must not be empty".to_string()));
        }
        self.aws.boot_mode()?;
        if self.aws.poll_interval_secs == 0 {
            return Err(Error::ConfigError(
                "aws.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.azure.upload_concurrency == 0 {
            return Err(Error::ConfigError(
                "azure.upload_concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
