// src/depsolve/protocol.rs

//! Wire protocol shared by the helper API versions
//!
//! A protocol handler turns domain inputs into one JSON request and parses
//! the helper's JSON answer back into domain types. The handler is chosen
//! once per solver and never changes afterwards.

use super::chain::ChainPlan;
use super::{ModuleConfigFile, ModuleFailsafeFile, ModuleSpec, SbomType};
use crate::error::{Error, Result};
use crate::hash::sha256;
use crate::repository::{Package, RepoConfig};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::path::PathBuf;

/// Commands understood by the helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperCommand {
    Depsolve,
    Dump,
    Search,
}

impl HelperCommand {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Depsolve => "depsolve",
            Self::Dump => "dump",
            Self::Search => "search",
        }
    }
}

/// Per-solver settings that go into every request envelope
#[derive(Debug, Clone, Default)]
pub struct SolverConfig {
    pub module_platform_id: String,
    pub release_ver: String,
    pub arch: String,
    pub cache_dir: PathBuf,
    pub root_dir: Option<PathBuf>,
    pub proxy: Option<String>,
}

impl SolverConfig {
    pub(crate) fn cache_dir_str(&self) -> String {
        self.cache_dir.to_string_lossy().into_owned()
    }

    pub(crate) fn root_dir_str(&self) -> String {
        self.root_dir
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A serialized helper request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: HelperCommand,
    body: Vec<u8>,
}

impl Request {
    pub(crate) fn encode<T: Serialize>(command: HelperCommand, envelope: &T) -> Result<Self> {
        Ok(Self {
            command,
            body: serde_json::to_vec(envelope)?,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }

    /// SHA-256 of the serialized request, usable as a cache key
    pub fn hash(&self) -> String {
        sha256(&self.body)
    }
}

/// Common request envelope; `api_version` and `proxy` differ per version
#[derive(Debug, Serialize)]
pub(crate) struct Envelope<'a, A> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<u32>,
    pub command: &'static str,
    pub module_platform_id: &'a str,
    pub releasever: &'a str,
    pub arch: &'a str,
    pub cachedir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<&'a str>,
    pub arguments: A,
}

impl<'a, A> Envelope<'a, A> {
    pub(crate) fn new(
        api_version: Option<u32>,
        command: HelperCommand,
        cfg: &'a SolverConfig,
        proxy: Option<&'a str>,
        arguments: A,
    ) -> Self {
        Self {
            api_version,
            command: command.as_str(),
            module_platform_id: &cfg.module_platform_id,
            releasever: &cfg.release_ver,
            arch: &cfg.arch,
            cachedir: cfg.cache_dir_str(),
            proxy,
            arguments,
        }
    }
}

/// `{"type": "spdx"}`
#[derive(Debug, Serialize)]
pub(crate) struct SbomRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl From<SbomType> for SbomRequest {
    fn from(sbom: SbomType) -> Self {
        Self {
            kind: sbom.as_str(),
        }
    }
}

/// Parsed depsolve answer before the chain engine post-processes it
#[derive(Debug, Default)]
pub struct ParsedDepsolve {
    pub solver: String,
    pub transactions: Vec<Vec<Package>>,
    /// Sorted by repository ID
    pub repos: Vec<RepoConfig>,
    pub modules: Vec<ModuleSpec>,
    pub sbom: Option<Box<RawValue>>,
}

/// Parsed dump or search answer
#[derive(Debug, Default)]
pub struct ParsedPackages {
    pub solver: String,
    pub packages: Vec<Package>,
    /// Sorted by repository ID
    pub repos: Vec<RepoConfig>,
}

/// One helper API version
pub trait ProtocolHandler: Send + Sync {
    /// Version number advertised by the helper
    fn version(&self) -> u32;

    fn depsolve_request(
        &self,
        cfg: &SolverConfig,
        plan: &ChainPlan,
        sbom: Option<SbomType>,
    ) -> Result<Request>;

    fn dump_request(&self, cfg: &SolverConfig, repos: &[RepoConfig]) -> Result<Request>;

    fn search_request(
        &self,
        cfg: &SolverConfig,
        repos: &[RepoConfig],
        packages: &[String],
    ) -> Result<Request>;

    fn parse_depsolve(&self, output: &[u8]) -> Result<ParsedDepsolve>;

    fn parse_dump(&self, output: &[u8]) -> Result<ParsedPackages>;

    fn parse_search(&self, output: &[u8]) -> Result<ParsedPackages>;
}

/// Error document printed by the helper on failure
#[derive(Debug, Deserialize)]
pub(crate) struct HelperError {
    pub kind: String,
    pub reason: String,
}

impl From<HelperError> for Error {
    fn from(err: HelperError) -> Self {
        Error::DepsolveError {
            kind: err.kind,
            reason: err.reason,
        }
    }
}

/// Decode a helper answer, tagging the error with the command name
pub(crate) fn decode<'de, T: Deserialize<'de>>(what: &str, output: &'de [u8]) -> Result<T> {
    serde_json::from_slice(output)
        .map_err(|e| Error::InternalError(format!("decoding {} result failed: {}", what, e)))
}

/// Look up a package's repository or fail with `repo ID not found`
pub(crate) fn lookup_repo<'a>(
    repos: &'a HashMap<String, RepoConfig>,
    package: &str,
    repo_id: &str,
) -> Result<&'a RepoConfig> {
    repos.get(repo_id).ok_or_else(|| {
        Error::InternalError(format!(
            "repo ID not found: package {:?} references {:?}",
            package, repo_id
        ))
    })
}

/// Copy repository-derived flags onto a package
pub(crate) fn inherit_repo_flags(package: &mut Package, repo: &RepoConfig) {
    package.check_gpg = repo.check_gpg.unwrap_or(false);
    package.ignore_ssl = repo.ignore_ssl.unwrap_or(false);
    package.secrets = repo.secrets().map(str::to_string);
}

/// Module entry as sent by the helper, keyed by module name
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct WireModule {
    #[serde(rename = "module-file")]
    pub module_file: ModuleConfigFile,
    #[serde(rename = "failsafe-file")]
    pub failsafe_file: ModuleFailsafeFile,
}

/// Module records sorted by name
pub(crate) fn modules_from_wire(modules: Option<HashMap<String, WireModule>>) -> Vec<ModuleSpec> {
    let mut specs: Vec<ModuleSpec> = modules
        .unwrap_or_default()
        .into_iter()
        .map(|(name, m)| ModuleSpec {
            name,
            module_config_file: m.module_file,
            failsafe_file: m.failsafe_file,
        })
        .collect();
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    specs
}

/// Turn a repository map into a list sorted by ID plus the lookup map
pub(crate) fn sorted_repos(
    repos: HashMap<String, RepoConfig>,
) -> (Vec<RepoConfig>, HashMap<String, RepoConfig>) {
    let mut list: Vec<RepoConfig> = repos.values().cloned().collect();
    list.sort_by(|a, b| a.id.cmp(&b.id));
    (list, repos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_hash_tracks_body() {
        let a = Request::encode(HelperCommand::Dump, &serde_json::json!({"command": "dump"}))
            .unwrap();
        let b = Request::encode(
            HelperCommand::Search,
            &serde_json::json!({"command": "search"}),
        )
        .unwrap();
        assert_eq!(a.hash().len(), 64);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_inherit_repo_flags() {
        let repo = RepoConfig {
            check_gpg: Some(true),
            ignore_ssl: Some(true),
            rhsm: true,
            ..RepoConfig::with_base_url("rhel", "https://cdn.example.com/rhel")
        };
        let mut pkg = Package::default();
        inherit_repo_flags(&mut pkg, &repo);
        assert!(pkg.check_gpg);
        assert!(pkg.ignore_ssl);
        assert_eq!(pkg.secrets.as_deref(), Some("org.osbuild.rhsm.consumer"));
    }

    #[test]
    fn test_sorted_repos() {
        let mut map = HashMap::new();
        map.insert(
            "repo-b".to_string(),
            RepoConfig { id: "repo-b".into(), name: "Repo B".into(), ..Default::default() },
        );
        map.insert(
            "repo-a".to_string(),
            RepoConfig { id: "repo-a".into(), name: "Repo A".into(), ..Default::default() },
        );
        let (list, map) = sorted_repos(map);
        assert_eq!(list[0].id, "repo-a");
        assert_eq!(list[1].id, "repo-b");
        assert_eq!(map["repo-a"].name, "Repo A");
    }
}
