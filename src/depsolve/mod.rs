// src/depsolve/mod.rs

//! Depsolving through an external helper process
//!
//! The `Solver` turns a chain of package sets into concrete packages by
//! sending one JSON request to a depsolve helper (by default
//! `osbuild-depsolve-dnf`) and parsing its answer.
//!
//! # Protocol versions
//!
//! | Version | Selected when |
//! |---------|---------------|
//! | 2 | the helper lists 2 in its `api-versions` answer, or forced |
//! | 1 | anything else, including a helper that rejects the probe |
//!
//! The version is negotiated on first use and kept for the solver's
//! lifetime.

mod chain;
mod protocol;
mod transactions;
pub mod v1;
pub mod v2;

pub use chain::{plan_chain, validate_chain, wire_repo, ChainPlan, TransactionArgs};
pub use protocol::{
    HelperCommand, ParsedDepsolve, ParsedPackages, ProtocolHandler, Request, SolverConfig,
};
pub use transactions::{TransactionFileInfo, TransactionList};

use crate::error::{Error, Result, ResultExt};
use crate::repository::{dedup_by_nevra, sort_by_nevra, Package, PackageList, PackageSet, RepoConfig};
use crate::runner::{resolve_program, Runner};
use protocol::HelperError;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Default depsolve helper
pub const DEFAULT_HELPER: &str = "/usr/libexec/osbuild-depsolve-dnf";

/// Helper error kind used for repository fetch failures
const REPO_ERROR_KIND: &str = "RepoError";

/// Destination for the helper's stderr
pub type StderrSink = Arc<Mutex<dyn Write + Send>>;

/// SBOM formats the helper can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SbomType {
    Spdx,
}

impl SbomType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spdx => "spdx",
        }
    }
}

impl FromStr for SbomType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "spdx" => Ok(Self::Spdx),
            other => Err(Error::ConfigError(format!("unknown SBOM type {:?}", other))),
        }
    }
}

/// Requested helper API version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiVersion {
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "1")]
    V1,
    #[serde(rename = "2")]
    V2,
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::V1 => "1",
            Self::V2 => "2",
        })
    }
}

impl FromStr for ApiVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Self::Auto),
            "1" | "v1" => Ok(Self::V1),
            "2" | "v2" => Ok(Self::V2),
            other => Err(Error::ConfigError(format!(
                "unknown helper API version {:?} (expected auto, 1 or 2)",
                other
            ))),
        }
    }
}

/// Contents of a module's `.module` file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfigData {
    pub name: String,
    pub stream: String,
    pub profiles: Vec<String>,
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfigFile {
    pub path: String,
    pub data: ModuleConfigData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleFailsafeFile {
    pub path: String,
    pub data: String,
}

/// Modulemd artifacts of one enabled module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub name: String,
    pub module_config_file: ModuleConfigFile,
    pub failsafe_file: ModuleFailsafeFile,
}

/// Output of a chain depsolve
#[derive(Debug, Clone, Default, Serialize)]
pub struct DepsolveResult {
    /// Union of all transactions in chain order, first NEVRA wins
    pub packages: Vec<Package>,
    /// Per-step packages, each sorted by NEVRA
    pub transactions: TransactionList,
    /// Repositories sorted by ID
    pub repos: Vec<RepoConfig>,
    pub modules: Vec<ModuleSpec>,
    /// SBOM document exactly as produced by the helper
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sbom: Option<Box<RawValue>>,
    pub solver: String,
}

/// Output of a dump or search
#[derive(Debug, Clone, Default, Serialize)]
pub struct PackageListing {
    pub packages: PackageList,
    /// Repositories sorted by ID
    pub repos: Vec<RepoConfig>,
    pub solver: String,
}

pub type DumpResult = PackageListing;
pub type SearchResult = PackageListing;

#[derive(Debug, Deserialize)]
struct ApiVersions {
    api_versions: Vec<u32>,
}

/// Depsolve driver bound to one platform, release, architecture and cache
pub struct Solver {
    config: SolverConfig,
    helper: Vec<OsString>,
    api_version: ApiVersion,
    handler: OnceCell<Arc<dyn ProtocolHandler>>,
    stderr: Option<StderrSink>,
}

impl fmt::Debug for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Solver")
            .field("config", &self.config)
            .field("helper", &self.helper)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl Solver {
    /// Create a solver using the default helper
    pub fn new(
        module_platform_id: impl Into<String>,
        release_ver: impl Into<String>,
        arch: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config: SolverConfig {
                module_platform_id: module_platform_id.into(),
                release_ver: release_ver.into(),
                arch: arch.into(),
                cache_dir: cache_dir.into(),
                root_dir: None,
                proxy: None,
            },
            helper: vec![OsString::from(DEFAULT_HELPER)],
            api_version: ApiVersion::Auto,
            handler: OnceCell::new(),
            stderr: None,
        }
    }

    /// Use a different helper command: program followed by leading arguments
    pub fn with_helper<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let command: Vec<OsString> = command.into_iter().map(Into::into).collect();
        if !command.is_empty() {
            self.helper = command;
        }
        self
    }

    /// Pin the helper API version instead of negotiating it
    pub fn with_api_version(mut self, version: ApiVersion) -> Self {
        self.api_version = version;
        self.handler = OnceCell::new();
        self
    }

    /// Send helper stderr to `sink` instead of the process's stderr
    pub fn with_stderr_sink(mut self, sink: StderrSink) -> Self {
        self.stderr = Some(sink);
        self
    }

    /// Derive host repositories from this root when a package set has none
    pub fn set_root_dir(&mut self, root_dir: impl Into<PathBuf>) {
        self.config.root_dir = Some(root_dir.into());
    }

    pub fn set_proxy(&mut self, proxy: impl Into<String>) {
        let proxy = proxy.into();
        self.config.proxy = (!proxy.is_empty()).then_some(proxy);
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    fn runner(&self) -> Result<Runner> {
        let program = self
            .helper
            .first()
            .map(|p| p.to_string_lossy().into_owned())
            .ok_or_else(|| Error::ConfigError("empty depsolve helper command".to_string()))?;
        Ok(Runner::new(resolve_program(&program)?).args(self.helper[1..].iter().cloned()))
    }

    fn forward_stderr(&self, name: &str, stderr: &[u8]) {
        if stderr.is_empty() {
            return;
        }
        debug!("{} stderr: {}", name, String::from_utf8_lossy(stderr).trim_end());

        let written = match &self.stderr {
            Some(sink) => {
                // A writer that panicked mid-write still takes the output
                let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
                sink.write_all(stderr)
            }
            None => std::io::stderr().write_all(stderr),
        };
        if let Err(e) = written {
            warn!("Failed to forward {} stderr: {}", name, e);
        }
    }

    /// Run the helper with one request and return its stdout
    async fn call(&self, request: &[u8]) -> Result<Vec<u8>> {
        let runner = self.runner()?;
        let name = runner.name();
        let output = runner.run(Some(request)).await?;

        self.forward_stderr(&name, &output.stderr);

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::DepsolveError {
                kind: "InternalError".to_string(),
                reason: format!("{} output was empty", name),
            });
        }

        if !output.success() {
            return match serde_json::from_slice::<HelperError>(&output.stdout) {
                Ok(err) => Err(err.into()),
                Err(_) => Err(Error::InternalError(format!(
                    "{} failed ({}): {}",
                    name,
                    output.status,
                    output.stdout_str().trim()
                ))),
            };
        }

        Ok(output.stdout)
    }

    /// Ask the helper which API versions it speaks
    async fn probe(&self) -> Arc<dyn ProtocolHandler> {
        let request = br#"{"command":"api-versions"}"#;
        match self.call(request).await {
            Ok(out) => match serde_json::from_slice::<ApiVersions>(&out) {
                Ok(versions) if versions.api_versions.contains(&2) => {
                    debug!("Helper supports API versions {:?}", versions.api_versions);
                    Arc::new(v2::V2Handler::new())
                }
                Ok(versions) => {
                    debug!("Helper supports API versions {:?}", versions.api_versions);
                    Arc::new(v1::V1Handler::new())
                }
                Err(e) => {
                    debug!("Unrecognized api-versions answer, using v1: {}", e);
                    Arc::new(v1::V1Handler::new())
                }
            },
            Err(e) => {
                debug!("api-versions probe failed, using v1: {}", e);
                Arc::new(v1::V1Handler::new())
            }
        }
    }

    /// The protocol handler for this solver, negotiated once
    pub async fn handler(&self) -> Arc<dyn ProtocolHandler> {
        self.handler
            .get_or_init(|| async {
                let handler: Arc<dyn ProtocolHandler> = match self.api_version {
                    ApiVersion::V1 => Arc::new(v1::V1Handler::new()),
                    ApiVersion::V2 => Arc::new(v2::V2Handler::new()),
                    ApiVersion::Auto => self.probe().await,
                };
                info!("Using depsolve helper API v{}", handler.version());
                handler
            })
            .await
            .clone()
    }

    /// Depsolve a chain of package sets
    ///
    /// The chain is validated before the helper runs: every repository of a
    /// step must carry over into the next step, and a step without
    /// repositories needs a root directory.
    pub async fn depsolve(
        &self,
        chain: &[PackageSet],
        sbom: Option<SbomType>,
    ) -> Result<DepsolveResult> {
        let plan = plan_chain(chain, self.config.root_dir.is_some())?;
        info!(
            "Depsolving {} package set(s) against {} repositories",
            plan.transactions.len(),
            plan.repos.len()
        );

        let handler = self.handler().await;
        let request = handler.depsolve_request(&self.config, &plan, sbom)?;
        debug!("Depsolve request {}", request.hash());

        let output = self
            .call(request.as_bytes())
            .await
            .map_err(|e| wrap_repo_error(e, &plan.source_urls()))?;
        let parsed = handler.parse_depsolve(&output)?;

        let mut transactions = parsed.transactions;
        for tx in &mut transactions {
            sort_by_nevra(tx);
        }
        let packages = dedup_by_nevra(transactions.iter().flatten().cloned().collect());

        info!(
            "Resolved {} packages in {} transaction(s) using {}",
            packages.len(),
            transactions.len(),
            if parsed.solver.is_empty() { "unknown solver" } else { parsed.solver.as_str() }
        );

        Ok(DepsolveResult {
            packages,
            transactions: TransactionList::new(transactions),
            repos: parsed.repos,
            modules: parsed.modules,
            sbom: parsed.sbom,
            solver: parsed.solver,
        })
    }

    fn listing_repos(repos: &[RepoConfig]) -> Result<Vec<RepoConfig>> {
        repos
            .iter()
            .map(|r| {
                r.validate()?;
                Ok(wire_repo(r))
            })
            .collect()
    }

    fn finish_listing(parsed: ParsedPackages, request_repos: Vec<RepoConfig>) -> PackageListing {
        let mut packages = parsed.packages;
        let repos = if parsed.repos.is_empty() {
            // Version 1 listings carry no repositories; use the request's
            let mut repos = request_repos;
            repos.sort_by(|a, b| a.id.cmp(&b.id));
            for pkg in &mut packages {
                if let Some(repo) = repos.iter().find(|r| r.id == pkg.repo_id) {
                    protocol::inherit_repo_flags(pkg, repo);
                }
            }
            repos
        } else {
            parsed.repos
        };

        PackageListing {
            packages: PackageList::new(packages),
            repos,
            solver: parsed.solver,
        }
    }

    /// List every package available in `repos`
    pub async fn dump(&self, repos: &[RepoConfig]) -> Result<DumpResult> {
        let repos = Self::listing_repos(repos)?;
        let handler = self.handler().await;
        let request = handler.dump_request(&self.config, &repos)?;

        let urls: Vec<String> = repos
            .iter()
            .filter_map(|r| r.source_url().map(str::to_string))
            .collect();
        let output = self
            .call(request.as_bytes())
            .await
            .map_err(|e| wrap_repo_error(e, &urls))?;

        let listing = Self::finish_listing(handler.parse_dump(&output)?, repos);
        info!("Dumped {} packages", listing.packages.len());
        Ok(listing)
    }

    /// Search `repos` for packages whose names match any of the globs
    pub async fn search(&self, repos: &[RepoConfig], globs: &[String]) -> Result<SearchResult> {
        let repos = Self::listing_repos(repos)?;
        let handler = self.handler().await;
        let request = handler.search_request(&self.config, &repos, globs)?;

        let urls: Vec<String> = repos
            .iter()
            .filter_map(|r| r.source_url().map(str::to_string))
            .collect();
        let output = self
            .call(request.as_bytes())
            .await
            .map_err(|e| wrap_repo_error(e, &urls))?;

        let listing = Self::finish_listing(handler.parse_search(&output)?, repos);
        info!("Search matched {} packages", listing.packages.len());
        Ok(listing)
    }
}

/// Point the user at the repository sources when the helper failed to fetch
fn wrap_repo_error(err: Error, urls: &[String]) -> Error {
    match &err {
        Error::DepsolveError { kind, .. } if kind == REPO_ERROR_KIND && !urls.is_empty() => {
            err.context(format!("fetching repositories {}", urls.join(", ")))
        }
        _ => err,
    }
}

/// Read a JSON file of repositories, as written by `osimage depsolve`
pub fn load_repos(path: &std::path::Path) -> Result<Vec<RepoConfig>> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))
}
