// src/depsolve/v2.rs

//! Helper API version 2
//!
//! Requests carry `"api_version": 2` and omit every unset field. Answers
//! report transactions as lists of fully described packages and
//! repositories as a map keyed by repository ID.

use super::chain::{ChainPlan, TransactionArgs};
use super::protocol::{
    decode, inherit_repo_flags, lookup_repo, modules_from_wire, sorted_repos, Envelope,
    HelperCommand, ParsedDepsolve, ParsedPackages, ProtocolHandler, Request, SbomRequest,
    SolverConfig, WireModule,
};
use super::SbomType;
use crate::error::Result;
use crate::repository::{Checksum, Package, RelDep, RepoConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;

/// Version 2 protocol handler
#[derive(Debug, Default, Clone, Copy)]
pub struct V2Handler;

impl V2Handler {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Serialize)]
struct RepoArg {
    id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    baseurl: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    metalink: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    mirrorlist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    gpgcheck: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repo_gpgcheck: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    gpgkey: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sslverify: Option<bool>,
    #[serde(skip_serializing_if = "String::is_empty")]
    sslcacert: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    sslclientkey: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    sslclientcert: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    metadata_expire: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    module_hotfixes: Option<bool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    rhsm: bool,
}

impl From<&RepoConfig> for RepoArg {
    fn from(repo: &RepoConfig) -> Self {
        Self {
            id: repo.id.clone(),
            name: repo.name.clone(),
            baseurl: repo.base_urls.clone(),
            metalink: repo.metalink.clone(),
            mirrorlist: repo.mirrorlist.clone(),
            gpgcheck: repo.check_gpg,
            repo_gpgcheck: repo.check_repo_gpg,
            gpgkey: repo.gpg_keys.clone(),
            sslverify: repo.ignore_ssl.map(|ignore| !ignore),
            sslcacert: repo.ssl_ca_cert.clone(),
            sslclientkey: repo.ssl_client_key.clone(),
            sslclientcert: repo.ssl_client_cert.clone(),
            metadata_expire: repo.metadata_expire.clone(),
            module_hotfixes: repo.module_hotfixes,
            rhsm: repo.rhsm,
        }
    }
}

#[derive(Debug, Serialize)]
struct TransactionArg<'a> {
    #[serde(rename = "package-specs")]
    package_specs: &'a [String],
    #[serde(rename = "exclude-specs", skip_serializing_if = "<[String]>::is_empty")]
    exclude_specs: &'a [String],
    #[serde(
        rename = "module-enable-specs",
        skip_serializing_if = "<[String]>::is_empty"
    )]
    module_enable_specs: &'a [String],
    #[serde(rename = "repo-ids")]
    repo_ids: &'a [String],
    install_weak_deps: bool,
}

impl<'a> From<&'a TransactionArgs> for TransactionArg<'a> {
    fn from(args: &'a TransactionArgs) -> Self {
        Self {
            package_specs: &args.package_specs,
            exclude_specs: &args.exclude_specs,
            module_enable_specs: &args.module_enable_specs,
            repo_ids: &args.repo_ids,
            install_weak_deps: args.install_weak_deps,
        }
    }
}

#[derive(Debug, Serialize)]
struct DepsolveArgs<'a> {
    repos: Vec<RepoArg>,
    transactions: Vec<TransactionArg<'a>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    root_dir: String,
    #[serde(rename = "optional-metadata")]
    optional_metadata: [&'static str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    sbom: Option<SbomRequest>,
}

#[derive(Debug, Serialize)]
struct DumpArgs {
    repos: Vec<RepoArg>,
}

#[derive(Debug, Serialize)]
struct SearchArgs<'a> {
    repos: Vec<RepoArg>,
    search: SearchSpec<'a>,
}

#[derive(Debug, Serialize)]
struct SearchSpec<'a> {
    latest: bool,
    packages: &'a [String],
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireRepo {
    id: String,
    name: Option<String>,
    baseurl: Option<Vec<String>>,
    metalink: Option<String>,
    mirrorlist: Option<String>,
    gpgcheck: Option<bool>,
    repo_gpgcheck: Option<bool>,
    gpgkey: Option<Vec<String>>,
    sslverify: Option<bool>,
    sslcacert: Option<String>,
    sslclientkey: Option<String>,
    sslclientcert: Option<String>,
    metadata_expire: Option<String>,
    module_hotfixes: Option<bool>,
    rhsm: Option<bool>,
}

impl From<WireRepo> for RepoConfig {
    fn from(repo: WireRepo) -> Self {
        RepoConfig {
            id: repo.id,
            name: repo.name.unwrap_or_default(),
            base_urls: repo.baseurl.unwrap_or_default(),
            metalink: repo.metalink.unwrap_or_default(),
            mirrorlist: repo.mirrorlist.unwrap_or_default(),
            gpg_keys: repo.gpgkey.unwrap_or_default(),
            check_gpg: repo.gpgcheck,
            check_repo_gpg: repo.repo_gpgcheck,
            ignore_ssl: repo.sslverify.map(|verify| !verify),
            ssl_ca_cert: repo.sslcacert.unwrap_or_default(),
            ssl_client_key: repo.sslclientkey.unwrap_or_default(),
            ssl_client_cert: repo.sslclientcert.unwrap_or_default(),
            metadata_expire: repo.metadata_expire.unwrap_or_default(),
            module_hotfixes: repo.module_hotfixes,
            rhsm: repo.rhsm.unwrap_or(false),
            enabled: Some(true),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireChecksum {
    algorithm: String,
    value: String,
}

impl From<WireChecksum> for Checksum {
    fn from(sum: WireChecksum) -> Self {
        Checksum::new(sum.algorithm, sum.value)
    }
}

#[derive(Debug, Deserialize)]
struct WireDependency {
    name: String,
    #[serde(default)]
    relation: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

fn rel_deps(deps: Option<Vec<WireDependency>>) -> Vec<RelDep> {
    deps.unwrap_or_default()
        .into_iter()
        .map(|d| RelDep {
            name: d.name,
            relationship: d.relation.unwrap_or_default(),
            version: d.version.unwrap_or_default(),
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WirePackage {
    name: String,
    epoch: u32,
    version: String,
    release: String,
    arch: String,
    repo_id: String,
    location: Option<String>,
    remote_locations: Option<Vec<String>>,
    checksum: Option<WireChecksum>,
    header_checksum: Option<WireChecksum>,
    license: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    url: Option<String>,
    vendor: Option<String>,
    packager: Option<String>,
    build_time: Option<DateTime<Utc>>,
    download_size: Option<u64>,
    install_size: Option<u64>,
    group: Option<String>,
    source_rpm: Option<String>,
    reason: Option<String>,
    provides: Option<Vec<WireDependency>>,
    requires: Option<Vec<WireDependency>>,
    requires_pre: Option<Vec<WireDependency>>,
    conflicts: Option<Vec<WireDependency>>,
    obsoletes: Option<Vec<WireDependency>>,
    regular_requires: Option<Vec<WireDependency>>,
    recommends: Option<Vec<WireDependency>>,
    suggests: Option<Vec<WireDependency>>,
    enhances: Option<Vec<WireDependency>>,
    supplements: Option<Vec<WireDependency>>,
    files: Option<Vec<String>>,
}

impl WirePackage {
    fn into_package(self, repos: &HashMap<String, RepoConfig>) -> Result<Package> {
        let repo = lookup_repo(repos, &self.name, &self.repo_id)?;
        let mut pkg = Package {
            name: self.name,
            epoch: self.epoch,
            version: self.version,
            release: self.release,
            arch: self.arch,
            repo_id: self.repo_id,
            location: self.location.unwrap_or_default(),
            remote_locations: self.remote_locations.unwrap_or_default(),
            checksum: self.checksum.map(Into::into),
            header_checksum: self.header_checksum.map(Into::into),
            license: self.license.unwrap_or_default(),
            summary: self.summary.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            url: self.url.unwrap_or_default(),
            vendor: self.vendor.unwrap_or_default(),
            packager: self.packager.unwrap_or_default(),
            build_time: self.build_time,
            download_size: self.download_size.unwrap_or(0),
            install_size: self.install_size.unwrap_or(0),
            group: self.group.unwrap_or_default(),
            source_rpm: self.source_rpm.unwrap_or_default(),
            reason: self.reason.unwrap_or_default(),
            provides: rel_deps(self.provides),
            requires: rel_deps(self.requires),
            requires_pre: rel_deps(self.requires_pre),
            conflicts: rel_deps(self.conflicts),
            obsoletes: rel_deps(self.obsoletes),
            regular_requires: rel_deps(self.regular_requires),
            recommends: rel_deps(self.recommends),
            suggests: rel_deps(self.suggests),
            enhances: rel_deps(self.enhances),
            supplements: rel_deps(self.supplements),
            files: self.files.unwrap_or_default(),
            ..Default::default()
        };
        inherit_repo_flags(&mut pkg, repo);
        Ok(pkg)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DepsolveResponse {
    solver: String,
    transactions: Option<Vec<Vec<WirePackage>>>,
    repos: Option<HashMap<String, WireRepo>>,
    modules: Option<HashMap<String, WireModule>>,
    sbom: Option<Box<RawValue>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PackagesResponse {
    solver: String,
    packages: Option<Vec<WirePackage>>,
    repos: Option<HashMap<String, WireRepo>>,
}

fn convert_repos(
    repos: Option<HashMap<String, WireRepo>>,
) -> (Vec<RepoConfig>, HashMap<String, RepoConfig>) {
    sorted_repos(
        repos
            .unwrap_or_default()
            .into_iter()
            .map(|(id, repo)| (id, repo.into()))
            .collect(),
    )
}

impl V2Handler {
    fn repo_args(repos: &[RepoConfig]) -> Vec<RepoArg> {
        repos.iter().map(RepoArg::from).collect()
    }

    fn parse_packages(&self, what: &str, output: &[u8]) -> Result<ParsedPackages> {
        let response: PackagesResponse = decode(what, output)?;
        let (repos, repo_map) = convert_repos(response.repos);
        let packages = response
            .packages
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.into_package(&repo_map))
            .collect::<Result<Vec<_>>>()?;

        Ok(ParsedPackages {
            solver: response.solver,
            packages,
            repos,
        })
    }
}

impl ProtocolHandler for V2Handler {
    fn version(&self) -> u32 {
        2
    }

    fn depsolve_request(
        &self,
        cfg: &SolverConfig,
        plan: &ChainPlan,
        sbom: Option<SbomType>,
    ) -> Result<Request> {
        let args = DepsolveArgs {
            repos: Self::repo_args(&plan.repos),
            transactions: plan.transactions.iter().map(TransactionArg::from).collect(),
            root_dir: cfg.root_dir_str(),
            optional_metadata: ["filelists"],
            sbom: sbom.map(SbomRequest::from),
        };
        let envelope = Envelope::new(
            Some(2),
            HelperCommand::Depsolve,
            cfg,
            cfg.proxy.as_deref(),
            args,
        );
        Request::encode(HelperCommand::Depsolve, &envelope)
    }

    fn dump_request(&self, cfg: &SolverConfig, repos: &[RepoConfig]) -> Result<Request> {
        let args = DumpArgs {
            repos: Self::repo_args(repos),
        };
        let envelope = Envelope::new(Some(2), HelperCommand::Dump, cfg, cfg.proxy.as_deref(), args);
        Request::encode(HelperCommand::Dump, &envelope)
    }

    fn search_request(
        &self,
        cfg: &SolverConfig,
        repos: &[RepoConfig],
        packages: &[String],
    ) -> Result<Request> {
        let args = SearchArgs {
            repos: Self::repo_args(repos),
            search: SearchSpec {
                latest: false,
                packages,
            },
        };
        let envelope = Envelope::new(
            Some(2),
            HelperCommand::Search,
            cfg,
            cfg.proxy.as_deref(),
            args,
        );
        Request::encode(HelperCommand::Search, &envelope)
    }

    fn parse_depsolve(&self, output: &[u8]) -> Result<ParsedDepsolve> {
        let response: DepsolveResponse = decode("depsolve", output)?;
        let (repos, repo_map) = convert_repos(response.repos);

        let transactions = response
            .transactions
            .unwrap_or_default()
            .into_iter()
            .map(|tx| {
                tx.into_iter()
                    .map(|p| p.into_package(&repo_map))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ParsedDepsolve {
            solver: response.solver,
            transactions,
            repos,
            modules: modules_from_wire(response.modules),
            sbom: response.sbom,
        })
    }

    fn parse_dump(&self, output: &[u8]) -> Result<ParsedPackages> {
        self.parse_packages("dump", output)
    }

    fn parse_search(&self, output: &[u8]) -> Result<ParsedPackages> {
        self.parse_packages("search", output)
    }
}
