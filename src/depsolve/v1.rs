// src/depsolve/v1.rs

//! Helper API version 1
//!
//! The legacy protocol has no `api_version` field, always sends `proxy`,
//! `search`, `transactions` and `root_dir`, and requires the two GPG flags
//! on every repository. Depsolve answers list packages flat with a single
//! remote location and a `<algorithm>:<value>` checksum string; dump and
//! search answers are bare package arrays.

use super::chain::{ChainPlan, TransactionArgs};
use super::protocol::{
    decode, inherit_repo_flags, lookup_repo, modules_from_wire, sorted_repos, Envelope,
    HelperCommand, ParsedDepsolve, ParsedPackages, ProtocolHandler, Request, SbomRequest,
    SolverConfig, WireModule,
};
use super::SbomType;
use crate::error::{Error, Result};
use crate::repository::{Package, RepoConfig};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;

/// Version 1 protocol handler
#[derive(Debug, Default, Clone, Copy)]
pub struct V1Handler;

impl V1Handler {
    pub fn new() -> Self {
        Self
    }
}

/// Repository as sent to and returned by a version 1 helper
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct WireRepo {
    id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    baseurl: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    metalink: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    mirrorlist: String,
    gpgcheck: bool,
    repo_gpgcheck: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    gpgkeys: Vec<String>,
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

impl From<&RepoConfig> for WireRepo {
    fn from(repo: &RepoConfig) -> Self {
        Self {
            id: repo.id.clone(),
            name: repo.name.clone(),
            baseurl: repo.base_urls.clone(),
            metalink: repo.metalink.clone(),
            mirrorlist: repo.mirrorlist.clone(),
            gpgcheck: repo.check_gpg.unwrap_or(false),
            repo_gpgcheck: repo.check_repo_gpg.unwrap_or(false),
            gpgkeys: repo.gpg_keys.clone(),
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

impl From<WireRepo> for RepoConfig {
    fn from(repo: WireRepo) -> Self {
        RepoConfig {
            id: repo.id,
            name: repo.name,
            base_urls: repo.baseurl,
            metalink: repo.metalink,
            mirrorlist: repo.mirrorlist,
            gpg_keys: repo.gpgkeys,
            check_gpg: Some(repo.gpgcheck),
            check_repo_gpg: Some(repo.repo_gpgcheck),
            ignore_ssl: repo.sslverify.map(|verify| !verify),
            ssl_ca_cert: repo.sslcacert,
            ssl_client_key: repo.sslclientkey,
            ssl_client_cert: repo.sslclientcert,
            metadata_expire: repo.metadata_expire,
            module_hotfixes: repo.module_hotfixes,
            rhsm: repo.rhsm,
            enabled: Some(true),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct TransactionArg<'a> {
    #[serde(rename = "package-specs")]
    package_specs: &'a [String],
    /// `null` when empty
    #[serde(rename = "exclude-specs")]
    exclude_specs: Option<&'a [String]>,
    #[serde(
        rename = "module-enable-specs",
        skip_serializing_if = "Option::is_none"
    )]
    module_enable_specs: Option<&'a [String]>,
    #[serde(rename = "repo-ids")]
    repo_ids: &'a [String],
    install_weak_deps: bool,
}

fn non_empty(list: &[String]) -> Option<&[String]> {
    (!list.is_empty()).then_some(list)
}

impl<'a> From<&'a TransactionArgs> for TransactionArg<'a> {
    fn from(args: &'a TransactionArgs) -> Self {
        Self {
            package_specs: &args.package_specs,
            exclude_specs: non_empty(&args.exclude_specs),
            module_enable_specs: non_empty(&args.module_enable_specs),
            repo_ids: &args.repo_ids,
            install_weak_deps: args.install_weak_deps,
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchSpec<'a> {
    latest: bool,
    /// `null` unless searching
    packages: Option<&'a [String]>,
}

/// Version 1 sends the same argument block for every command
#[derive(Debug, Serialize)]
struct Arguments<'a> {
    repos: Vec<WireRepo>,
    search: SearchSpec<'a>,
    transactions: Option<Vec<TransactionArg<'a>>>,
    root_dir: String,
    #[serde(
        rename = "optional-metadata",
        skip_serializing_if = "Option::is_none"
    )]
    optional_metadata: Option<[&'static str; 1]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sbom: Option<SbomRequest>,
}

impl<'a> Arguments<'a> {
    fn new(cfg: &SolverConfig, repos: &[RepoConfig]) -> Self {
        Self {
            repos: repos.iter().map(WireRepo::from).collect(),
            search: SearchSpec {
                latest: false,
                packages: None,
            },
            transactions: None,
            root_dir: cfg.root_dir_str(),
            optional_metadata: None,
            sbom: None,
        }
    }
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
    path: String,
    remote_location: String,
    checksum: String,
}

impl WirePackage {
    fn into_package(self, repos: &HashMap<String, RepoConfig>) -> Result<Package> {
        let repo = lookup_repo(repos, &self.name, &self.repo_id)?;
        let checksum = if self.checksum.is_empty() {
            None
        } else {
            Some(self.checksum.parse()?)
        };
        let mut pkg = Package {
            name: self.name,
            epoch: self.epoch,
            version: self.version,
            release: self.release,
            arch: self.arch,
            repo_id: self.repo_id,
            location: self.path,
            remote_locations: if self.remote_location.is_empty() {
                Vec::new()
            } else {
                vec![self.remote_location]
            },
            checksum,
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
    packages: Option<Vec<WirePackage>>,
    repos: Option<HashMap<String, WireRepo>>,
    modules: Option<HashMap<String, WireModule>>,
    sbom: Option<Box<RawValue>>,
}

/// Package entry of a dump or search answer
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListedPackage {
    name: String,
    summary: String,
    description: String,
    url: String,
    repo_id: String,
    epoch: u32,
    version: String,
    release: String,
    arch: String,
    #[serde(deserialize_with = "build_time")]
    buildtime: Option<DateTime<Utc>>,
    license: String,
}

impl From<ListedPackage> for Package {
    fn from(p: ListedPackage) -> Self {
        Package {
            name: p.name,
            summary: p.summary,
            description: p.description,
            url: p.url,
            repo_id: p.repo_id,
            epoch: p.epoch,
            version: p.version,
            release: p.release,
            arch: p.arch,
            build_time: p.buildtime,
            license: p.license,
            ..Default::default()
        }
    }
}

/// Accept RFC 3339 or a naive `YYYY-MM-DDTHH:MM:SS` timestamp taken as UTC
fn build_time<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|e| serde::de::Error::custom(format!("invalid build time {:?}: {}", raw, e)))
}

impl ProtocolHandler for V1Handler {
    fn version(&self) -> u32 {
        1
    }

    fn depsolve_request(
        &self,
        cfg: &SolverConfig,
        plan: &ChainPlan,
        sbom: Option<SbomType>,
    ) -> Result<Request> {
        let mut args = Arguments::new(cfg, &plan.repos);
        args.transactions = Some(plan.transactions.iter().map(TransactionArg::from).collect());
        args.optional_metadata = Some(["filelists"]);
        args.sbom = sbom.map(SbomRequest::from);

        let proxy = cfg.proxy.as_deref().unwrap_or("");
        let envelope = Envelope::new(None, HelperCommand::Depsolve, cfg, Some(proxy), args);
        Request::encode(HelperCommand::Depsolve, &envelope)
    }

    fn dump_request(&self, cfg: &SolverConfig, repos: &[RepoConfig]) -> Result<Request> {
        let args = Arguments::new(cfg, repos);
        let proxy = cfg.proxy.as_deref().unwrap_or("");
        let envelope = Envelope::new(None, HelperCommand::Dump, cfg, Some(proxy), args);
        Request::encode(HelperCommand::Dump, &envelope)
    }

    fn search_request(
        &self,
        cfg: &SolverConfig,
        repos: &[RepoConfig],
        packages: &[String],
    ) -> Result<Request> {
        let mut args = Arguments::new(cfg, repos);
        args.search.packages = Some(packages);
        let proxy = cfg.proxy.as_deref().unwrap_or("");
        let envelope = Envelope::new(None, HelperCommand::Search, cfg, Some(proxy), args);
        Request::encode(HelperCommand::Search, &envelope)
    }

    fn parse_depsolve(&self, output: &[u8]) -> Result<ParsedDepsolve> {
        let response: DepsolveResponse = decode("depsolve", output)?;
        let (repos, repo_map) = sorted_repos(
            response
                .repos
                .unwrap_or_default()
                .into_iter()
                .map(|(id, repo)| (id, repo.into()))
                .collect(),
        );

        let packages = response
            .packages
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.into_package(&repo_map))
            .collect::<Result<Vec<_>>>()?;

        // Version 1 has no transaction layout; everything is one transaction
        let transactions = if packages.is_empty() {
            Vec::new()
        } else {
            vec![packages]
        };

        Ok(ParsedDepsolve {
            solver: response.solver,
            transactions,
            repos,
            modules: modules_from_wire(response.modules),
            sbom: response.sbom,
        })
    }

    fn parse_dump(&self, output: &[u8]) -> Result<ParsedPackages> {
        parse_listing("dump", output)
    }

    fn parse_search(&self, output: &[u8]) -> Result<ParsedPackages> {
        parse_listing("search", output)
    }
}

fn parse_listing(what: &str, output: &[u8]) -> Result<ParsedPackages> {
    let listed: Vec<ListedPackage> = decode(what, output)?;
    if listed.iter().any(|p| p.name.is_empty()) {
        return Err(Error::InternalError(format!(
            "{} result contains a package without a name",
            what
        )));
    }
    Ok(ParsedPackages {
        solver: String::new(),
        packages: listed.into_iter().map(Package::from).collect(),
        repos: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depsolve::chain::{plan_chain, wire_repo};
    use crate::repository::{Checksum, PackageSet};
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn cfg(root_dir: Option<&str>) -> SolverConfig {
        SolverConfig {
            module_platform_id: "platform:el8".into(),
            release_ver: "8".into(),
            arch: "x86_64".into(),
            cache_dir: "/cache".into(),
            root_dir: root_dir.map(Into::into),
            proxy: None,
        }
    }

    fn repo(name: &str) -> RepoConfig {
        RepoConfig::with_base_url(name, format!("https://example.org/{}", name))
    }

    fn to_value(req: &Request) -> Value {
        serde_json::from_slice(req.as_bytes()).unwrap()
    }

    #[test]
    fn test_depsolve_request_two_transactions() {
        let (baseos, appstream, user) = (repo("baseos"), repo("appstream"), repo("user-repo"));
        let chain = vec![
            PackageSet {
                include: vec!["pkg1".into()],
                exclude: vec!["pkg2".into()],
                repositories: vec![baseos.clone(), appstream.clone()],
                install_weak_deps: true,
                ..Default::default()
            },
            PackageSet::new(["pkg3"]).with_repositories(vec![
                baseos.clone(),
                appstream.clone(),
                user.clone(),
            ]),
        ];
        let plan = plan_chain(&chain, true).unwrap();
        let req = V1Handler::new()
            .depsolve_request(&cfg(Some("/root")), &plan, None)
            .unwrap();

        assert_eq!(
            to_value(&req),
            json!({
                "command": "depsolve",
                "module_platform_id": "platform:el8",
                "releasever": "8",
                "arch": "x86_64",
                "cachedir": "/cache",
                "proxy": "",
                "arguments": {
                    "repos": [
                        {"id": baseos.hash(), "name": "baseos", "baseurl": ["https://example.org/baseos"], "gpgcheck": false, "repo_gpgcheck": false},
                        {"id": appstream.hash(), "name": "appstream", "baseurl": ["https://example.org/appstream"], "gpgcheck": false, "repo_gpgcheck": false},
                        {"id": user.hash(), "name": "user-repo", "baseurl": ["https://example.org/user-repo"], "gpgcheck": false, "repo_gpgcheck": false}
                    ],
                    "search": {"latest": false, "packages": null},
                    "transactions": [
                        {"package-specs": ["pkg1"], "exclude-specs": ["pkg2"], "repo-ids": [baseos.hash(), appstream.hash()], "install_weak_deps": true},
                        {"package-specs": ["pkg3"], "exclude-specs": null, "repo-ids": [baseos.hash(), appstream.hash(), user.hash()], "install_weak_deps": false}
                    ],
                    "root_dir": "/root",
                    "optional-metadata": ["filelists"]
                }
            })
        );
    }

    #[test]
    fn test_mtls_repo_fields() {
        let mtls = RepoConfig {
            ssl_ca_cert: "/cacert".into(),
            ssl_client_cert: "/cert".into(),
            ssl_client_key: "/key".into(),
            ..repo("mtls")
        };
        let req = V1Handler::new()
            .dump_request(&cfg(None), &[wire_repo(&mtls)])
            .unwrap();
        assert_eq!(
            to_value(&req)["arguments"]["repos"][0],
            json!({"id": mtls.hash(), "name": "mtls", "baseurl": ["https://example.org/mtls"],
                   "gpgcheck": false, "repo_gpgcheck": false,
                   "sslcacert": "/cacert", "sslclientkey": "/key", "sslclientcert": "/cert"})
        );
    }

    #[test]
    fn test_dump_and_search_requests() {
        let baseos = repo("baseos");
        let repos = vec![wire_repo(&baseos)];

        let dump = to_value(&V1Handler::new().dump_request(&cfg(None), &repos).unwrap());
        assert_eq!(dump["command"], "dump");
        assert_eq!(dump["proxy"], "");
        assert!(dump.get("api_version").is_none());
        assert_eq!(dump["arguments"]["search"], json!({"latest": false, "packages": null}));
        assert_eq!(dump["arguments"]["transactions"], Value::Null);
        assert_eq!(dump["arguments"]["root_dir"], "");
        assert!(dump["arguments"].get("optional-metadata").is_none());

        let globs = vec!["vim".to_string()];
        let search = to_value(&V1Handler::new().search_request(&cfg(None), &repos, &globs).unwrap());
        assert_eq!(search["command"], "search");
        assert_eq!(search["arguments"]["search"], json!({"latest": false, "packages": ["vim"]}));
    }

    #[test]
    fn test_parse_depsolve() {
        let input = r#"{
            "solver": "dnf",
            "packages": [
                {"name": "tmux", "epoch": 0, "version": "3.3a", "release": "3.fc38", "arch": "x86_64",
                 "repo_id": "r1", "path": "Packages/tmux.rpm",
                 "remote_location": "https://example.org/r1/Packages/tmux.rpm",
                 "checksum": "sha256:1234567890"}
            ],
            "repos": {"r1": {"id": "r1", "name": "fedora", "baseurl": ["https://example.org/r1"],
                             "gpgcheck": true, "repo_gpgcheck": false, "rhsm": true}}
        }"#;
        let parsed = V1Handler::new().parse_depsolve(input.as_bytes()).unwrap();
        assert_eq!(parsed.solver, "dnf");
        assert_eq!(parsed.transactions.len(), 1);

        let pkg = &parsed.transactions[0][0];
        assert_eq!(pkg.location, "Packages/tmux.rpm");
        assert_eq!(
            pkg.remote_location(),
            Some("https://example.org/r1/Packages/tmux.rpm")
        );
        assert_eq!(pkg.checksum, Some(Checksum::new("sha256", "1234567890")));
        assert!(pkg.check_gpg);
        assert_eq!(pkg.secrets.as_deref(), Some("org.osbuild.rhsm.consumer"));
        assert_eq!(parsed.repos[0].check_repo_gpg, Some(false));
    }

    #[test]
    fn test_parse_depsolve_unknown_repo() {
        let input = r#"{"packages": [{"name": "tmux", "repo_id": "nope"}], "repos": {}}"#;
        let err = V1Handler::new().parse_depsolve(input.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("repo ID not found"));
    }

    #[test]
    fn test_parse_listing() {
        let input = r#"[
            {"name": "package0", "summary": "Package zero", "description": "First",
             "url": "https://example.org", "repo_id": "r1", "epoch": 0, "version": "1.0",
             "release": "0.fc30", "arch": "x86_64", "buildtime": "2006-01-02T15:04:05",
             "license": "MIT"},
            {"name": "package1", "epoch": 1, "version": "2.0", "release": "1", "arch": "noarch",
             "buildtime": "2006-01-02T15:04:05Z"}
        ]"#;
        let parsed = V1Handler::new().parse_dump(input.as_bytes()).unwrap();
        assert_eq!(parsed.packages.len(), 2);

        let expected = Utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).unwrap();
        assert_eq!(parsed.packages[0].build_time, Some(expected));
        assert_eq!(parsed.packages[1].build_time, Some(expected));
        assert_eq!(parsed.packages[0].license, "MIT");
        assert_eq!(parsed.packages[1].nevra(), "package1-1:2.0-1.noarch");

        assert!(V1Handler::new().parse_search(b"{}").is_err());
    }
}
