// src/repository/config.rs

//! Repository configuration and its content hash

use crate::error::{Error, Result};
use crate::hash::CanonicalHasher;
use serde::{Deserialize, Serialize};

/// Secrets tag for packages from repositories using client certificates
pub const SECRETS_MTLS: &str = "org.osbuild.mtls";

/// Secrets tag for packages from subscription-manager repositories
pub const SECRETS_RHSM: &str = "org.osbuild.rhsm.consumer";

/// Preamble of the canonical repository encoding
const HASH_PREAMBLE: &str = "osimage-repo-v1";

/// A package repository
///
/// Empty strings and empty lists mean "not set". Flags that must distinguish
/// "not set" from `false` on the wire are `Option<bool>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RepoConfigJson", into = "RepoConfigJson")]
pub struct RepoConfig {
    pub id: String,
    pub name: String,
    pub base_urls: Vec<String>,
    pub metalink: String,
    pub mirrorlist: String,
    pub gpg_keys: Vec<String>,
    pub check_gpg: Option<bool>,
    pub check_repo_gpg: Option<bool>,
    pub ignore_ssl: Option<bool>,
    pub ssl_ca_cert: String,
    pub ssl_client_key: String,
    pub ssl_client_cert: String,
    pub metadata_expire: String,
    pub module_hotfixes: Option<bool>,
    pub rhsm: bool,

    // Not part of the hash
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
    pub image_type_tags: Vec<String>,
    pub package_sets: Vec<String>,
}

impl RepoConfig {
    /// Repository with a single base URL
    pub fn with_base_url(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_urls: vec![url.into()],
            ..Default::default()
        }
    }

    /// Content hash over every field that influences depsolve output
    ///
    /// Always a 64-char lowercase hex string; the field order is fixed.
    pub fn hash(&self) -> String {
        let mut h = CanonicalHasher::new(HASH_PREAMBLE);
        h.str("name", &self.name)
            .list("baseurl", &self.base_urls)
            .str("metalink", &self.metalink)
            .str("mirrorlist", &self.mirrorlist)
            .list("gpgkey", &self.gpg_keys)
            .tristate("gpgcheck", self.check_gpg)
            .tristate("repo_gpgcheck", self.check_repo_gpg)
            .tristate("ignore_ssl", self.ignore_ssl)
            .str("sslcacert", &self.ssl_ca_cert)
            .str("sslclientcert", &self.ssl_client_cert)
            .str("sslclientkey", &self.ssl_client_key)
            .str("metadata_expire", &self.metadata_expire)
            .tristate("module_hotfixes", self.module_hotfixes)
            .bool("rhsm", self.rhsm);
        h.finish()
    }

    /// The configured ID, or the hash when none is set
    pub fn effective_id(&self) -> String {
        if self.id.is_empty() {
            self.hash()
        } else {
            self.id.clone()
        }
    }

    /// True when the repository authenticates with a client certificate
    pub fn uses_mtls(&self) -> bool {
        !self.ssl_client_key.is_empty() || !self.ssl_client_cert.is_empty()
    }

    /// Secrets tag inherited by packages from this repository
    pub fn secrets(&self) -> Option<&'static str> {
        if self.rhsm {
            Some(SECRETS_RHSM)
        } else if self.uses_mtls() {
            Some(SECRETS_MTLS)
        } else {
            None
        }
    }

    /// The first configured source, used to point users at the failing URL
    pub fn source_url(&self) -> Option<&str> {
        self.base_urls
            .first()
            .map(String::as_str)
            .or_else(|| (!self.metalink.is_empty()).then_some(self.metalink.as_str()))
            .or_else(|| (!self.mirrorlist.is_empty()).then_some(self.mirrorlist.as_str()))
    }

    /// Name for messages: the name, else the first source, else the hash
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        self.source_url()
            .map(str::to_string)
            .unwrap_or_else(|| self.hash())
    }

    /// Check that exactly one of base URLs, metalink or mirrorlist is set
    pub fn validate(&self) -> Result<()> {
        let mut sources = Vec::new();
        if !self.base_urls.is_empty() {
            sources.push(format!("baseurl {}", self.base_urls.join(",")));
        }
        if !self.metalink.is_empty() {
            sources.push(format!("metalink {}", self.metalink));
        }
        if !self.mirrorlist.is_empty() {
            sources.push(format!("mirrorlist {}", self.mirrorlist));
        }

        match sources.len() {
            1 => Ok(()),
            0 => Err(Error::RepoConfigError(format!(
                "repository {:?} has no baseurl, metalink or mirrorlist",
                self.display_name()
            ))),
            _ => Err(Error::RepoConfigError(format!(
                "repository {:?} must set exactly one source, got {}",
                self.display_name(),
                sources.join(" and ")
            ))),
        }
    }
}

/// Storage form of a repository, compatible with the legacy `baseurl` string
#[derive(Debug, Default, Serialize, Deserialize)]
struct RepoConfigJson {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    baseurls: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    metalink: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    mirrorlist: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    gpgkeys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    check_gpg: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    check_repo_gpg: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ignore_ssl: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    metadata_expire: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    module_hotfixes: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    rhsm: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    image_type_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    package_sets: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    sslcacert: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    sslclientkey: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    sslclientcert: String,
    /// Legacy comma-separated base URLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    baseurl: Option<String>,
}

impl From<RepoConfigJson> for RepoConfig {
    fn from(json: RepoConfigJson) -> Self {
        let base_urls = if json.baseurls.is_empty() {
            json.baseurl
                .as_deref()
                .map(|joined| {
                    joined
                        .split(',')
                        .map(str::trim)
                        .filter(|u| !u.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        } else {
            json.baseurls
        };

        Self {
            id: json.id,
            name: json.name,
            base_urls,
            metalink: json.metalink,
            mirrorlist: json.mirrorlist,
            gpg_keys: json.gpgkeys,
            check_gpg: json.check_gpg,
            check_repo_gpg: json.check_repo_gpg,
            ignore_ssl: json.ignore_ssl,
            ssl_ca_cert: json.sslcacert,
            ssl_client_key: json.sslclientkey,
            ssl_client_cert: json.sslclientcert,
            metadata_expire: json.metadata_expire,
            module_hotfixes: json.module_hotfixes,
            rhsm: json.rhsm,
            priority: json.priority,
            enabled: json.enabled,
            image_type_tags: json.image_type_tags,
            package_sets: json.package_sets,
        }
    }
}

impl From<RepoConfig> for RepoConfigJson {
    fn from(repo: RepoConfig) -> Self {
        let baseurl = (!repo.base_urls.is_empty()).then(|| repo.base_urls.join(","));
        Self {
            id: repo.id,
            name: repo.name,
            baseurls: repo.base_urls,
            metalink: repo.metalink,
            mirrorlist: repo.mirrorlist,
            gpgkeys: repo.gpg_keys,
            check_gpg: repo.check_gpg,
            check_repo_gpg: repo.check_repo_gpg,
            priority: repo.priority,
            ignore_ssl: repo.ignore_ssl,
            metadata_expire: repo.metadata_expire,
            module_hotfixes: repo.module_hotfixes,
            rhsm: repo.rhsm,
            enabled: repo.enabled,
            image_type_tags: repo.image_type_tags,
            package_sets: repo.package_sets,
            sslcacert: repo.ssl_ca_cert,
            sslclientkey: repo.ssl_client_key,
            sslclientcert: repo.ssl_client_cert,
            baseurl,
        }
    }
}
