// src/repository/package_set.rs

//! Package sets: the input to one transaction of a depsolve chain

use super::RepoConfig;
use serde::{Deserialize, Serialize};

/// Packages to include and exclude, resolved against a list of repositories
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageSet {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub enabled_modules: Vec<String>,
    pub repositories: Vec<RepoConfig>,
    pub install_weak_deps: bool,
}

impl PackageSet {
    pub fn new<S: Into<String>>(include: impl IntoIterator<Item = S>) -> Self {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_repositories(mut self, repositories: Vec<RepoConfig>) -> Self {
        self.repositories = repositories;
        self
    }

    pub fn with_exclude<S: Into<String>>(mut self, exclude: impl IntoIterator<Item = S>) -> Self {
        self.exclude = exclude.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_weak_deps(mut self, install_weak_deps: bool) -> Self {
        self.install_weak_deps = install_weak_deps;
        self
    }

    /// Concatenate include, exclude and enabled modules of `other`
    ///
    /// Repositories and the weak-deps flag are kept from `self`.
    pub fn append(mut self, other: &PackageSet) -> Self {
        self.include.extend(other.include.iter().cloned());
        self.exclude.extend(other.exclude.iter().cloned());
        self.enabled_modules
            .extend(other.enabled_modules.iter().cloned());
        self
    }
}
