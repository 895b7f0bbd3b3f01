// src/repository/mod.rs

//! Package repositories and the packages resolved from them
//!
//! This module provides:
//! - `RepoConfig`, a repository description with a stable content hash
//! - `PackageSet`, the include/exclude input of one depsolve transaction
//! - `Package` and `PackageList`, the packages reported by the helper

mod config;
mod package;
mod package_set;

pub use config::{RepoConfig, SECRETS_MTLS, SECRETS_RHSM};
pub use package::{dedup_by_nevra, sort_by_nevra, Checksum, Package, PackageList, RelDep};
pub use package_set::PackageSet;
