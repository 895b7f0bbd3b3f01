// src/lib.rs

//! osimage: building blocks for OS image pipelines
//!
//! - Depsolving package-set chains through an external DNF helper
//!   (`osbuild-depsolve-dnf`), speaking helper API v1 or v2
//! - Content-addressed repository identity and chain validation
//! - Uploading and registering disk images on AWS and Azure, plus a boot
//!   tool that starts a VM from a fresh image and tears it down again
//!
//! # Architecture
//!
//! - External tools (the depsolve helper, `aws`, `az`, `ssh`) run through
//!   one async subprocess [`runner`]
//! - Cloud pipelines depend only on capability traits; the CLI adapters in
//!   [`cloud::aws::cli`] and [`cloud::azure::cli`] are one implementation
//! - Errors classify into skip, warn, fail, timeout and internal kinds

pub mod arch;
pub mod check;
pub mod cloud;
pub mod config;
pub mod depsolve;
mod error;
pub mod hash;
pub mod repository;
pub mod runner;

pub use arch::Arch;
pub use config::Config;
pub use depsolve::{ApiVersion, DepsolveResult, PackageListing, SbomType, Solver};
pub use error::{Error, ErrorKind, JoinedErrors, Result, ResultExt};
pub use repository::{Package, PackageList, PackageSet, RepoConfig};
