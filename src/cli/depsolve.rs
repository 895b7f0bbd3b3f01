// src/cli/depsolve.rs
//! Depsolve helper options shared by depsolve, dump and search

use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct SolverArgs {
    /// Module platform ID, e.g. platform:f40
    #[arg(long, value_name = "ID")]
    pub platform_id: String,

    /// Release version substituted for $releasever
    #[arg(long, value_name = "VERSION")]
    pub releasever: String,

    /// Target architecture (default: host)
    #[arg(long)]
    pub arch: Option<String>,

    /// Metadata cache directory (default: from config)
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Helper command; repeat for leading arguments
    #[arg(long, value_name = "ARG")]
    pub helper: Vec<String>,

    /// Helper API version: auto, 1 or 2
    #[arg(long, value_name = "VERSION")]
    pub api_version: Option<String>,

    /// Proxy for repository access
    #[arg(long, env = "OSIMAGE_PROXY")]
    pub proxy: Option<String>,

    /// Use this root's repositories for package sets without any
    #[arg(long, value_name = "PATH")]
    pub root_dir: Option<PathBuf>,
}
