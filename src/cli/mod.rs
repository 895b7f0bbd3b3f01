// src/cli/mod.rs
//! CLI definitions for osimage
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! - `depsolve` / `dump` / `search` - drive the DNF depsolve helper
//! - `aws` - check upload preconditions, upload and register an AMI
//! - `boot` - boot a fresh image on AWS or Azure and tear it down again
//! - `completions` - shell completion scripts

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

mod aws;
mod boot;
mod depsolve;

pub use aws::{AwsArgs, AwsCommands, AwsCredentialArgs};
pub use boot::{AzureBootArgs, BootAwsCommands, BootAzureCommands, BootCommands};
pub use depsolve::SolverArgs;

#[derive(Parser)]
#[command(name = "osimage")]
#[command(author = "osimage Contributors")]
#[command(version)]
#[command(about = "Depsolve package sets and ship OS images to the cloud", long_about = None)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: ~/.config/osimage/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Depsolve a chain of package sets
    ///
    /// The input is a JSON array of package sets, each with `include`,
    /// `exclude`, `enabled_modules`, `repositories` and `install_weak_deps`.
    Depsolve {
        #[command(flatten)]
        solver: SolverArgs,

        /// JSON file with the package set chain
        chain: PathBuf,

        /// Also produce an SBOM of this type (spdx)
        #[arg(long, value_name = "TYPE")]
        sbom: Option<String>,

        /// Write the result here instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// List every package available in a set of repositories
    Dump {
        #[command(flatten)]
        solver: SolverArgs,

        /// JSON file with an array of repositories
        #[arg(long, value_name = "PATH")]
        repos: PathBuf,

        /// Write the result here instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Search repositories for packages by name glob
    Search {
        #[command(flatten)]
        solver: SolverArgs,

        /// JSON file with an array of repositories
        #[arg(long, value_name = "PATH")]
        repos: PathBuf,

        /// Package name globs
        #[arg(required = true)]
        globs: Vec<String>,

        /// Write the result here instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// AWS image uploads
    #[command(subcommand)]
    Aws(AwsCommands),

    /// Boot a freshly built image on a cloud and tear it down again
    #[command(subcommand)]
    Boot(BootCommands),

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
