// src/cli/aws.rs
//! AWS upload commands

use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Credentials for the `aws` CLI; unset values fall back to its own lookup
#[derive(Args, Debug, Clone, Default)]
pub struct AwsCredentialArgs {
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub session_token: Option<String>,

    /// Alternative service endpoint, e.g. a local S3 emulator
    #[arg(long, value_name = "URL")]
    pub endpoint_url: Option<String>,
}

/// Target region and bucket
#[derive(Args, Debug, Clone)]
pub struct AwsArgs {
    /// AWS region (default: from config)
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// S3 bucket for the intermediate upload (default: from config)
    #[arg(long)]
    pub bucket: Option<String>,

    #[command(flatten)]
    pub credentials: AwsCredentialArgs,
}

#[derive(Subcommand)]
pub enum AwsCommands {
    /// Check region access, bucket existence and bucket write permission
    Check {
        #[command(flatten)]
        aws: AwsArgs,
    },

    /// Upload a raw disk image and register it as an AMI
    Upload {
        #[command(flatten)]
        aws: AwsArgs,

        /// AMI name
        #[arg(long)]
        name: String,

        /// Target architecture (default: host)
        #[arg(long)]
        arch: Option<String>,

        /// legacy, uefi or hybrid (default: from config, else instance default)
        #[arg(long)]
        boot_mode: Option<String>,

        /// Account IDs allowed to launch the image; repeatable
        #[arg(long = "share-with", value_name = "ACCOUNT")]
        share_with: Vec<String>,

        /// Disk image to upload
        image: PathBuf,
    },
}
