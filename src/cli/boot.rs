// src/cli/boot.rs
//! Boot tool commands: set up a VM from a fresh image, tear it down again

use super::aws::AwsArgs;
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum BootCommands {
    /// Boot on EC2
    #[command(subcommand)]
    Aws(BootAwsCommands),

    /// Boot on Azure
    #[command(subcommand)]
    Azure(BootAzureCommands),
}

#[derive(Subcommand)]
pub enum BootAwsCommands {
    /// Upload and register an image, then start an instance from it
    Setup {
        #[command(flatten)]
        aws: AwsArgs,

        /// Where to record the created resources
        #[arg(short = 'r', long = "resourcefile", default_value = "resources.json")]
        resource_file: PathBuf,

        /// AMI name
        #[arg(long, default_value = "image-name")]
        image_name: String,

        /// Target architecture (default: host)
        #[arg(long)]
        arch: Option<String>,

        /// legacy, uefi or hybrid
        #[arg(long)]
        boot_mode: Option<String>,

        /// User created by cloud-init (default: from config, else "aws")
        #[arg(long)]
        username: Option<String>,

        /// Public key installed for the user
        #[arg(long, value_name = "PATH")]
        ssh_pubkey: Option<PathBuf>,

        /// Instance type (default: from config)
        #[arg(long)]
        instance_type: Option<String>,

        /// Disk image to upload
        image: PathBuf,
    },

    /// Delete everything recorded by a previous setup
    Teardown {
        #[command(flatten)]
        aws: AwsArgs,

        /// Resource record written by setup
        #[arg(short = 'r', long = "resourcefile", default_value = "resources.json")]
        resource_file: PathBuf,
    },
}

/// Azure login, target and VM options
#[derive(Args, Debug, Clone)]
pub struct AzureBootArgs {
    /// Service principal client ID
    #[arg(long, env = "AZURE_CLIENT_ID", hide_env_values = true)]
    pub client_id: Option<String>,

    /// Service principal secret
    #[arg(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    #[arg(long, env = "AZURE_TENANT_ID")]
    pub tenant: Option<String>,

    #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
    pub subscription: Option<String>,

    /// Resource group holding every created resource (default: from config)
    #[arg(long)]
    pub resource_group: Option<String>,

    /// Admin user of the VM (default: from config, else "azure")
    #[arg(long)]
    pub username: Option<String>,

    /// Public key installed for the admin user
    #[arg(long, value_name = "PATH")]
    pub ssh_pubkey: Option<PathBuf>,

    /// Private key used to reach the VM
    #[arg(long, value_name = "PATH")]
    pub ssh_privkey: Option<PathBuf>,

    /// Boot an already registered image instead of uploading one
    #[arg(long, value_name = "ID")]
    pub image: Option<String>,

    #[arg(long, default_value = "vm-name")]
    pub vm_name: String,

    /// Name of the uploaded blob and registered image
    #[arg(long, default_value = "image-name")]
    pub image_name: String,

    /// VM size (default: per architecture)
    #[arg(long)]
    pub size: Option<String>,

    /// Image architecture (default: host)
    #[arg(long)]
    pub arch: Option<String>,

    /// Resource record written by setup and read by teardown
    #[arg(short = 'r', long = "resourcefile", default_value = "resources.json")]
    pub resource_file: PathBuf,
}

#[derive(Subcommand)]
pub enum BootAzureCommands {
    /// Upload an image if given, register it and start a VM
    Setup {
        #[command(flatten)]
        args: AzureBootArgs,

        /// Local VHD to upload
        #[arg(value_name = "IMAGE")]
        local_image: Option<PathBuf>,
    },

    /// Delete everything recorded by a previous setup
    Teardown {
        #[command(flatten)]
        args: AzureBootArgs,
    },

    /// Set up, run a command on the VM with local files copied over, tear down
    Run {
        #[command(flatten)]
        args: AzureBootArgs,

        /// Local VHD to upload
        #[arg(value_name = "IMAGE")]
        local_image: PathBuf,

        /// Executable and its arguments; local files among them are copied
        /// to the VM and passed by base name
        #[arg(
            value_name = "ARG",
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        command: Vec<String>,
    },
}
