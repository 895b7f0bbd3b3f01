// src/commands/boot.rs
//! Boot tool: set up a VM from a fresh image and tear it down again
//!
//! Setup always writes the resource record, even when it fails, so a later
//! teardown can clean up whatever was left behind.

use super::aws::{aws_client, open_image, AwsTarget};
use super::interrupt_token;
use crate::cli::{AwsArgs, AzureBootArgs};
use anyhow::{Context, Result};
use osimage::cloud::aws::boot::{self as aws_boot, AwsResources, BootOptions};
use osimage::cloud::aws::BootMode;
use osimage::cloud::azure::boot::{
    AzureBoot, ResourceRecord, SetupOptions, SshOptions, DEFAULT_USERNAME,
};
use osimage::cloud::azure::cli::{AzCli, AzCredentials};
use osimage::cloud::azure::AzureClient;
use osimage::cloud::save_json;
use osimage::config::{expand_home, Config};
use osimage::Arch;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// cloud-init user created on EC2 when none is configured
const DEFAULT_AWS_USERNAME: &str = "aws";

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read resource file {}", path.display()))?;
    serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse resource file {}", path.display()))
}

fn write_record<T: Serialize>(record: &T, path: &Path) -> Result<()> {
    save_json(record, path)
        .with_context(|| format!("Failed to write resource file {}", path.display()))
}

/// Read the public key at `flag`, or at the configured path
fn read_public_key(flag: Option<&PathBuf>, config: &Config) -> Result<String> {
    let path = flag
        .or(config.boot.ssh_public_key.as_ref())
        .context("No SSH public key given (use --ssh-pubkey or set boot.ssh_public_key)")?;
    let path = expand_home(path);
    std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read SSH public key {}", path.display()))
}

fn parse_arch(arch: Option<&str>) -> Result<Arch> {
    Ok(match arch {
        Some(arch) => arch.parse()?,
        None => Arch::host()?,
    })
}

/// Upload, register and boot an image on EC2
#[allow(clippy::too_many_arguments)]
pub async fn cmd_boot_aws_setup(
    args: &AwsArgs,
    resource_file: &Path,
    image_name: &str,
    arch: Option<&str>,
    boot_mode: Option<&str>,
    username: Option<&str>,
    ssh_pubkey: Option<&PathBuf>,
    instance_type: Option<&str>,
    image: &Path,
    config: &Config,
) -> Result<()> {
    let target = AwsTarget::resolve(args, &config.aws)?;
    let opts = BootOptions {
        bucket: target.bucket()?.to_string(),
        image_name: image_name.to_string(),
        arch: arch.map(str::parse::<Arch>).transpose()?,
        boot_mode: match boot_mode {
            Some(mode) => Some(mode.parse::<BootMode>()?),
            None => config.aws.boot_mode()?,
        },
        share_with: config.aws.share_with.clone(),
        username: username
            .or(config.boot.username.as_deref())
            .unwrap_or(DEFAULT_AWS_USERNAME)
            .to_string(),
        ssh_public_key: read_public_key(ssh_pubkey, config)?,
        instance_type: instance_type
            .unwrap_or(config.aws.instance_type.as_str())
            .to_string(),
    };

    let aws = aws_client(args, &target.region, &config.aws)?;
    let reader = open_image(image).await?;
    let mut res = AwsResources::default();
    let result = aws_boot::setup(&aws, reader, &opts, &mut res, &mut std::io::stdout()).await;

    write_record(&res, resource_file)?;
    match result {
        Ok(ip) => {
            info!("Resources recorded in {}", resource_file.display());
            println!("{}", ip);
            Ok(())
        }
        Err(e) => {
            if !res.is_empty() {
                warn!(
                    "Setup failed; run teardown with {} to remove what was created",
                    resource_file.display()
                );
            }
            Err(e.into())
        }
    }
}

/// Delete the EC2 resources listed in `resource_file`
pub async fn cmd_boot_aws_teardown(
    args: &AwsArgs,
    resource_file: &Path,
    config: &Config,
) -> Result<()> {
    let target = AwsTarget::resolve(args, &config.aws)?;
    let res: AwsResources = read_record(resource_file)?;
    let aws = aws_client(args, &target.region, &config.aws)?;
    aws_boot::teardown(&aws, &res, &mut std::io::stdout()).await?;
    Ok(())
}

/// Log in with the service principal and bind the pipeline to one group
async fn azure_boot(args: &AzureBootArgs, config: &Config) -> Result<AzureBoot> {
    let subscription = args
        .subscription
        .clone()
        .or_else(|| config.azure.subscription.clone())
        .context("No Azure subscription given (use --subscription or set azure.subscription)")?;
    let credentials = AzCredentials {
        client_id: args
            .client_id
            .clone()
            .context("No Azure client ID given (use --client-id or AZURE_CLIENT_ID)")?,
        client_secret: args
            .client_secret
            .clone()
            .context("No Azure client secret given (use --client-secret or AZURE_CLIENT_SECRET)")?,
        tenant: args
            .tenant
            .clone()
            .or_else(|| config.azure.tenant.clone())
            .context("No Azure tenant given (use --tenant or set azure.tenant)")?,
    };
    let resource_group = args
        .resource_group
        .clone()
        .or_else(|| config.azure.resource_group.clone())
        .context("No resource group given (use --resource-group or set azure.resource_group)")?;

    info!("Logging in to Azure subscription {}", subscription);
    let az = Arc::new(AzCli::login(&credentials, &subscription).await?);
    let client = Arc::new(AzureClient::from_provider(subscription.as_str(), az));

    Ok(AzureBoot::new(client, subscription, resource_group)
        .with_cancellation(interrupt_token())
        .with_container(config.azure.container.as_str())
        .with_concurrency(config.azure.upload_concurrency))
}

fn username(args: &AzureBootArgs, config: &Config) -> String {
    args.username
        .as_deref()
        .or(config.boot.username.as_deref())
        .unwrap_or(DEFAULT_USERNAME)
        .to_string()
}

fn setup_options(
    args: &AzureBootArgs,
    local_image: Option<&Path>,
    config: &Config,
) -> Result<SetupOptions> {
    Ok(SetupOptions {
        local_image: local_image.map(Path::to_path_buf),
        image: args.image.clone(),
        image_name: args.image_name.clone(),
        vm_name: args.vm_name.clone(),
        size: args.size.clone().or_else(|| config.boot.vm_size.clone()),
        arch: parse_arch(args.arch.as_deref())?,
        username: username(args, config),
        ssh_public_key: read_public_key(args.ssh_pubkey.as_ref(), config)?,
    })
}

/// Upload and register an image if given, then start a VM from it
pub async fn cmd_boot_azure_setup(
    args: &AzureBootArgs,
    local_image: Option<&Path>,
    config: &Config,
) -> Result<()> {
    let opts = setup_options(args, local_image, config)?;
    let boot = azure_boot(args, config).await?;

    let mut res = ResourceRecord::default();
    let result = boot.setup(&opts, &mut res).await;

    // A failed rollback leaves resources behind; record them for teardown
    if result.is_ok() || !res.is_empty() {
        res.save(&args.resource_file)?;
        info!("Resources recorded in {}", args.resource_file.display());
    }
    result?;

    if let Some(vm) = &res.vm {
        println!("{}", vm.ip_address);
    }
    Ok(())
}

/// Delete the Azure resources listed in the resource file
pub async fn cmd_boot_azure_teardown(args: &AzureBootArgs, config: &Config) -> Result<()> {
    let res = ResourceRecord::load(&args.resource_file)?;
    if res.is_empty() {
        println!("Nothing to tear down");
        return Ok(());
    }
    let boot = azure_boot(args, config).await?;
    boot.teardown(&res).await?;
    println!("Teardown complete");
    Ok(())
}

/// Set up a VM, run `command` on it, and tear everything down
///
/// Local files named in `command` are copied to the VM first.
pub async fn cmd_boot_azure_run(
    args: &AzureBootArgs,
    local_image: &Path,
    command: &[String],
    config: &Config,
) -> Result<()> {
    let opts = setup_options(args, Some(local_image), config)?;
    let private_key = args
        .ssh_privkey
        .as_ref()
        .or(config.boot.ssh_private_key.as_ref())
        .context("No SSH private key given (use --ssh-privkey or set boot.ssh_private_key)")?;
    let ssh = SshOptions {
        username: username(args, config),
        private_key: expand_home(private_key),
    };

    let boot = azure_boot(args, config).await?;
    boot.run(&opts, &ssh, command, &mut std::io::stdout()).await?;
    Ok(())
}
