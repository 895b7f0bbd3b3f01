// src/commands/aws.rs
//! AWS check and upload commands

use super::interrupt_token;
use crate::cli::{AwsArgs, AwsCredentialArgs};
use anyhow::{Context, Result};
use osimage::check::{render_report, CheckResult};
use osimage::cloud::aws::cli::{AwsCli, AwsCredentials};
use osimage::cloud::aws::{Aws, AwsUploader, BootMode, ImageReader, UploaderOptions};
use osimage::config::AwsSection;
use osimage::Arch;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Region and bucket after applying configuration defaults
pub(crate) struct AwsTarget {
    pub region: String,
    pub bucket: Option<String>,
}

impl AwsTarget {
    pub(crate) fn resolve(args: &AwsArgs, config: &AwsSection) -> Result<Self> {
        let region = args
            .region
            .clone()
            .or_else(|| config.region.clone())
            .context("No AWS region given (use --region or set aws.region)")?;
        Ok(Self {
            region,
            bucket: args.bucket.clone().or_else(|| config.bucket.clone()),
        })
    }

    pub(crate) fn bucket(&self) -> Result<&str> {
        self.bucket
            .as_deref()
            .context("No S3 bucket given (use --bucket or set aws.bucket)")
    }
}

fn credentials(args: &AwsCredentialArgs) -> Option<AwsCredentials> {
    match (&args.access_key_id, &args.secret_access_key) {
        (Some(id), Some(secret)) => Some(AwsCredentials {
            access_key_id: id.clone(),
            secret_access_key: secret.clone(),
            session_token: args.session_token.clone(),
        }),
        _ => None,
    }
}

/// An `Aws` client driving the `aws` CLI, cancelled on Ctrl-C
pub(crate) fn aws_client(args: &AwsArgs, region: &str, config: &AwsSection) -> Result<Aws> {
    let mut cli = AwsCli::new(region)?;
    if let Some(creds) = credentials(&args.credentials) {
        cli = cli.with_credentials(creds);
    }
    if let Some(endpoint) = &args.credentials.endpoint_url {
        cli = cli.with_endpoint(endpoint.as_str());
    }

    Ok(Aws::from_provider(Arc::new(cli))
        .with_cancellation(interrupt_token())
        .with_poll_interval(Duration::from_secs(config.poll_interval_secs)))
}

/// Open a disk image for streaming upload
pub(crate) async fn open_image(path: &Path) -> Result<ImageReader> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open image {}", path.display()))?;
    Ok(Box::new(file))
}

/// Run the upload precondition checks as a report
///
/// Returns `false` if any check failed.
pub async fn cmd_aws_check(args: &AwsArgs, config: &AwsSection) -> Result<bool> {
    let target = AwsTarget::resolve(args, config)?;
    let bucket = target.bucket()?;
    info!("Checking AWS upload conditions for {} in {}", bucket, target.region);

    let aws = aws_client(args, &target.region, config)?;
    let uploader = AwsUploader::new(
        Arc::new(aws),
        &target.region,
        bucket,
        "",
        UploaderOptions::default(),
    );

    let (region, bucket, permissions) = futures::join!(
        uploader.check_region(),
        uploader.check_bucket(),
        uploader.check_bucket_permissions()
    );
    let mut results = vec![
        CheckResult::new("region", region),
        CheckResult::new("bucket", bucket),
        CheckResult::new("bucket-permissions", permissions),
    ];
    Ok(render_report(&mut results, &mut std::io::stdout())?)
}

/// Upload an image and register it as an AMI
pub async fn cmd_aws_upload(
    args: &AwsArgs,
    name: &str,
    arch: Option<&str>,
    boot_mode: Option<&str>,
    share_with: &[String],
    image: &Path,
    config: &AwsSection,
) -> Result<()> {
    let target = AwsTarget::resolve(args, config)?;
    let bucket = target.bucket()?;

    let boot_mode = match boot_mode {
        Some(mode) => Some(mode.parse::<BootMode>()?),
        None => config.boot_mode()?,
    };
    let share_with = if share_with.is_empty() {
        config.share_with.clone()
    } else {
        share_with.to_vec()
    };
    let options = UploaderOptions {
        target_arch: arch.map(str::parse::<Arch>).transpose()?,
        boot_mode,
        share_with,
    };

    let aws = aws_client(args, &target.region, config)?;
    let mut uploader = AwsUploader::new(Arc::new(aws), &target.region, bucket, name, options);

    let mut status = std::io::stdout();
    uploader.check(&mut status).await?;
    uploader
        .upload_and_register(open_image(image).await?, &mut status)
        .await?;

    let (ami, region) = uploader.result()?;
    println!("{} {}", ami, region);
    Ok(())
}
