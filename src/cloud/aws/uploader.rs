// src/cloud/aws/uploader.rs

//! Check, upload and register one disk image as an AMI
//!
//! ```text
//! check:  region enabled -> bucket listed -> bucket writable
//! upload: S3 put -> import snapshot -> register AMI -> delete S3 object
//! ```
//!
//! Any failure between the S3 upload and a successful registration deletes
//! the uploaded object; a failing delete is joined to the original error.
//! Once the AMI is registered it is never rolled back.

use super::{Aws, BootMode, ImageReader, S3Permission, UploadOutput};
use crate::arch::Arch;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// The operations the uploader needs from AWS
#[async_trait]
pub trait UploaderClient: Send + Sync {
    async fn regions(&self) -> Result<Vec<String>>;

    async fn buckets(&self) -> Result<Vec<String>>;

    async fn check_bucket_permission(&self, bucket: &str, permission: S3Permission)
        -> Result<bool>;

    async fn upload_from_reader(
        &self,
        reader: ImageReader,
        bucket: &str,
        key: &str,
    ) -> Result<UploadOutput>;

    /// Returns `(image_id, snapshot_id)`
    #[allow(clippy::too_many_arguments)]
    async fn register(
        &self,
        name: &str,
        bucket: &str,
        key: &str,
        share_with: &[String],
        arch: Arch,
        boot_mode: Option<BootMode>,
        import_role: Option<&str>,
    ) -> Result<(String, String)>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

#[async_trait]
impl UploaderClient for Aws {
    async fn regions(&self) -> Result<Vec<String>> {
        Aws::regions(self).await
    }

    async fn buckets(&self) -> Result<Vec<String>> {
        Aws::buckets(self).await
    }

    async fn check_bucket_permission(
        &self,
        bucket: &str,
        permission: S3Permission,
    ) -> Result<bool> {
        Aws::check_bucket_permission(self, bucket, permission).await
    }

    async fn upload_from_reader(
        &self,
        reader: ImageReader,
        bucket: &str,
        key: &str,
    ) -> Result<UploadOutput> {
        self.upload(reader, bucket, key).await
    }

    async fn register(
        &self,
        name: &str,
        bucket: &str,
        key: &str,
        share_with: &[String],
        arch: Arch,
        boot_mode: Option<BootMode>,
        import_role: Option<&str>,
    ) -> Result<(String, String)> {
        Aws::register(self, name, bucket, key, share_with, arch, boot_mode, import_role).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        Aws::delete_object(self, bucket, key).await
    }
}

/// Optional uploader settings
#[derive(Debug, Clone, Default)]
pub struct UploaderOptions {
    /// Defaults to the host architecture
    pub target_arch: Option<Arch>,
    /// `None` leaves the boot mode to the instance type
    pub boot_mode: Option<BootMode>,
    /// Accounts that get launch and create-volume permissions
    pub share_with: Vec<String>,
}

/// Uploads one image to one bucket and registers it in one region
pub struct AwsUploader {
    client: Arc<dyn UploaderClient>,
    region: String,
    bucket: String,
    image_name: String,
    options: UploaderOptions,
    result_ami: Option<String>,
}

impl AwsUploader {
    pub fn new(
        client: Arc<dyn UploaderClient>,
        region: impl Into<String>,
        bucket: impl Into<String>,
        image_name: impl Into<String>,
        options: UploaderOptions,
    ) -> Self {
        Self {
            client,
            region: region.into(),
            bucket: bucket.into(),
            image_name: image_name.into(),
            options,
            result_ami: None,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Region access gate
    pub async fn check_region(&self) -> Result<()> {
        let regions = self.client.regions().await.map_err(|e| {
            e.context(format!("retrieving AWS regions for '{}' failed", self.region))
        })?;
        if !regions.iter().any(|r| *r == self.region) {
            return Err(Error::fail(format!(
                "given AWS region '{}' not found",
                self.region
            )));
        }
        Ok(())
    }

    /// Bucket existence gate
    pub async fn check_bucket(&self) -> Result<()> {
        let buckets = self
            .client
            .buckets()
            .await
            .map_err(|e| e.context("retrieving AWS list of buckets failed"))?;
        if !buckets.iter().any(|b| *b == self.bucket) {
            return Err(Error::fail(format!(
                "bucket '{}' not found in the given AWS account",
                self.bucket
            )));
        }
        Ok(())
    }

    /// Bucket write-permission gate
    pub async fn check_bucket_permissions(&self) -> Result<()> {
        let writable = self
            .client
            .check_bucket_permission(&self.bucket, S3Permission::Write)
            .await?;
        if !writable {
            return Err(Error::fail(format!(
                "you don't have write permissions to bucket '{}' with the given AWS account",
                self.bucket
            )));
        }
        Ok(())
    }

    /// Run every precondition gate, reporting progress to `status`
    pub async fn check(&self, status: &mut dyn Write) -> Result<()> {
        writeln!(status, "Checking AWS region access...")?;
        self.check_region().await?;

        writeln!(status, "Checking AWS bucket...")?;
        self.check_bucket().await?;

        writeln!(status, "Checking AWS bucket permissions...")?;
        self.check_bucket_permissions().await?;

        writeln!(status, "Upload conditions met.")?;
        Ok(())
    }

    /// Upload `reader` and register the result as an AMI
    pub async fn upload_and_register(
        &mut self,
        reader: ImageReader,
        status: &mut dyn Write,
    ) -> Result<()> {
        let key = format!("{}-{}", Uuid::new_v4(), self.image_name);
        writeln!(status, "Uploading {} to {}:{}", self.image_name, self.bucket, key)?;

        let uploaded = self
            .client
            .upload_from_reader(reader, &self.bucket, &key)
            .await?;

        let (ami, snapshot) = match self.register_uploaded(&key, &uploaded, status).await {
            Ok(ids) => ids,
            Err(err) => {
                let deleted = self.client.delete_object(&self.bucket, &key).await;
                // The status line is best effort; the returned error carries
                // the outcome
                let _ = writeln!(status, "Deleted S3 object {}:{}", self.bucket, key);
                return Err(match deleted {
                    Ok(()) => err,
                    Err(cleanup) => Error::join(err, cleanup),
                });
            }
        };

        info!("Registered {} as {} in {}", self.image_name, ami, self.region);
        self.result_ami = Some(ami.clone());

        writeln!(status, "Deleted S3 object {}:{}", self.bucket, key)?;
        self.client.delete_object(&self.bucket, &key).await?;

        writeln!(status, "AMI registered: {}", ami)?;
        writeln!(status, "Snapshot ID: {}", snapshot)?;
        Ok(())
    }

    async fn register_uploaded(
        &self,
        key: &str,
        uploaded: &UploadOutput,
        status: &mut dyn Write,
    ) -> Result<(String, String)> {
        writeln!(status, "File uploaded to {}", uploaded.location)?;

        let arch = match self.options.target_arch {
            Some(arch) => arch,
            None => Arch::host()?,
        };
        debug!("Registering for architecture {}", arch);

        writeln!(status, "Registering AMI {}", self.image_name)?;
        let (ami, snapshot) = self
            .client
            .register(
                &self.image_name,
                &self.bucket,
                key,
                &self.options.share_with,
                arch,
                self.options.boot_mode,
                None,
            )
            .await?;

        if ami.is_empty() {
            return Err(Error::InternalError(
                "ami registered but empty ami string".to_string(),
            ));
        }
        Ok((ami, snapshot))
    }

    /// `(ami, region)` of the last successful upload
    pub fn result(&self) -> Result<(String, String)> {
        match &self.result_ami {
            Some(ami) => Ok((ami.clone(), self.region.clone())),
            None => Err(Error::NotFound("no successful upload found".to_string())),
        }
    }
}
