// src/cloud/aws/client.rs

//! The `Aws` facade: multi-step EC2/S3 operations over the capability traits

use super::{
    BlobUploader, BootMode, ComputeImages, ComputeVm, Image, ImageFilter, ImageReader,
    ImportSnapshotRequest, Instance, ObjectAcl, ObjectStore, Presigner, RegisterImageRequest,
    RunInstancesRequest, S3Permission, Tag, UploadOutput, PRESIGN_TTL, ROOT_DEVICE,
};
use crate::arch::Arch;
use crate::cloud::waiter::{PollState, Waiter, DEFAULT_POLL_INTERVAL};
use crate::error::{Error, Result};
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// AWS client composed from capability implementations
#[derive(Clone)]
pub struct Aws {
    s3: Arc<dyn ObjectStore>,
    uploader: Arc<dyn BlobUploader>,
    presigner: Arc<dyn Presigner>,
    images: Arc<dyn ComputeImages>,
    vms: Arc<dyn ComputeVm>,
    token: CancellationToken,
    poll_interval: Duration,
}

impl Aws {
    pub fn new(
        s3: Arc<dyn ObjectStore>,
        uploader: Arc<dyn BlobUploader>,
        presigner: Arc<dyn Presigner>,
        images: Arc<dyn ComputeImages>,
        vms: Arc<dyn ComputeVm>,
    ) -> Self {
        Self {
            s3,
            uploader,
            presigner,
            images,
            vms,
            token: CancellationToken::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Build from one provider implementing every capability
    pub fn from_provider<P>(provider: Arc<P>) -> Self
    where
        P: ObjectStore + BlobUploader + Presigner + ComputeImages + ComputeVm + 'static,
    {
        Self::new(
            provider.clone(),
            provider.clone(),
            provider.clone(),
            provider.clone(),
            provider,
        )
    }

    /// Stop waiters when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn waiter(&self, name: &str) -> Waiter {
        Waiter::new(name, self.token.clone()).with_interval(self.poll_interval)
    }

    pub async fn regions(&self) -> Result<Vec<String>> {
        self.images.describe_regions().await
    }

    pub async fn buckets(&self) -> Result<Vec<String>> {
        self.s3.list_buckets().await
    }

    /// Whether any grant on `bucket` is sufficient for `permission`
    pub async fn check_bucket_permission(
        &self,
        bucket: &str,
        permission: S3Permission,
    ) -> Result<bool> {
        let grants = self.s3.get_bucket_acl(bucket).await?;
        Ok(grants.iter().any(|grant| {
            grant
                .permission
                .parse::<S3Permission>()
                .map(|p| permission.satisfied_by().contains(&p))
                .unwrap_or(false)
        }))
    }

    pub async fn upload(&self, reader: ImageReader, bucket: &str, key: &str) -> Result<UploadOutput> {
        info!("[AWS] Uploading image to S3: {}/{}", bucket, key);
        self.uploader.upload(bucket, key, reader).await
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.s3.delete_object(bucket, key).await
    }

    /// Import `bucket/key` as a snapshot and register an AMI from it
    ///
    /// Waits for the import without an attempt cap, tags snapshot and image
    /// with `Name=<name>` and shares both with `share_with`. The S3 object is
    /// left in place. Returns `(image_id, snapshot_id)`.
    pub async fn register(
        &self,
        name: &str,
        bucket: &str,
        key: &str,
        share_with: &[String],
        arch: Arch,
        boot_mode: Option<BootMode>,
        import_role: Option<&str>,
    ) -> Result<(String, String)> {
        let ec2_arch = arch.ec2_name()?;

        info!("[AWS] Importing snapshot from image: {}/{}", bucket, key);
        let task_id = self
            .images
            .import_snapshot(&ImportSnapshotRequest {
                description: format!("Image Builder AWS Import of {}", name),
                bucket: bucket.to_string(),
                key: key.to_string(),
                role_name: import_role.map(str::to_string),
            })
            .await?;

        info!("[AWS] Waiting for snapshot to finish importing: {}", task_id);
        let snapshot_id = self.wait_for_import(&task_id).await?;

        self.images
            .create_tags(&[snapshot_id.clone()], &[Tag::name(name)])
            .await?;

        info!("[AWS] Registering AMI from imported snapshot: {}", snapshot_id);
        let image_id = self
            .images
            .register_image(&RegisterImageRequest {
                name: name.to_string(),
                architecture: ec2_arch.to_string(),
                virtualization_type: "hvm".to_string(),
                root_device_name: ROOT_DEVICE.to_string(),
                snapshot_id: snapshot_id.clone(),
                ena_support: true,
                boot_mode: boot_mode.map(|m| m.ec2_value().to_string()),
            })
            .await?;
        info!("[AWS] AMI registered: {}", image_id);

        self.images
            .create_tags(&[image_id.clone()], &[Tag::name(name)])
            .await?;

        if !share_with.is_empty() {
            self.share_snapshot(&snapshot_id, share_with).await?;
            self.share_ami(&image_id, share_with).await?;
        }

        Ok((image_id, snapshot_id))
    }

    async fn wait_for_import(&self, task_id: &str) -> Result<String> {
        let ids = [task_id.to_string()];
        let ids = &ids[..];
        self.waiter("WaitUntilImportSnapshotTaskCompleted")
            .wait(move || async move {
                let tasks = self.images.describe_import_snapshot_tasks(&ids).await?;
                if tasks.is_empty() {
                    return Ok(PollState::Pending("unknown".to_string()));
                }
                if tasks.iter().any(|t| t.status == "deleted") {
                    let message = tasks
                        .iter()
                        .find_map(|t| t.status_message.clone())
                        .unwrap_or_else(|| "deleted".to_string());
                    return Ok(PollState::Failed(message));
                }
                if tasks.iter().all(|t| t.status == "completed") {
                    return match tasks[0].snapshot_id.clone() {
                        Some(id) => Ok(PollState::Ready(id)),
                        None => Err(Error::CloudError(format!(
                            "import task {} completed without a snapshot",
                            task_id
                        ))),
                    };
                }
                Ok(PollState::Pending(tasks[0].status.clone()))
            })
            .await
    }

    /// Copy `ami` from `source_region` into this client's region
    ///
    /// Waits until the copy is available, then tags it and its snapshots.
    /// The new image ID is returned in the error context when a later step
    /// fails so the caller can clean up.
    pub async fn copy_image(&self, name: &str, ami: &str, source_region: &str) -> Result<String> {
        let image_id = self.images.copy_image(name, ami, source_region).await?;
        let filter = ImageFilter::Ids(vec![image_id.clone()]);
        let filter_ref = &filter;

        let wait = self
            .waiter("WaitUntilImageAvailable")
            .wait(move || async move {
                let images = self.images.describe_images(filter_ref).await?;
                if images.iter().any(|i| i.state == "failed") {
                    return Ok(PollState::Failed("failed".to_string()));
                }
                if !images.is_empty() && images.iter().all(|i| i.state == "available") {
                    return Ok(PollState::Ready(()));
                }
                Ok(PollState::Pending(
                    images.first().map(|i| i.state.clone()).unwrap_or_default(),
                ))
            })
            .await;

        let tagged = match wait {
            Ok(()) => self.tag_copy(name, &image_id, &filter).await,
            Err(e) => Err(e),
        };
        tagged
            .map(|_| image_id.clone())
            .map_err(|e| e.context(format!("copying image {} to {}", ami, image_id)))
    }

    async fn tag_copy(&self, name: &str, image_id: &str, filter: &ImageFilter) -> Result<()> {
        self.images
            .create_tags(&[image_id.to_string()], &[Tag::name(name)])
            .await?;

        let images = self.images.describe_images(filter).await?;
        let image = images
            .first()
            .ok_or_else(|| Error::NotFound(format!("Unable to find image with id: {}", image_id)))?;
        for snapshot in &image.snapshot_ids {
            self.images
                .create_tags(&[snapshot.clone()], &[Tag::name(name)])
                .await?;
        }
        Ok(())
    }

    /// Share an existing AMI and its snapshots with other accounts
    pub async fn share_image(&self, ami: &str, accounts: &[String]) -> Result<()> {
        let images = self
            .images
            .describe_images(&ImageFilter::Ids(vec![ami.to_string()]))
            .await?;
        let image = images
            .first()
            .ok_or_else(|| Error::NotFound(format!("Unable to find image with id: {}", ami)))?;

        for snapshot in &image.snapshot_ids {
            self.share_snapshot(snapshot, accounts).await?;
        }
        self.share_ami(ami, accounts).await
    }

    async fn share_ami(&self, ami: &str, accounts: &[String]) -> Result<()> {
        info!("[AWS] Sharing ec2 AMI {}", ami);
        self.images
            .modify_image_attribute(ami, accounts)
            .await
            .inspect_err(|e| warn!("[AWS] Error sharing AMI: {}", e))
    }

    async fn share_snapshot(&self, snapshot: &str, accounts: &[String]) -> Result<()> {
        info!("[AWS] Sharing ec2 snapshot {}", snapshot);
        self.images
            .modify_snapshot_attribute(snapshot, accounts)
            .await
            .inspect_err(|e| warn!("[AWS] Error sharing ec2 snapshot: {}", e))
    }

    /// Deregister `image`, then delete its snapshots
    ///
    /// Snapshot deletion failures are logged; the last one is returned after
    /// every snapshot was attempted.
    pub async fn remove_snapshot_and_deregister_image(&self, image: &Image) -> Result<()> {
        self.images.deregister_image(&image.image_id).await?;

        let mut last_err = None;
        for snapshot in &image.snapshot_ids {
            if let Err(e) = self.images.delete_snapshot(snapshot).await {
                warn!("Unable to remove snapshot {}: {}", snapshot, e);
                last_err = Some(e);
            }
        }
        last_err.map_or(Ok(()), Err)
    }

    pub async fn describe_images_by_tag(&self, key: &str, value: &str) -> Result<Vec<Image>> {
        self.images
            .describe_images(&ImageFilter::Tag {
                key: key.to_string(),
                value: value.to_string(),
            })
            .await
    }

    /// Presigned GET URL valid for seven days
    pub async fn s3_object_presigned_url(&self, bucket: &str, key: &str) -> Result<String> {
        info!("[AWS] Generating presigned URL for S3 object {}/{}", bucket, key);
        let url = self.presigner.presign_get(bucket, key, PRESIGN_TTL).await?;
        debug!("[AWS] S3 presigned URL ready");
        Ok(url)
    }

    pub async fn mark_s3_object_as_public(&self, bucket: &str, key: &str) -> Result<()> {
        info!("[AWS] Making S3 object public {}/{}", bucket, key);
        self.s3.put_object_acl(bucket, key, ObjectAcl::PublicRead).await
    }

    pub async fn create_security_group(&self, name: &str, description: &str) -> Result<String> {
        self.vms.create_security_group(name, description).await
    }

    pub async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        self.vms.delete_security_group(group_id).await
    }

    pub async fn authorize_ingress(
        &self,
        group_id: &str,
        cidr: &str,
        from_port: u16,
        to_port: u16,
        protocol: &str,
    ) -> Result<()> {
        self.vms
            .authorize_ingress(group_id, cidr, from_port, to_port, protocol)
            .await
    }

    /// Launch one instance and wait until it runs
    pub async fn run_instance(
        &self,
        image_id: &str,
        security_group: &str,
        user_data: &str,
        instance_type: &str,
    ) -> Result<Instance> {
        let instances = self
            .vms
            .run_instances(&RunInstancesRequest {
                image_id: image_id.to_string(),
                instance_type: instance_type.to_string(),
                security_group_ids: vec![security_group.to_string()],
                user_data: base64::engine::general_purpose::STANDARD.encode(user_data),
            })
            .await?;
        let instance = instances
            .into_iter()
            .next()
            .ok_or_else(|| Error::CloudError("RunInstances returned no instance".to_string()))?;

        self.vms.wait_until_running(&instance.instance_id).await?;
        Ok(instance)
    }

    /// Terminate an instance and wait until it is gone
    pub async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        self.vms
            .terminate_instances(&[instance_id.to_string()])
            .await?;
        self.vms.wait_until_terminated(instance_id).await
    }

    pub async fn instance_address(&self, instance_id: &str) -> Result<String> {
        let instances = self
            .vms
            .describe_instances(&[instance_id.to_string()])
            .await?;
        instances
            .into_iter()
            .next()
            .and_then(|i| i.public_ip)
            .ok_or_else(|| {
                Error::CloudError(format!("instance {} has no public IP address", instance_id))
            })
    }

    /// Deregister an AMI, then delete its snapshot
    pub async fn delete_ec2_image(&self, image_id: &str, snapshot_id: Option<&str>) -> Result<()> {
        self.images.deregister_image(image_id).await?;
        if let Some(snapshot) = snapshot_id {
            self.images.delete_snapshot(snapshot).await?;
        }
        Ok(())
    }
}
