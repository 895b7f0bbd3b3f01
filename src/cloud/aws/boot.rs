// src/cloud/aws/boot.rs

//! Boot an image on EC2 for testing, and tear it down again
//!
//! Setup records every resource it creates in an [`AwsResources`] record as
//! soon as it exists, so a failed setup can still be torn down.

use super::{Aws, BootMode, ImageReader};
use crate::cloud::ignore_not_found;
use crate::arch::Arch;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::warn;
use uuid::Uuid;

/// Instance type used when none is configured
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.micro";

/// Resources created by [`setup`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ami: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    #[serde(rename = "security-group", skip_serializing_if = "Option::is_none")]
    pub security_group: Option<String>,
    #[serde(rename = "instance", skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl AwsResources {
    pub fn is_empty(&self) -> bool {
        self.ami.is_none()
            && self.snapshot.is_none()
            && self.security_group.is_none()
            && self.instance_id.is_none()
    }
}

/// Everything [`setup`] needs besides the image bytes
#[derive(Debug, Clone)]
pub struct BootOptions {
    pub bucket: String,
    pub image_name: String,
    pub arch: Option<Arch>,
    pub boot_mode: Option<BootMode>,
    pub share_with: Vec<String>,
    pub username: String,
    /// Contents of the public key installed for `username`
    pub ssh_public_key: String,
    pub instance_type: String,
}

/// cloud-init user data creating `username` with `public_key`
pub fn cloud_init_user_data(username: &str, public_key: &str) -> String {
    format!(
        "#cloud-config\nuser: {}\nssh_authorized_keys:\n  - {}\n",
        username,
        public_key.trim_end()
    )
}

/// Upload, register and boot an image; returns the instance's public IP
pub async fn setup(
    aws: &Aws,
    image: ImageReader,
    opts: &BootOptions,
    res: &mut AwsResources,
    status: &mut dyn Write,
) -> Result<String> {
    let key = format!("{}-{}", Uuid::new_v4(), opts.image_name);
    let uploaded = aws.upload(image, &opts.bucket, &key).await?;
    writeln!(status, "file uploaded to {}", uploaded.location)?;

    let arch = match opts.arch {
        Some(arch) => arch,
        None => Arch::host()?,
    };
    let registered = aws
        .register(
            &opts.image_name,
            &opts.bucket,
            &key,
            &opts.share_with,
            arch,
            opts.boot_mode,
            None,
        )
        .await;
    let deleted = aws.delete_object(&opts.bucket, &key).await;
    let (ami, snapshot) = match (registered, deleted) {
        (Ok(ids), Ok(())) => ids,
        (Ok(ids), Err(e)) => {
            warn!("Failed to delete S3 object {}:{}: {}", opts.bucket, key, e);
            ids
        }
        (Err(e), Ok(())) => return Err(e),
        (Err(e), Err(cleanup)) => return Err(Error::join(e, cleanup)),
    };
    res.ami = Some(ami.clone());
    res.snapshot = Some(snapshot);
    writeln!(status, "AMI registered: {}", ami)?;

    let group_name = format!("{}-ssh", opts.image_name);
    let group = aws
        .create_security_group(&group_name, &format!("{} security group", group_name))
        .await?;
    res.security_group = Some(group.clone());

    aws.authorize_ingress(&group, "0.0.0.0/0", 22, 22, "tcp").await?;

    let user_data = cloud_init_user_data(&opts.username, &opts.ssh_public_key);
    let instance = aws
        .run_instance(&ami, &group, &user_data, &opts.instance_type)
        .await?;
    res.instance_id = Some(instance.instance_id.clone());

    let ip = aws.instance_address(&instance.instance_id).await?;
    writeln!(
        status,
        "Instance {} is running and has IP address {}",
        instance.instance_id, ip
    )?;
    Ok(ip)
}

/// Delete every resource in `res`: instance, security group, then image
///
/// Every step runs regardless of earlier failures; failures are joined.
/// Resources that no longer exist count as deleted.
pub async fn teardown(aws: &Aws, res: &AwsResources, status: &mut dyn Write) -> Result<()> {
    writeln!(status, "Tearing down")?;
    let mut errors = Vec::new();

    if let Some(instance) = &res.instance_id {
        writeln!(status, "terminating instance {}", instance)?;
        if let Err(e) = ignore_not_found(aws.terminate_instance(instance).await, instance) {
            errors.push(e.context(format!("failed to terminate instance {}", instance)));
        }
    }

    if let Some(group) = &res.security_group {
        writeln!(status, "deleting security group {}", group)?;
        if let Err(e) = ignore_not_found(aws.delete_security_group(group).await, group) {
            errors.push(e.context(format!("cannot delete the security group {}", group)));
        }
    }

    if let Some(ami) = &res.ami {
        writeln!(
            status,
            "deleting EC2 image {} and snapshot {}",
            ami,
            res.snapshot.as_deref().unwrap_or("-")
        )?;
        let deleted = aws.delete_ec2_image(ami, res.snapshot.as_deref()).await;
        if let Err(e) = ignore_not_found(deleted, ami) {
            errors.push(e.context(format!("failed to deregister image {}", ami)));
        }
    }

    Error::from_list(errors)
}
