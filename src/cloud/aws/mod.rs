// src/cloud/aws/mod.rs

//! AWS S3 and EC2 image pipeline
//!
//! The pipeline code depends only on the capability traits below. A provider
//! implements whichever subset it supports; [`cli::AwsCli`] implements all of
//! them on top of the `aws` command-line tool, and tests use in-memory fakes.
//!
//! - [`ObjectStore`] / [`BlobUploader`] / [`Presigner`]: S3
//! - [`ComputeImages`]: snapshot import, AMI registration and sharing
//! - [`ComputeVm`]: security groups and instances for boot testing

pub mod boot;
pub mod cli;
mod client;
mod uploader;

pub use client::Aws;
pub use uploader::{AwsUploader, UploaderClient, UploaderOptions};

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Image bytes streamed into an upload
pub type ImageReader = Box<dyn AsyncRead + Send + Unpin>;

/// Root device of registered AMIs
pub const ROOT_DEVICE: &str = "/dev/sda1";

/// Lifetime of presigned S3 URLs
pub const PRESIGN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// S3 ACL permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum S3Permission {
    Read,
    Write,
    FullControl,
    ReadAcp,
    WriteAcp,
}

impl S3Permission {
    /// Grants that are sufficient for this permission
    pub const fn satisfied_by(&self) -> &'static [S3Permission] {
        match self {
            Self::Read => &[Self::Read, Self::Write, Self::FullControl],
            Self::Write => &[Self::Write, Self::FullControl],
            Self::FullControl => &[Self::FullControl],
            Self::ReadAcp => &[Self::ReadAcp, Self::WriteAcp],
            Self::WriteAcp => &[Self::WriteAcp],
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::FullControl => "FULL_CONTROL",
            Self::ReadAcp => "READ_ACP",
            Self::WriteAcp => "WRITE_ACP",
        }
    }
}

impl FromStr for S3Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "READ" => Ok(Self::Read),
            "WRITE" => Ok(Self::Write),
            "FULL_CONTROL" => Ok(Self::FullControl),
            "READ_ACP" => Ok(Self::ReadAcp),
            "WRITE_ACP" => Ok(Self::WriteAcp),
            other => Err(Error::ParseError(format!("unknown S3 permission {:?}", other))),
        }
    }
}

/// One bucket ACL grant as reported by S3
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    #[serde(default)]
    pub grantee: Option<String>,
    /// Raw permission string; unknown values never satisfy a check
    pub permission: String,
}

/// Canned object ACLs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectAcl {
    PublicRead,
}

impl ObjectAcl {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PublicRead => "public-read",
        }
    }
}

/// Firmware the AMI boots with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
    Legacy,
    Uefi,
    /// UEFI with BIOS fallback
    Hybrid,
}

impl BootMode {
    /// EC2 `BootModeValues` string
    pub const fn ec2_value(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy-bios",
            Self::Uefi => "uefi",
            Self::Hybrid => "uefi-preferred",
        }
    }
}

impl fmt::Display for BootMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Legacy => "legacy",
            Self::Uefi => "uefi",
            Self::Hybrid => "hybrid",
        })
    }
}

impl FromStr for BootMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "legacy" | "legacy-bios" => Ok(Self::Legacy),
            "uefi" => Ok(Self::Uefi),
            "hybrid" | "uefi-preferred" => Ok(Self::Hybrid),
            other => Err(Error::InvalidBootMode(other.to_string())),
        }
    }
}

/// Result of an S3 upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutput {
    pub location: String,
}

/// EC2 resource tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    /// The `Name` tag shown in the EC2 console
    pub fn name(value: impl Into<String>) -> Self {
        Self {
            key: "Name".to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSnapshotRequest {
    pub description: String,
    pub bucket: String,
    pub key: String,
    /// Service role used for the import; `None` uses the provider default
    pub role_name: Option<String>,
}

/// State of an import snapshot task
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImportSnapshotTask {
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub snapshot_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterImageRequest {
    pub name: String,
    /// EC2 architecture name
    pub architecture: String,
    pub virtualization_type: String,
    pub root_device_name: String,
    pub snapshot_id: String,
    pub ena_support: bool,
    /// EC2 boot mode value
    pub boot_mode: Option<String>,
}

/// A machine image as described by EC2
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    pub image_id: String,
    pub name: String,
    pub state: String,
    /// Snapshots behind the block device mappings
    pub snapshot_ids: Vec<String>,
}

/// Selects images for `describe_images`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageFilter {
    Ids(Vec<String>),
    Tag { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInstancesRequest {
    pub image_id: String,
    pub instance_type: String,
    pub security_group_ids: Vec<String>,
    /// Base64-encoded cloud-init user data
    pub user_data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instance {
    pub instance_id: String,
    pub state: String,
    pub public_ip: Option<String>,
}

/// S3 bucket and object management
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    async fn list_buckets(&self) -> Result<Vec<String>>;

    async fn get_bucket_acl(&self, bucket: &str) -> Result<Vec<Grant>>;

    async fn put_object_acl(&self, bucket: &str, key: &str, acl: ObjectAcl) -> Result<()>;
}

/// Streaming S3 upload
#[async_trait]
pub trait BlobUploader: Send + Sync {
    async fn upload(&self, bucket: &str, key: &str, reader: ImageReader) -> Result<UploadOutput>;
}

/// Presigned S3 GET URLs
#[async_trait]
pub trait Presigner: Send + Sync {
    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String>;
}

/// EC2 image, snapshot and region operations
#[async_trait]
pub trait ComputeImages: Send + Sync {
    /// Regions enabled for the account
    async fn describe_regions(&self) -> Result<Vec<String>>;

    /// Start an import and return its task ID
    async fn import_snapshot(&self, request: &ImportSnapshotRequest) -> Result<String>;

    async fn describe_import_snapshot_tasks(
        &self,
        task_ids: &[String],
    ) -> Result<Vec<ImportSnapshotTask>>;

    /// Register an AMI and return its ID
    async fn register_image(&self, request: &RegisterImageRequest) -> Result<String>;

    /// Copy an image into the client's region and return the new image ID
    async fn copy_image(&self, name: &str, source_image_id: &str, source_region: &str)
        -> Result<String>;

    async fn describe_images(&self, filter: &ImageFilter) -> Result<Vec<Image>>;

    async fn modify_image_attribute(&self, image_id: &str, add_launch_permissions: &[String])
        -> Result<()>;

    async fn modify_snapshot_attribute(
        &self,
        snapshot_id: &str,
        add_create_volume_permissions: &[String],
    ) -> Result<()>;

    async fn deregister_image(&self, image_id: &str) -> Result<()>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()>;

    async fn create_tags(&self, resources: &[String], tags: &[Tag]) -> Result<()>;
}

/// EC2 instance and security group operations
#[async_trait]
pub trait ComputeVm: Send + Sync {
    /// Create a security group and return its ID
    async fn create_security_group(&self, name: &str, description: &str) -> Result<String>;

    async fn delete_security_group(&self, group_id: &str) -> Result<()>;

    async fn authorize_ingress(
        &self,
        group_id: &str,
        cidr: &str,
        from_port: u16,
        to_port: u16,
        protocol: &str,
    ) -> Result<()>;

    async fn run_instances(&self, request: &RunInstancesRequest) -> Result<Vec<Instance>>;

    async fn describe_instances(&self, instance_ids: &[String]) -> Result<Vec<Instance>>;

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()>;

    async fn wait_until_running(&self, instance_id: &str) -> Result<()>;

    async fn wait_until_terminated(&self, instance_id: &str) -> Result<()>;
}
