// src/cloud/azure/mod.rs

//! Azure page blob, image and VM pipeline
//!
//! Three capability traits describe what the pipeline needs:
//!
//! - [`AzureStorage`]: resource group location, tagged storage account
//!   lookup, account keys, containers and page blobs
//! - [`AzureImage`]: managed images and shared gallery image versions
//! - [`AzureVm`]: a VM together with its network resources
//!
//! [`AzureClient`] implements all three on top of the raw resource
//! operations in [`arm`], and owns every naming rule. [`cli::AzCli`]
//! provides the raw operations through the `az` command-line tool.
//!
//! # Resource names
//!
//! | Resource | Name |
//! |----------|------|
//! | gallery | `<image>_gallery` with dashes replaced by underscores |
//! | gallery image definition | `<image>-img` |
//! | intermediate managed image | `<image>-mimg` |
//! | gallery image version | `1.0.0` |
//! | VM resources | `<vm>-intf`, `-sg`, `-ip`, `-subnet`, `-vnet`, `-disk` |

pub mod arm;
pub mod boot;
pub mod cli;
mod client;

pub use client::AzureClient;

use crate::arch::Arch;
use crate::error::Result;
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Container that holds uploaded images
pub const STORAGE_CONTAINER: &str = "images";

/// Tag name marking the shared image storage account of a location
pub const STORAGE_ACCOUNT_TAG: &str = "imagesStorageAccount";

/// Prefix of generated storage account names
pub const STORAGE_ACCOUNT_PREFIX: &str = "images";

/// Parallel page uploads per blob
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 16;

/// Version of every gallery image created here
pub const GALLERY_IMAGE_VERSION: &str = "1.0.0";

/// Publisher and offer of gallery image definitions
pub const IMAGE_PUBLISHER: &str = "image-builder";

const STORAGE_ACCOUNT_NAME_LEN: usize = 24;

/// Azure resource tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Tag of the shared storage account for `location`
    pub fn storage_account(location: &str) -> Self {
        Self::new(STORAGE_ACCOUNT_TAG, format!("location={}", location))
    }

    /// OData filter selecting resources carrying this tag
    pub fn filter(&self) -> String {
        format!("tagName eq '{}' and tagValue eq '{}'", self.name, self.value)
    }
}

/// Hyper-V generation of an image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HyperVGen {
    V1,
    #[default]
    V2,
}

impl HyperVGen {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "V1",
            Self::V2 => "V2",
        }
    }
}

impl fmt::Display for HyperVGen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage account name with its access key
#[derive(Clone, PartialEq, Eq)]
pub struct StorageAccount {
    pub name: String,
    pub key: String,
}

impl fmt::Debug for StorageAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAccount")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Location of one blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub account: String,
    pub container: String,
    pub blob: String,
}

impl BlobRef {
    pub fn new(
        account: impl Into<String>,
        container: impl Into<String>,
        blob: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            container: container.into(),
            blob: blob.into(),
        }
    }

    pub fn uri(&self) -> String {
        format!(
            "https://{}.blob.core.windows.net/{}/{}",
            self.account, self.container, self.blob
        )
    }
}

/// Gallery resources behind one registered gallery image version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryImage {
    pub resource_group: String,
    pub gallery: String,
    pub image_definition: String,
    pub version: String,
    /// Managed image the version was created from
    pub intermediate_image: String,
    /// Resource ID of the version, usable as a VM image
    pub image_ref: String,
}

/// Parameters of [`AzureVm::create_vm`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmOptions {
    pub name: String,
    /// Resource ID of a managed image or gallery image version
    pub image: String,
    pub size: String,
    pub username: String,
    /// Public key contents
    pub ssh_key: String,
}

/// A VM and the network resources created for it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    pub name: String,
    pub resource_group: String,
    pub nic: String,
    pub security_group: String,
    pub public_ip: String,
    #[serde(default)]
    pub ip_address: String,
    pub subnet: String,
    pub vnet: String,
    pub disk: String,
}

impl VmRecord {
    /// Record with every derived resource name filled in
    pub fn planned(resource_group: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            resource_group: resource_group.to_string(),
            nic: format!("{}-intf", name),
            security_group: format!("{}-sg", name),
            public_ip: format!("{}-ip", name),
            ip_address: String::new(),
            subnet: format!("{}-subnet", name),
            vnet: format!("{}-vnet", name),
            disk: format!("{}-disk", name),
        }
    }
}

/// `<image>_gallery`, with dashes replaced by underscores
pub fn gallery_name(image_name: &str) -> String {
    format!("{}_gallery", image_name.replace('-', "_"))
}

pub fn gallery_image_name(image_name: &str) -> String {
    format!("{}-img", image_name)
}

pub fn intermediate_image_name(image_name: &str) -> String {
    format!("{}-mimg", image_name)
}

/// SKU of the gallery image definition `definition`
pub fn gallery_image_sku(definition: &str) -> String {
    format!("IB-SKU-{}", definition)
}

pub fn managed_image_id(subscription: &str, resource_group: &str, name: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/images/{}",
        subscription, resource_group, name
    )
}

pub fn gallery_image_version_id(
    subscription: &str,
    resource_group: &str,
    gallery: &str,
    definition: &str,
    version: &str,
) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/galleries/{}/images/{}/versions/{}",
        subscription, resource_group, gallery, definition, version
    )
}

/// Append `.vhd` unless the name already ends with it
pub fn ensure_vhd_extension(name: &str) -> String {
    if name.ends_with(".vhd") {
        name.to_string()
    } else {
        format!("{}.vhd", name)
    }
}

/// Random storage account name: `prefix` plus lowercase alphanumerics, 24
/// characters in total
pub fn random_storage_account_name(prefix: &str) -> String {
    let suffix_len = STORAGE_ACCOUNT_NAME_LEN.saturating_sub(prefix.len());
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(suffix_len)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("{}{}", prefix, suffix)
}

/// Storage accounts, containers and page blobs
#[async_trait]
pub trait AzureStorage: Send + Sync {
    async fn resource_group_location(&self, resource_group: &str) -> Result<String>;

    /// Name of the first resource in the group carrying `tag`
    async fn find_resource_by_tag(&self, resource_group: &str, tag: &Tag)
        -> Result<Option<String>>;

    /// An empty `location` means the resource group's location
    async fn create_storage_account(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
        tag: &Tag,
    ) -> Result<()>;

    async fn storage_account_key(&self, resource_group: &str, account: &str) -> Result<String>;

    /// Create the container unless it exists
    async fn ensure_container(&self, account: &StorageAccount, container: &str) -> Result<()>;

    async fn create_page_blob(
        &self,
        account: &StorageAccount,
        container: &str,
        blob: &str,
        local: &Path,
        concurrency: usize,
    ) -> Result<BlobRef>;

    async fn delete_blob(&self, account: &StorageAccount, container: &str, blob: &str)
        -> Result<()>;
}

/// Managed images and gallery image versions
#[async_trait]
pub trait AzureImage: Send + Sync {
    /// Register a managed image from a VHD blob; returns its resource ID
    async fn register_image(
        &self,
        resource_group: &str,
        blob: &BlobRef,
        name: &str,
        location: &str,
        hyper_v: HyperVGen,
    ) -> Result<String>;

    /// Register a gallery image version from a VHD blob
    #[allow(clippy::too_many_arguments)]
    async fn register_gallery_image(
        &self,
        resource_group: &str,
        blob: &BlobRef,
        name: &str,
        location: &str,
        hyper_v: HyperVGen,
        arch: Arch,
    ) -> Result<GalleryImage>;

    async fn delete_image(&self, resource_group: &str, name: &str) -> Result<()>;

    /// Delete version, definition, gallery and intermediate image, in order
    async fn delete_gallery_image(&self, image: &GalleryImage) -> Result<()>;
}

/// VMs with their network resources
#[async_trait]
pub trait AzureVm: Send + Sync {
    async fn create_vm(&self, resource_group: &str, opts: &VmOptions) -> Result<VmRecord>;

    /// Delete the VM, then its disk, NIC, security group, public IP, subnet
    /// and VNet
    async fn destroy_vm(&self, vm: &VmRecord) -> Result<()>;
}
