// src/cloud/azure/arm.rs

//! Raw Azure resource operations
//!
//! One call per resource manager operation, with no naming or ordering
//! logic. Implementations map "resource does not exist" to
//! [`Error::NotFound`](crate::error::Error::NotFound).

use super::{HyperVGen, Tag};
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Managed image created from a VHD blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageParams {
    pub location: String,
    pub blob_uri: String,
    pub hyper_v: HyperVGen,
}

/// Gallery image definition; always a generalized Linux image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryImageParams {
    pub location: String,
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    /// Azure architecture name, `x64` or `Arm64`
    pub architecture: String,
    pub hyper_v: HyperVGen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryImageVersionParams {
    pub location: String,
    pub target_regions: Vec<String>,
    /// Resource ID of the source managed image
    pub source_image_id: String,
}

/// Inbound security rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRule {
    pub name: String,
    pub description: String,
    pub protocol: String,
    pub destination_port: String,
    pub priority: u32,
}

impl SecurityRule {
    /// Allow TCP/22 from anywhere
    pub fn ssh() -> Self {
        Self {
            name: "ssh".to_string(),
            description: "ssh".to_string(),
            protocol: "Tcp".to_string(),
            destination_port: "22".to_string(),
            priority: 100,
        }
    }
}

/// NIC wiring a subnet, a public IP and a security group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicParams {
    pub location: String,
    pub ip_config_name: String,
    pub subnet_id: String,
    pub public_ip_id: String,
    pub security_group_id: String,
}

/// Linux VM with SSH key authentication only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmParams {
    pub location: String,
    pub size: String,
    pub image_id: String,
    pub disk_name: String,
    pub computer_name: String,
    pub admin_username: String,
    /// Path of the authorized keys file on the VM
    pub ssh_key_path: String,
    pub ssh_key_data: String,
    pub nic_id: String,
}

/// A created public IP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicIp {
    pub id: String,
    pub address: String,
}

/// Resource groups, generic resources and storage accounts
#[async_trait]
pub trait ArmResources: Send + Sync {
    async fn resource_group_location(&self, resource_group: &str) -> Result<String>;

    /// Names of the resources matching an OData `filter`
    async fn list_resources(&self, resource_group: &str, filter: &str) -> Result<Vec<String>>;

    async fn create_storage_account(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
        tag: &Tag,
    ) -> Result<()>;

    async fn list_storage_account_keys(
        &self,
        resource_group: &str,
        account: &str,
    ) -> Result<Vec<String>>;
}

/// Blob containers and page blobs
#[async_trait]
pub trait ArmBlobs: Send + Sync {
    async fn container_exists(&self, account: &str, key: &str, container: &str) -> Result<bool>;

    async fn create_container(&self, account: &str, key: &str, container: &str) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn upload_page_blob(
        &self,
        account: &str,
        key: &str,
        container: &str,
        blob: &str,
        local: &Path,
        concurrency: usize,
    ) -> Result<()>;

    async fn delete_blob(&self, account: &str, key: &str, container: &str, blob: &str)
        -> Result<()>;
}

/// Images, galleries, VMs and disks
#[async_trait]
pub trait ArmCompute: Send + Sync {
    /// Returns the image's resource ID
    async fn create_image(&self, resource_group: &str, name: &str, params: &ImageParams)
        -> Result<String>;

    async fn delete_image(&self, resource_group: &str, name: &str) -> Result<()>;

    async fn create_gallery(&self, resource_group: &str, name: &str, location: &str)
        -> Result<()>;

    async fn delete_gallery(&self, resource_group: &str, name: &str) -> Result<()>;

    async fn create_gallery_image(
        &self,
        resource_group: &str,
        gallery: &str,
        name: &str,
        params: &GalleryImageParams,
    ) -> Result<()>;

    async fn delete_gallery_image(&self, resource_group: &str, gallery: &str, name: &str)
        -> Result<()>;

    async fn create_gallery_image_version(
        &self,
        resource_group: &str,
        gallery: &str,
        image: &str,
        version: &str,
        params: &GalleryImageVersionParams,
    ) -> Result<()>;

    async fn delete_gallery_image_version(
        &self,
        resource_group: &str,
        gallery: &str,
        image: &str,
        version: &str,
    ) -> Result<()>;

    async fn create_vm(&self, resource_group: &str, name: &str, params: &VmParams) -> Result<()>;

    async fn delete_vm(&self, resource_group: &str, name: &str) -> Result<()>;

    async fn delete_disk(&self, resource_group: &str, name: &str) -> Result<()>;
}

/// Virtual networks, subnets, public IPs, security groups and NICs
///
/// Every `create_*` returns the new resource's ID.
#[async_trait]
pub trait ArmNetwork: Send + Sync {
    async fn create_vnet(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
        address_prefix: &str,
    ) -> Result<String>;

    async fn delete_vnet(&self, resource_group: &str, name: &str) -> Result<()>;

    async fn create_subnet(
        &self,
        resource_group: &str,
        vnet: &str,
        name: &str,
        address_prefix: &str,
    ) -> Result<String>;

    async fn delete_subnet(&self, resource_group: &str, vnet: &str, name: &str) -> Result<()>;

    /// Static public IP
    async fn create_public_ip(&self, resource_group: &str, name: &str, location: &str)
        -> Result<PublicIp>;

    async fn delete_public_ip(&self, resource_group: &str, name: &str) -> Result<()>;

    async fn create_security_group(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
        rules: &[SecurityRule],
    ) -> Result<String>;

    async fn delete_security_group(&self, resource_group: &str, name: &str) -> Result<()>;

    async fn create_nic(&self, resource_group: &str, name: &str, params: &NicParams)
        -> Result<String>;

    async fn delete_nic(&self, resource_group: &str, name: &str) -> Result<()>;
}
