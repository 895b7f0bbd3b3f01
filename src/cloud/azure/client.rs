// src/cloud/azure/client.rs

//! Azure capabilities on top of raw resource operations

use super::arm::{
    ArmBlobs, ArmCompute, ArmNetwork, ArmResources, GalleryImageParams,
    GalleryImageVersionParams, ImageParams, NicParams, SecurityRule, VmParams,
};
use super::{
    gallery_image_name, gallery_image_sku, gallery_image_version_id, gallery_name,
    intermediate_image_name, managed_image_id, AzureImage, AzureStorage, AzureVm, BlobRef,
    GalleryImage, HyperVGen, StorageAccount, Tag, VmOptions, VmRecord, GALLERY_IMAGE_VERSION,
    IMAGE_PUBLISHER,
};
use crate::arch::Arch;
use crate::cloud::ignore_not_found;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const VNET_PREFIX: &str = "10.1.0.0/16";
const SUBNET_PREFIX: &str = "10.1.10.0/24";
const IP_CONFIG_NAME: &str = "ipConfig";

/// Implements [`AzureStorage`], [`AzureImage`] and [`AzureVm`] for one
/// subscription
pub struct AzureClient {
    subscription: String,
    resources: Arc<dyn ArmResources>,
    blobs: Arc<dyn ArmBlobs>,
    compute: Arc<dyn ArmCompute>,
    network: Arc<dyn ArmNetwork>,
}

impl AzureClient {
    pub fn new(
        subscription: impl Into<String>,
        resources: Arc<dyn ArmResources>,
        blobs: Arc<dyn ArmBlobs>,
        compute: Arc<dyn ArmCompute>,
        network: Arc<dyn ArmNetwork>,
    ) -> Self {
        Self {
            subscription: subscription.into(),
            resources,
            blobs,
            compute,
            network,
        }
    }

    /// Use one provider for every raw operation
    pub fn from_provider<P>(subscription: impl Into<String>, provider: Arc<P>) -> Self
    where
        P: ArmResources + ArmBlobs + ArmCompute + ArmNetwork + 'static,
    {
        Self::new(
            subscription,
            provider.clone(),
            provider.clone(),
            provider.clone(),
            provider,
        )
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    async fn resolve_location(&self, resource_group: &str, location: &str) -> Result<String> {
        if !location.is_empty() {
            return Ok(location.to_string());
        }
        self.resources.resource_group_location(resource_group).await
    }

    async fn create_gallery_resources(
        &self,
        image: &GalleryImage,
        blob: &BlobRef,
        location: &str,
        hyper_v: HyperVGen,
        architecture: &str,
    ) -> Result<()> {
        let rg = image.resource_group.as_str();

        info!("Creating gallery {}", image.gallery);
        self.compute.create_gallery(rg, &image.gallery, location).await?;

        let definition = GalleryImageParams {
            location: location.to_string(),
            publisher: IMAGE_PUBLISHER.to_string(),
            offer: IMAGE_PUBLISHER.to_string(),
            sku: gallery_image_sku(&image.image_definition),
            architecture: architecture.to_string(),
            hyper_v,
        };
        self.compute
            .create_gallery_image(rg, &image.gallery, &image.image_definition, &definition)
            .await?;

        let intermediate = ImageParams {
            location: location.to_string(),
            blob_uri: blob.uri(),
            hyper_v,
        };
        self.compute
            .create_image(rg, &image.intermediate_image, &intermediate)
            .await?;

        let version = GalleryImageVersionParams {
            location: location.to_string(),
            target_regions: vec![location.to_string()],
            source_image_id: managed_image_id(&self.subscription, rg, &image.intermediate_image),
        };
        info!(
            "Creating gallery image version {}/{}/{}",
            image.gallery, image.image_definition, image.version
        );
        self.compute
            .create_gallery_image_version(
                rg,
                &image.gallery,
                &image.image_definition,
                &image.version,
                &version,
            )
            .await
    }

    async fn create_vm_resources(
        &self,
        vm: &mut VmRecord,
        opts: &VmOptions,
        location: &str,
    ) -> Result<()> {
        let rg = vm.resource_group.clone();

        self.network
            .create_vnet(&rg, &vm.vnet, location, VNET_PREFIX)
            .await?;
        let subnet_id = self
            .network
            .create_subnet(&rg, &vm.vnet, &vm.subnet, SUBNET_PREFIX)
            .await?;

        let ip = self
            .network
            .create_public_ip(&rg, &vm.public_ip, location)
            .await?;
        vm.ip_address = ip.address;

        let security_group_id = self
            .network
            .create_security_group(&rg, &vm.security_group, location, &[SecurityRule::ssh()])
            .await?;

        let nic = NicParams {
            location: location.to_string(),
            ip_config_name: IP_CONFIG_NAME.to_string(),
            subnet_id,
            public_ip_id: ip.id,
            security_group_id,
        };
        let nic_id = self.network.create_nic(&rg, &vm.nic, &nic).await?;

        let params = VmParams {
            location: location.to_string(),
            size: opts.size.clone(),
            image_id: opts.image.clone(),
            disk_name: vm.disk.clone(),
            computer_name: vm.name.clone(),
            admin_username: opts.username.clone(),
            ssh_key_path: format!("/home/{}/.ssh/authorized_keys", opts.username),
            ssh_key_data: opts.ssh_key.clone(),
            nic_id,
        };
        info!("Creating VM {} in {}", vm.name, rg);
        self.compute.create_vm(&rg, &vm.name, &params).await
    }
}

fn push_err(errors: &mut Vec<Error>, result: Result<()>, what: &str) {
    if let Err(e) = ignore_not_found(result, what) {
        errors.push(e.context(format!("deleting {}", what)));
    }
}

#[async_trait]
impl AzureStorage for AzureClient {
    async fn resource_group_location(&self, resource_group: &str) -> Result<String> {
        self.resources.resource_group_location(resource_group).await
    }

    async fn find_resource_by_tag(
        &self,
        resource_group: &str,
        tag: &Tag,
    ) -> Result<Option<String>> {
        let names = self
            .resources
            .list_resources(resource_group, &tag.filter())
            .await?;
        Ok(names.into_iter().next())
    }

    async fn create_storage_account(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
        tag: &Tag,
    ) -> Result<()> {
        let location = self.resolve_location(resource_group, location).await?;
        info!("Creating storage account {} in {}", name, location);
        self.resources
            .create_storage_account(resource_group, name, &location, tag)
            .await
    }

    async fn storage_account_key(&self, resource_group: &str, account: &str) -> Result<String> {
        self.resources
            .list_storage_account_keys(resource_group, account)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("storage account {} has no keys", account)))
    }

    async fn ensure_container(&self, account: &StorageAccount, container: &str) -> Result<()> {
        if self
            .blobs
            .container_exists(&account.name, &account.key, container)
            .await?
        {
            debug!("Container {} already exists in {}", container, account.name);
            return Ok(());
        }
        self.blobs
            .create_container(&account.name, &account.key, container)
            .await
    }

    async fn create_page_blob(
        &self,
        account: &StorageAccount,
        container: &str,
        blob: &str,
        local: &Path,
        concurrency: usize,
    ) -> Result<BlobRef> {
        info!(
            "Uploading {} to {}/{}/{}",
            local.display(),
            account.name,
            container,
            blob
        );
        self.blobs
            .upload_page_blob(
                &account.name,
                &account.key,
                container,
                blob,
                local,
                concurrency.max(1),
            )
            .await?;
        Ok(BlobRef::new(&account.name, container, blob))
    }

    async fn delete_blob(
        &self,
        account: &StorageAccount,
        container: &str,
        blob: &str,
    ) -> Result<()> {
        self.blobs
            .delete_blob(&account.name, &account.key, container, blob)
            .await
    }
}

#[async_trait]
impl AzureImage for AzureClient {
    async fn register_image(
        &self,
        resource_group: &str,
        blob: &BlobRef,
        name: &str,
        location: &str,
        hyper_v: HyperVGen,
    ) -> Result<String> {
        let location = self.resolve_location(resource_group, location).await?;
        let params = ImageParams {
            location,
            blob_uri: blob.uri(),
            hyper_v,
        };
        info!("Registering image {} from {}", name, params.blob_uri);
        self.compute.create_image(resource_group, name, &params).await
    }

    async fn register_gallery_image(
        &self,
        resource_group: &str,
        blob: &BlobRef,
        name: &str,
        location: &str,
        hyper_v: HyperVGen,
        arch: Arch,
    ) -> Result<GalleryImage> {
        let architecture = arch.azure_name()?;
        let location = self.resolve_location(resource_group, location).await?;

        let gallery = gallery_name(name);
        let definition = gallery_image_name(name);
        let image = GalleryImage {
            resource_group: resource_group.to_string(),
            image_ref: gallery_image_version_id(
                &self.subscription,
                resource_group,
                &gallery,
                &definition,
                GALLERY_IMAGE_VERSION,
            ),
            gallery,
            image_definition: definition,
            version: GALLERY_IMAGE_VERSION.to_string(),
            intermediate_image: intermediate_image_name(name),
        };

        match self
            .create_gallery_resources(&image, blob, &location, hyper_v, architecture)
            .await
        {
            Ok(()) => Ok(image),
            Err(e) => {
                warn!("Gallery image registration failed, removing partial resources");
                match self.delete_gallery_image(&image).await {
                    Ok(()) => Err(e),
                    Err(cleanup) => Err(Error::join(e, cleanup)),
                }
            }
        }
    }

    async fn delete_image(&self, resource_group: &str, name: &str) -> Result<()> {
        self.compute.delete_image(resource_group, name).await
    }

    async fn delete_gallery_image(&self, image: &GalleryImage) -> Result<()> {
        let rg = image.resource_group.as_str();
        let mut errors = Vec::new();

        push_err(
            &mut errors,
            self.compute
                .delete_gallery_image_version(
                    rg,
                    &image.gallery,
                    &image.image_definition,
                    &image.version,
                )
                .await,
            &format!("gallery image version {}", image.version),
        );
        push_err(
            &mut errors,
            self.compute
                .delete_gallery_image(rg, &image.gallery, &image.image_definition)
                .await,
            &format!("gallery image {}", image.image_definition),
        );
        push_err(
            &mut errors,
            self.compute.delete_gallery(rg, &image.gallery).await,
            &format!("gallery {}", image.gallery),
        );
        push_err(
            &mut errors,
            self.compute.delete_image(rg, &image.intermediate_image).await,
            &format!("image {}", image.intermediate_image),
        );

        Error::from_list(errors)
    }
}

#[async_trait]
impl AzureVm for AzureClient {
    async fn create_vm(&self, resource_group: &str, opts: &VmOptions) -> Result<VmRecord> {
        let location = self.resources.resource_group_location(resource_group).await?;
        let mut vm = VmRecord::planned(resource_group, &opts.name);

        match self.create_vm_resources(&mut vm, opts, &location).await {
            Ok(()) => Ok(vm),
            Err(e) => {
                warn!("Creating VM {} failed, removing partial resources", vm.name);
                match self.destroy_vm(&vm).await {
                    Ok(()) => Err(e),
                    Err(cleanup) => Err(Error::join(e, cleanup)),
                }
            }
        }
    }

    async fn destroy_vm(&self, vm: &VmRecord) -> Result<()> {
        let rg = vm.resource_group.as_str();
        let mut errors = Vec::new();

        info!("Destroying VM {}", vm.name);
        push_err(
            &mut errors,
            self.compute.delete_vm(rg, &vm.name).await,
            &format!("vm {}", vm.name),
        );
        push_err(
            &mut errors,
            self.compute.delete_disk(rg, &vm.disk).await,
            &format!("disk {}", vm.disk),
        );
        push_err(
            &mut errors,
            self.network.delete_nic(rg, &vm.nic).await,
            &format!("network interface {}", vm.nic),
        );
        push_err(
            &mut errors,
            self.network.delete_security_group(rg, &vm.security_group).await,
            &format!("security group {}", vm.security_group),
        );
        push_err(
            &mut errors,
            self.network.delete_public_ip(rg, &vm.public_ip).await,
            &format!("public ip {}", vm.public_ip),
        );
        push_err(
            &mut errors,
            self.network.delete_subnet(rg, &vm.vnet, &vm.subnet).await,
            &format!("subnet {}", vm.subnet),
        );
        push_err(
            &mut errors,
            self.network.delete_vnet(rg, &vm.vnet).await,
            &format!("vnet {}", vm.vnet),
        );

        Error::from_list(errors)
    }
}
