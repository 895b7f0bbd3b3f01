// src/cloud/azure/boot.rs

//! Boot an image on Azure for testing, and tear it down again
//!
//! ```text
//! setup:    RG location -> tagged storage account (created if missing)
//!           -> container -> page blob -> managed image (x86_64)
//!              or gallery image version (aarch64) -> VM
//! teardown: VM -> gallery image -> managed image -> blob
//! ```
//!
//! Every created resource lands in a [`ResourceRecord`] as soon as it
//! exists. A failed or cancelled setup tears the record down before
//! returning. The storage account is shared by every build in the resource
//! group and is never deleted.
//!
//! Cancellation is checked between provider steps, never inside one, so a
//! step either lands in the record or did not happen.

use super::{
    ensure_vhd_extension, managed_image_id, random_storage_account_name, AzureImage,
    AzureStorage, AzureVm, GalleryImage, HyperVGen, StorageAccount, Tag, VmOptions, VmRecord,
    DEFAULT_UPLOAD_CONCURRENCY, STORAGE_ACCOUNT_PREFIX, STORAGE_CONTAINER,
};
use crate::arch::Arch;
use crate::check::wait_until;
use crate::cloud::{ignore_not_found, save_json};
use crate::error::{Error, Result, ResultExt};
use crate::runner::{resolve_program, Runner};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_USERNAME: &str = "azure";
pub const DEFAULT_VM_NAME: &str = "vm-name";
pub const DEFAULT_IMAGE_NAME: &str = "image-name";
pub const DEFAULT_RESOURCE_FILE: &str = "resources.json";

const KEYSCAN_TIMEOUT: Duration = Duration::from_secs(300);
const KEYSCAN_INTERVAL: Duration = Duration::from_secs(10);

/// Resources created by a setup, handed to a later teardown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm: Option<VmRecord>,
    #[serde(rename = "galleryimage", default, skip_serializing_if = "Option::is_none")]
    pub gallery_image: Option<GalleryImage>,
    /// Blob name inside the shared container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
    /// Managed image name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl ResourceRecord {
    pub fn is_empty(&self) -> bool {
        self.vm.is_none()
            && self.gallery_image.is_none()
            && self.blob.is_none()
            && self.image.is_none()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data =
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))
    }

    /// Write the record atomically, pretty-printed
    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }
}

/// What [`AzureBoot::setup`] boots
#[derive(Debug, Clone)]
pub struct SetupOptions {
    /// Local VHD to upload; without it `image` must name an existing image
    pub local_image: Option<PathBuf>,
    /// Resource ID of an existing image
    pub image: Option<String>,
    /// Name of the uploaded blob and registered image
    pub image_name: String,
    pub vm_name: String,
    /// Defaults to the architecture's default size
    pub size: Option<String>,
    pub arch: Arch,
    pub username: String,
    /// Public key contents
    pub ssh_public_key: String,
}

/// SSH access to a booted VM
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub username: String,
    pub private_key: PathBuf,
}

/// Programs used to reach a booted VM
#[derive(Debug, Clone)]
pub struct SshTools {
    pub ssh: PathBuf,
    pub scp: PathBuf,
    pub keyscan: PathBuf,
}

impl SshTools {
    /// Look up `ssh`, `scp` and `ssh-keyscan` in `PATH`
    pub fn from_path() -> Result<Self> {
        Ok(Self {
            ssh: resolve_program("ssh")?,
            scp: resolve_program("scp")?,
            keyscan: resolve_program("ssh-keyscan")?,
        })
    }
}

/// Azure boot pipeline bound to one resource group
pub struct AzureBoot {
    storage: Arc<dyn AzureStorage>,
    images: Arc<dyn AzureImage>,
    vms: Arc<dyn AzureVm>,
    subscription: String,
    resource_group: String,
    container: String,
    concurrency: usize,
    token: CancellationToken,
    ssh_tools: Option<SshTools>,
}

impl AzureBoot {
    pub fn new<C>(
        client: Arc<C>,
        subscription: impl Into<String>,
        resource_group: impl Into<String>,
    ) -> Self
    where
        C: AzureStorage + AzureImage + AzureVm + 'static,
    {
        Self {
            storage: client.clone(),
            images: client.clone(),
            vms: client,
            subscription: subscription.into(),
            resource_group: resource_group.into(),
            container: STORAGE_CONTAINER.to_string(),
            concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            token: CancellationToken::new(),
            ssh_tools: None,
        }
    }

    /// Stop setup and remote runs when `token` is cancelled; what was
    /// created so far is torn down
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Use these programs instead of the ones in `PATH`
    pub fn with_ssh_tools(mut self, tools: SshTools) -> Self {
        self.ssh_tools = Some(tools);
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    fn checkpoint(&self, step: &str) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled(format!(
                "Azure setup cancelled before {}",
                step
            )));
        }
        Ok(())
    }

    /// The shared storage account of the resource group's location, if any
    async fn storage_account(&self, location: &str) -> Result<Option<StorageAccount>> {
        let tag = Tag::storage_account(location);
        let Some(name) = self
            .storage
            .find_resource_by_tag(&self.resource_group, &tag)
            .await?
        else {
            return Ok(None);
        };
        let key = self
            .storage
            .storage_account_key(&self.resource_group, &name)
            .await?;
        Ok(Some(StorageAccount { name, key }))
    }

    /// Upload `local` and register it; returns the image reference to boot
    pub async fn upload(
        &self,
        local: &Path,
        remote_name: &str,
        arch: Arch,
        res: &mut ResourceRecord,
    ) -> Result<String> {
        let rg = self.resource_group.as_str();
        let location = self.storage.resource_group_location(rg).await?;

        let account = match self.storage_account(&location).await? {
            Some(account) => account,
            None => {
                let name = random_storage_account_name(STORAGE_ACCOUNT_PREFIX);
                let tag = Tag::storage_account(&location);
                self.storage
                    .create_storage_account(rg, &name, &location, &tag)
                    .await?;
                let key = self.storage.storage_account_key(rg, &name).await?;
                StorageAccount { name, key }
            }
        };
        debug!("Using storage account {}", account.name);

        self.checkpoint("creating the container")?;
        self.storage
            .ensure_container(&account, &self.container)
            .await?;

        self.checkpoint("uploading the image")?;
        let blob_name = ensure_vhd_extension(remote_name);
        res.blob = Some(blob_name.clone());
        let blob = self
            .storage
            .create_page_blob(&account, &self.container, &blob_name, local, self.concurrency)
            .await?;

        self.checkpoint("registering the image")?;
        match arch {
            Arch::X86_64 => {
                self.images
                    .register_image(rg, &blob, remote_name, &location, HyperVGen::V2)
                    .await?;
                res.image = Some(remote_name.to_string());
                Ok(managed_image_id(&self.subscription, rg, remote_name))
            }
            Arch::Aarch64 => {
                let gallery_image = self
                    .images
                    .register_gallery_image(
                        rg,
                        &blob,
                        remote_name,
                        &location,
                        HyperVGen::V2,
                        arch,
                    )
                    .await?;
                let image_ref = gallery_image.image_ref.clone();
                res.gallery_image = Some(gallery_image);
                Ok(image_ref)
            }
            other => Err(Error::InvalidArch(format!(
                "unknown architecture {:?}",
                other.as_str()
            ))),
        }
    }

    async fn do_setup(&self, opts: &SetupOptions, res: &mut ResourceRecord) -> Result<()> {
        self.checkpoint("uploading the image")?;
        let image = match (&opts.local_image, &opts.image) {
            (Some(local), _) => self.upload(local, &opts.image_name, opts.arch, res).await?,
            (None, Some(image)) => image.clone(),
            (None, None) => {
                return Err(Error::ConfigError(
                    "either a local image or an existing image is required".to_string(),
                ));
            }
        };

        let size = match &opts.size {
            Some(size) if !size.is_empty() => size.clone(),
            _ => opts.arch.azure_default_vm_size()?.to_string(),
        };

        self.checkpoint("creating the VM")?;
        let vm = self
            .vms
            .create_vm(
                &self.resource_group,
                &VmOptions {
                    name: opts.vm_name.clone(),
                    image,
                    size,
                    username: opts.username.clone(),
                    ssh_key: opts.ssh_public_key.clone(),
                },
            )
            .await?;
        info!("VM {} has IP address {}", vm.name, vm.ip_address);
        res.vm = Some(vm);
        Ok(())
    }

    /// Create everything in `opts`; on failure or cancellation tear down
    /// what was created
    ///
    /// After a successful rollback `res` is empty again; after a failed one
    /// it still lists what may remain.
    pub async fn setup(&self, opts: &SetupOptions, res: &mut ResourceRecord) -> Result<()> {
        let done = self.do_setup(opts, res).await;
        let err = match done.and_then(|()| self.checkpoint("handing over the VM")) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        warn!("Setup failed, tearing down resources: {}", err);
        match self.teardown(res).await {
            Ok(()) => {
                *res = ResourceRecord::default();
                Err(err)
            }
            Err(cleanup) => Err(Error::join(
                err,
                cleanup.context("failed to tear down resources"),
            )),
        }
    }

    async fn delete_blob(&self, blob: &str) -> Result<()> {
        let location = self
            .storage
            .resource_group_location(&self.resource_group)
            .await?;
        let Some(account) = self.storage_account(&location).await? else {
            // Without the storage account the blob is gone too
            info!("No storage account for {}, skipping blob {}", location, blob);
            return Ok(());
        };
        self.storage
            .delete_blob(&account, &self.container, blob)
            .await
    }

    /// Delete every resource in `res`: VM, gallery image, managed image and
    /// blob
    ///
    /// Every step runs regardless of earlier failures and missing resources
    /// count as deleted, so tearing down the same record twice succeeds.
    pub async fn teardown(&self, res: &ResourceRecord) -> Result<()> {
        let mut errors = Vec::new();

        if let Some(vm) = &res.vm {
            if let Err(e) = ignore_not_found(self.vms.destroy_vm(vm).await, &vm.name) {
                errors.push(e.context(format!("destroying vm {}", vm.name)));
            }
        }

        if let Some(gallery_image) = &res.gallery_image {
            let deleted = self.images.delete_gallery_image(gallery_image).await;
            if let Err(e) = ignore_not_found(deleted, &gallery_image.gallery) {
                errors.push(e.context(format!(
                    "deleting gallery image {}",
                    gallery_image.image_ref
                )));
            }
        }

        if let Some(image) = &res.image {
            let deleted = self.images.delete_image(&self.resource_group, image).await;
            if let Err(e) = ignore_not_found(deleted, image) {
                errors.push(e.context(format!("deleting image {}", image)));
            }
        }

        if let Some(blob) = &res.blob {
            if let Err(e) = ignore_not_found(self.delete_blob(blob).await, blob) {
                errors.push(e.context(format!("deleting blob {}", blob)));
            }
        }

        Error::from_list(errors)
    }

    /// Set up, run `command` on the VM (see [`run_remote`]), and always
    /// tear down
    ///
    /// Cancellation stops the remote run and goes straight to teardown.
    pub async fn run(
        &self,
        opts: &SetupOptions,
        ssh: &SshOptions,
        command: &[String],
        status: &mut dyn Write,
    ) -> Result<()> {
        let mut res = ResourceRecord::default();
        self.setup(opts, &mut res).await?;

        let ran = match res.vm.as_ref() {
            Some(vm) => tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    Err(Error::Cancelled(format!("run on VM {} was cancelled", vm.name)))
                }
                ran = self.run_on_vm(&vm.ip_address, ssh, command, status) => ran,
            },
            None => Err(Error::InternalError("setup created no VM".to_string())),
        };
        if let Err(e) = &ran {
            warn!("Run failed, tearing down resources: {}", e);
        }

        match (ran, self.teardown(&res).await) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(cleanup)) => Err(cleanup),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => Err(Error::join(e, cleanup)),
        }
    }

    async fn run_on_vm(
        &self,
        ip: &str,
        ssh: &SshOptions,
        command: &[String],
        status: &mut dyn Write,
    ) -> Result<()> {
        let tools = match &self.ssh_tools {
            Some(tools) => tools.clone(),
            None => SshTools::from_path()?,
        };
        run_remote(&tools, ip, ssh, command, status).await
    }
}

async fn keyscan(program: &Path, ip: &str) -> Result<Option<Vec<u8>>> {
    let output = Runner::new(program).arg(ip).run(None).await?;
    if output.success() && !output.stdout.is_empty() {
        return Ok(Some(output.stdout));
    }
    debug!("ssh-keyscan {} not ready: {}", ip, output.stderr_str().trim());
    Ok(None)
}

/// Run `command` on the VM at `ip`
///
/// Every argument naming an existing local file is copied to the remote
/// home directory and replaced by its base name; other arguments pass
/// through unchanged. The first argument is then run as `./<arg>`.
pub async fn run_remote(
    tools: &SshTools,
    ip: &str,
    ssh: &SshOptions,
    command: &[String],
    status: &mut dyn Write,
) -> Result<()> {
    if command.is_empty() {
        return Err(Error::ConfigError("no executable given".to_string()));
    }

    let keyscan_program = tools.keyscan.as_path();
    let host_keys = wait_until(KEYSCAN_TIMEOUT, KEYSCAN_INTERVAL, || {
        keyscan(keyscan_program, ip)
    })
    .await
    .with_context(|| format!("scanning host keys of {}", ip))?;

    let known_hosts = tempfile::NamedTempFile::new()?;
    std::fs::write(known_hosts.path(), &host_keys)?;
    let known_hosts_opt = format!("UserKnownHostsFile={}", known_hosts.path().display());
    let key = ssh.private_key.as_os_str();

    let ssh_cmd = || {
        Runner::new(&tools.ssh)
            .arg("-i")
            .arg(key)
            .args(["-o", known_hosts_opt.as_str(), "-l", ssh.username.as_str(), ip])
    };

    ssh_cmd().arg("exit").run_checked(None).await?;
    writeln!(status, "Connected to {}", ip)?;

    let mut remote = Vec::with_capacity(command.len());
    for arg in command {
        let path = Path::new(arg);
        let name = match path.file_name() {
            Some(name) if path.is_file() => name.to_string_lossy().into_owned(),
            _ => {
                remote.push(arg.clone());
                continue;
            }
        };
        let dest = format!("{}@{}:{}", ssh.username, ip, name);
        Runner::new(&tools.scp)
            .arg("-i")
            .arg(key)
            .args(["-o", known_hosts_opt.as_str(), "--"])
            .arg(path)
            .arg(&dest)
            .run_checked(None)
            .await?;
        writeln!(status, "Copied {} to {}", path.display(), dest)?;
        remote.push(name);
    }
    remote[0] = format!("./{}", remote[0]);

    info!("Running {} on {}", remote.join(" "), ip);
    let output = ssh_cmd().args(&remote).run_checked(None).await?;
    status.write_all(&output.stdout)?;
    Ok(())
}
