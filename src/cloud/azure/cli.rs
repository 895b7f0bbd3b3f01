// src/cloud/azure/cli.rs

//! Raw Azure operations through the `az` command-line tool
//!
//! Login state lives in a private temporary `AZURE_CONFIG_DIR`, so the
//! user's own `az` session is neither used nor modified. Storage account
//! keys travel through the environment, never the command line.

use super::arm::{
    ArmBlobs, ArmCompute, ArmNetwork, ArmResources, GalleryImageParams,
    GalleryImageVersionParams, ImageParams, NicParams, PublicIp, SecurityRule, VmParams,
};
use super::Tag;
use crate::error::{Error, Result};
use crate::runner::{resolve_program, ProcessOutput, Runner};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};
use url::Url;

const MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
const RESOURCES_API_VERSION: &str = "2021-04-01";

const NOT_FOUND_MARKERS: &[&str] = &[
    "NotFound",
    "was not found",
    "could not be found",
    "does not exist",
];

/// Service principal credentials
#[derive(Clone)]
pub struct AzCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub tenant: String,
}

impl std::fmt::Debug for AzCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzCredentials")
            .field("client_id", &self.client_id)
            .field("tenant", &self.tenant)
            .finish_non_exhaustive()
    }
}

/// Logged-in `az` session bound to one subscription
#[derive(Debug)]
pub struct AzCli {
    program: PathBuf,
    subscription: String,
    config_dir: TempDir,
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn string_at(value: &Value, pointer: &str) -> Result<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::ParseError(format!("az output has no {}", pointer)))
}

impl AzCli {
    /// Log in as a service principal and select `subscription`
    pub async fn login(credentials: &AzCredentials, subscription: &str) -> Result<Self> {
        Self::login_with(resolve_program("az")?, credentials, subscription).await
    }

    pub async fn login_with(
        program: impl Into<PathBuf>,
        credentials: &AzCredentials,
        subscription: &str,
    ) -> Result<Self> {
        let cli = Self {
            program: program.into(),
            subscription: subscription.to_string(),
            config_dir: tempfile::Builder::new().prefix("osimage-az-").tempdir()?,
        };

        info!("Logging in to Azure as {}", credentials.client_id);
        cli.call(args([
            "login",
            "--service-principal",
            "--username",
            &credentials.client_id,
            "--password",
            &credentials.client_secret,
            "--tenant",
            &credentials.tenant,
        ]))
        .await?;
        cli.call(args(["account", "set", "--subscription", subscription]))
            .await?;
        Ok(cli)
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    fn runner(&self, args: Vec<String>) -> Runner {
        Runner::new(&self.program)
            .args(args)
            .args(["--output", "json", "--only-show-errors"])
            .env("AZURE_CONFIG_DIR", self.config_dir.path())
            .env("AZURE_CORE_COLLECT_TELEMETRY", "false")
    }

    fn check(runner: &Runner, output: ProcessOutput) -> Result<ProcessOutput> {
        if output.success() {
            return Ok(output);
        }
        let stderr = output.stderr_str().trim().to_string();
        if NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m)) {
            return Err(Error::NotFound(stderr));
        }
        Err(Error::CloudError(format!("{} failed: {}", runner.display(), stderr)))
    }

    async fn run(&self, runner: Runner) -> Result<ProcessOutput> {
        let output = runner.run(None).await?;
        Self::check(&runner, output)
    }

    async fn call(&self, args: Vec<String>) -> Result<ProcessOutput> {
        self.run(self.runner(args)).await
    }

    async fn call_json(&self, args: Vec<String>) -> Result<Value> {
        let output = self.call(args).await?;
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::ParseError(format!("decoding az output failed: {}", e)))
    }

    /// Storage data-plane command authenticated with an account key
    async fn call_storage(&self, account: &str, key: &str, args: Vec<String>) -> Result<Value> {
        let runner = self
            .runner(args)
            .env("AZURE_STORAGE_ACCOUNT", account)
            .env("AZURE_STORAGE_KEY", key);
        let output = self.run(runner).await?;
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[async_trait]
impl ArmResources for AzCli {
    async fn resource_group_location(&self, resource_group: &str) -> Result<String> {
        let group = self
            .call_json(args(["group", "show", "--name", resource_group]))
            .await?;
        string_at(&group, "/location")
    }

    async fn list_resources(&self, resource_group: &str, filter: &str) -> Result<Vec<String>> {
        let url = Url::parse_with_params(
            &format!(
                "{}/subscriptions/{}/resourceGroups/{}/resources",
                MANAGEMENT_ENDPOINT, self.subscription, resource_group
            ),
            &[("$filter", filter), ("api-version", RESOURCES_API_VERSION)],
        )
        .map_err(|e| Error::ParseError(format!("invalid resource list URL: {}", e)))?;

        let listed = self
            .call_json(args(["rest", "--method", "get", "--url", url.as_str()]))
            .await?;
        Ok(listed
            .get("value")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_storage_account(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
        tag: &Tag,
    ) -> Result<()> {
        let tag = format!("{}={}", tag.name, tag.value);
        self.call(args([
            "storage",
            "account",
            "create",
            "--resource-group",
            resource_group,
            "--name",
            name,
            "--location",
            location,
            "--sku",
            "Standard_LRS",
            "--kind",
            "StorageV2",
            "--tags",
            &tag,
        ]))
        .await
        .map(|_| ())
    }

    async fn list_storage_account_keys(
        &self,
        resource_group: &str,
        account: &str,
    ) -> Result<Vec<String>> {
        let keys = self
            .call_json(args([
                "storage",
                "account",
                "keys",
                "list",
                "--resource-group",
                resource_group,
                "--account-name",
                account,
            ]))
            .await?;
        Ok(keys
            .as_array()
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| k.get("value").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ArmBlobs for AzCli {
    async fn container_exists(&self, account: &str, key: &str, container: &str) -> Result<bool> {
        let exists = self
            .call_storage(
                account,
                key,
                args(["storage", "container", "exists", "--name", container]),
            )
            .await?;
        Ok(exists.get("exists").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn create_container(&self, account: &str, key: &str, container: &str) -> Result<()> {
        self.call_storage(
            account,
            key,
            args(["storage", "container", "create", "--name", container]),
        )
        .await
        .map(|_| ())
    }

    async fn upload_page_blob(
        &self,
        account: &str,
        key: &str,
        container: &str,
        blob: &str,
        local: &Path,
        concurrency: usize,
    ) -> Result<()> {
        let file = local.to_string_lossy();
        let connections = concurrency.to_string();
        debug!("Uploading {} with {} connections", file, connections);
        self.call_storage(
            account,
            key,
            args([
                "storage",
                "blob",
                "upload",
                "--container-name",
                container,
                "--name",
                blob,
                "--file",
                &file,
                "--type",
                "page",
                "--max-connections",
                &connections,
                "--overwrite",
            ]),
        )
        .await
        .map(|_| ())
    }

    async fn delete_blob(
        &self,
        account: &str,
        key: &str,
        container: &str,
        blob: &str,
    ) -> Result<()> {
        self.call_storage(
            account,
            key,
            args([
                "storage",
                "blob",
                "delete",
                "--container-name",
                container,
                "--name",
                blob,
            ]),
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl ArmCompute for AzCli {
    async fn create_image(
        &self,
        resource_group: &str,
        name: &str,
        params: &ImageParams,
    ) -> Result<String> {
        let image = self
            .call_json(args([
                "image",
                "create",
                "--resource-group",
                resource_group,
                "--name",
                name,
                "--location",
                &params.location,
                "--source",
                &params.blob_uri,
                "--os-type",
                "Linux",
                "--hyper-v-generation",
                params.hyper_v.as_str(),
            ]))
            .await?;
        string_at(&image, "/id")
    }

    async fn delete_image(&self, resource_group: &str, name: &str) -> Result<()> {
        self.call(args([
            "image",
            "delete",
            "--resource-group",
            resource_group,
            "--name",
            name,
        ]))
        .await
        .map(|_| ())
    }

    async fn create_gallery(&self, resource_group: &str, name: &str, location: &str) -> Result<()> {
        self.call(args([
            "sig",
            "create",
            "--resource-group",
            resource_group,
            "--gallery-name",
            name,
            "--location",
            location,
        ]))
        .await
        .map(|_| ())
    }

    async fn delete_gallery(&self, resource_group: &str, name: &str) -> Result<()> {
        self.call(args([
            "sig",
            "delete",
            "--resource-group",
            resource_group,
            "--gallery-name",
            name,
        ]))
        .await
        .map(|_| ())
    }

    async fn create_gallery_image(
        &self,
        resource_group: &str,
        gallery: &str,
        name: &str,
        params: &GalleryImageParams,
    ) -> Result<()> {
        self.call(args([
            "sig",
            "image-definition",
            "create",
            "--resource-group",
            resource_group,
            "--gallery-name",
            gallery,
            "--gallery-image-definition",
            name,
            "--location",
            &params.location,
            "--publisher",
            &params.publisher,
            "--offer",
            &params.offer,
            "--sku",
            &params.sku,
            "--architecture",
            &params.architecture,
            "--hyper-v-generation",
            params.hyper_v.as_str(),
            "--os-type",
            "Linux",
            "--os-state",
            "Generalized",
        ]))
        .await
        .map(|_| ())
    }

    async fn delete_gallery_image(
        &self,
        resource_group: &str,
        gallery: &str,
        name: &str,
    ) -> Result<()> {
        self.call(args([
            "sig",
            "image-definition",
            "delete",
            "--resource-group",
            resource_group,
            "--gallery-name",
            gallery,
            "--gallery-image-definition",
            name,
        ]))
        .await
        .map(|_| ())
    }

    async fn create_gallery_image_version(
        &self,
        resource_group: &str,
        gallery: &str,
        image: &str,
        version: &str,
        params: &GalleryImageVersionParams,
    ) -> Result<()> {
        let mut cmd = args([
            "sig",
            "image-version",
            "create",
            "--resource-group",
            resource_group,
            "--gallery-name",
            gallery,
            "--gallery-image-definition",
            image,
            "--gallery-image-version",
            version,
            "--location",
            &params.location,
            "--managed-image",
            &params.source_image_id,
            "--target-regions",
        ]);
        cmd.extend(params.target_regions.iter().cloned());
        self.call(cmd).await.map(|_| ())
    }

    async fn delete_gallery_image_version(
        &self,
        resource_group: &str,
        gallery: &str,
        image: &str,
        version: &str,
    ) -> Result<()> {
        self.call(args([
            "sig",
            "image-version",
            "delete",
            "--resource-group",
            resource_group,
            "--gallery-name",
            gallery,
            "--gallery-image-definition",
            image,
            "--gallery-image-version",
            version,
        ]))
        .await
        .map(|_| ())
    }

    async fn create_vm(&self, resource_group: &str, name: &str, params: &VmParams) -> Result<()> {
        self.call(args([
            "vm",
            "create",
            "--resource-group",
            resource_group,
            "--name",
            name,
            "--location",
            &params.location,
            "--image",
            &params.image_id,
            "--size",
            &params.size,
            "--nics",
            &params.nic_id,
            "--os-disk-name",
            &params.disk_name,
            "--os-disk-caching",
            "ReadWrite",
            "--storage-sku",
            "Standard_LRS",
            "--computer-name",
            &params.computer_name,
            "--admin-username",
            &params.admin_username,
            "--authentication-type",
            "ssh",
            "--ssh-key-values",
            &params.ssh_key_data,
            "--ssh-dest-key-path",
            &params.ssh_key_path,
        ]))
        .await
        .map(|_| ())
    }

    async fn delete_vm(&self, resource_group: &str, name: &str) -> Result<()> {
        self.call(args([
            "vm",
            "delete",
            "--resource-group",
            resource_group,
            "--name",
            name,
            "--yes",
        ]))
        .await
        .map(|_| ())
    }

    async fn delete_disk(&self, resource_group: &str, name: &str) -> Result<()> {
        self.call(args([
            "disk",
            "delete",
            "--resource-group",
            resource_group,
            "--name",
            name,
            "--yes",
        ]))
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl ArmNetwork for AzCli {
    async fn create_vnet(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
        address_prefix: &str,
    ) -> Result<String> {
        let vnet = self
            .call_json(args([
                "network",
                "vnet",
                "create",
                "--resource-group",
                resource_group,
                "--name",
                name,
                "--location",
                location,
                "--address-prefixes",
                address_prefix,
            ]))
            .await?;
        string_at(&vnet, "/newVNet/id")
    }

    async fn delete_vnet(&self, resource_group: &str, name: &str) -> Result<()> {
        self.call(args([
            "network",
            "vnet",
            "delete",
            "--resource-group",
            resource_group,
            "--name",
            name,
        ]))
        .await
        .map(|_| ())
    }

    async fn create_subnet(
        &self,
        resource_group: &str,
        vnet: &str,
        name: &str,
        address_prefix: &str,
    ) -> Result<String> {
        let subnet = self
            .call_json(args([
                "network",
                "vnet",
                "subnet",
                "create",
                "--resource-group",
                resource_group,
                "--vnet-name",
                vnet,
                "--name",
                name,
                "--address-prefixes",
                address_prefix,
            ]))
            .await?;
        string_at(&subnet, "/id")
    }

    async fn delete_subnet(&self, resource_group: &str, vnet: &str, name: &str) -> Result<()> {
        self.call(args([
            "network",
            "vnet",
            "subnet",
            "delete",
            "--resource-group",
            resource_group,
            "--vnet-name",
            vnet,
            "--name",
            name,
        ]))
        .await
        .map(|_| ())
    }

    async fn create_public_ip(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
    ) -> Result<PublicIp> {
        let ip = self
            .call_json(args([
                "network",
                "public-ip",
                "create",
                "--resource-group",
                resource_group,
                "--name",
                name,
                "--location",
                location,
                "--allocation-method",
                "Static",
            ]))
            .await?;
        Ok(PublicIp {
            id: string_at(&ip, "/publicIp/id")?,
            address: string_at(&ip, "/publicIp/ipAddress")?,
        })
    }

    async fn delete_public_ip(&self, resource_group: &str, name: &str) -> Result<()> {
        self.call(args([
            "network",
            "public-ip",
            "delete",
            "--resource-group",
            resource_group,
            "--name",
            name,
        ]))
        .await
        .map(|_| ())
    }

    async fn create_security_group(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
        rules: &[SecurityRule],
    ) -> Result<String> {
        let group = self
            .call_json(args([
                "network",
                "nsg",
                "create",
                "--resource-group",
                resource_group,
                "--name",
                name,
                "--location",
                location,
            ]))
            .await?;
        let id = string_at(&group, "/NewNSG/id")?;

        for rule in rules {
            let priority = rule.priority.to_string();
            self.call(args([
                "network",
                "nsg",
                "rule",
                "create",
                "--resource-group",
                resource_group,
                "--nsg-name",
                name,
                "--name",
                &rule.name,
                "--description",
                &rule.description,
                "--priority",
                &priority,
                "--protocol",
                &rule.protocol,
                "--access",
                "Allow",
                "--direction",
                "Inbound",
                "--source-address-prefixes",
                "*",
                "--source-port-ranges",
                "*",
                "--destination-address-prefixes",
                "*",
                "--destination-port-ranges",
                &rule.destination_port,
            ]))
            .await?;
        }
        Ok(id)
    }

    async fn delete_security_group(&self, resource_group: &str, name: &str) -> Result<()> {
        self.call(args([
            "network",
            "nsg",
            "delete",
            "--resource-group",
            resource_group,
            "--name",
            name,
        ]))
        .await
        .map(|_| ())
    }

    async fn create_nic(
        &self,
        resource_group: &str,
        name: &str,
        params: &NicParams,
    ) -> Result<String> {
        let nic = self
            .call_json(args([
                "network",
                "nic",
                "create",
                "--resource-group",
                resource_group,
                "--name",
                name,
                "--location",
                &params.location,
                "--subnet",
                &params.subnet_id,
                "--public-ip-address",
                &params.public_ip_id,
                "--network-security-group",
                &params.security_group_id,
            ]))
            .await?;
        string_at(&nic, "/NewNIC/id")
    }

    async fn delete_nic(&self, resource_group: &str, name: &str) -> Result<()> {
        self.call(args([
            "network",
            "nic",
            "delete",
            "--resource-group",
            resource_group,
            "--name",
            name,
        ]))
        .await
        .map(|_| ())
    }
}
