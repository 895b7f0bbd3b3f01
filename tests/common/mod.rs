// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! - [`FakeHelper`]: a `/bin/sh` depsolve helper that records its requests
//! - [`FakeAws`]: in-memory S3/EC2 implementing every AWS capability trait
//! - [`FakeArm`]: in-memory ARM provider recording every call in order

#![allow(dead_code)]

use async_trait::async_trait;
use osimage::cloud::aws::{
    BlobUploader, ComputeImages, ComputeVm, Grant, Image, ImageFilter, ImageReader,
    ImportSnapshotRequest, ImportSnapshotTask, Instance, ObjectAcl, ObjectStore, Presigner,
    RegisterImageRequest, RunInstancesRequest, Tag, UploadOutput,
};
use osimage::cloud::azure::arm::{
    ArmBlobs, ArmCompute, ArmNetwork, ArmResources, GalleryImageParams,
    GalleryImageVersionParams, ImageParams, NicParams, PublicIp, SecurityRule, VmParams,
};
use osimage::cloud::azure::Tag as AzureTag;
use osimage::{Error, RepoConfig, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// Write an executable `/bin/sh` script
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn baseos() -> RepoConfig {
    RepoConfig::with_base_url("baseos", "https://example.com/baseos")
}

pub fn appstream() -> RepoConfig {
    RepoConfig::with_base_url("appstream", "https://example.com/appstream")
}

/// How the fake helper answers the `api-versions` probe
#[derive(Debug, Clone, Copy)]
pub enum Probe {
    /// Answer `{"api_versions":[1,2]}`
    V2,
    /// Answer `{"api_versions":[1]}`
    V1Only,
    /// Exit non-zero with a helper error
    Reject,
}

/// A depsolve helper script with a canned answer
///
/// Every non-probe request is stored in `request.json`, the probe in
/// `probe.json`. The answer is read from `response.json`.
pub struct FakeHelper {
    pub dir: TempDir,
    pub program: PathBuf,
}

impl FakeHelper {
    pub fn new(probe: Probe, response: &str, stderr: &str, exit_code: i32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().display().to_string();
        std::fs::write(dir.path().join("response.json"), response).unwrap();
        std::fs::write(dir.path().join("stderr.txt"), stderr).unwrap();

        let probe_answer = match probe {
            Probe::V2 => r#"printf '%s' '{"api_versions":[1,2]}'; exit 0"#.to_string(),
            Probe::V1Only => r#"printf '%s' '{"api_versions":[1]}'; exit 0"#.to_string(),
            Probe::Reject => {
                r#"printf '%s' '{"kind":"InvalidRequest","reason":"unknown command"}'; exit 1"#
                    .to_string()
            }
        };
        let body = format!(
            r#"input=$(cat)
case "$input" in
  *'"command":"api-versions"'*)
    printf '%s' "$input" > "{root}/probe.json"
    {probe_answer}
    ;;
esac
printf '%s' "$input" > "{root}/request.json"
cat "{root}/stderr.txt" >&2
cat "{root}/response.json"
exit {exit_code}
"#
        );
        let program = write_script(dir.path(), "depsolve-helper", &body);
        Self { dir, program }
    }

    /// The last non-probe request, if the helper was called
    pub fn request(&self) -> Option<Value> {
        let data = std::fs::read(self.dir.path().join("request.json")).ok()?;
        Some(serde_json::from_slice(&data).unwrap())
    }

    pub fn probed(&self) -> bool {
        self.dir.path().join("probe.json").exists()
    }
}

// =============================================================================
// AWS
// =============================================================================

#[derive(Default)]
struct AwsState {
    objects: HashSet<String>,
    /// Images, snapshots, security groups and instances by ID
    live: HashSet<String>,
    next_id: u32,
}

/// In-memory S3 and EC2
///
/// Operations named in `fail_on` return a cloud error. Deleting something
/// that does not exist returns `NotFound`.
pub struct FakeAws {
    pub regions: Vec<String>,
    pub buckets: Vec<String>,
    pub grants: Vec<Grant>,
    pub fail_on: HashSet<&'static str>,
    pub calls: Mutex<Vec<String>>,
    pub uploaded_bytes: Mutex<usize>,
    state: Mutex<AwsState>,
}

impl Default for FakeAws {
    fn default() -> Self {
        Self {
            regions: vec!["us-east-1".to_string()],
            buckets: vec!["b".to_string()],
            grants: vec![Grant {
                grantee: Some("owner".to_string()),
                permission: "WRITE".to_string(),
            }],
            fail_on: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            uploaded_bytes: Mutex::new(0),
            state: Mutex::new(AwsState::default()),
        }
    }
}

impl FakeAws {
    /// Make every operation in `ops` fail
    pub fn failing_on(mut self, ops: &[&'static str]) -> Self {
        self.fail_on.extend(ops.iter().copied());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose name starts with `prefix`
    pub fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn objects(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.iter().cloned().collect()
    }

    pub fn live_resources(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    fn record(&self, op: &'static str, detail: String) -> Result<()> {
        self.calls.lock().unwrap().push(format!("{} {}", op, detail));
        if self.fail_on.contains(op) {
            return Err(Error::CloudError(format!("{} failed", op)));
        }
        Ok(())
    }

    /// Allocate an ID and mark it live
    fn create(&self, prefix: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("{}-{:04}", prefix, state.next_id);
        state.live.insert(id.clone());
        id
    }

    fn remove(&self, id: &str) -> Result<()> {
        if self.state.lock().unwrap().live.remove(id) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("{} does not exist", id)))
        }
    }
}

#[async_trait]
impl ObjectStore for FakeAws {
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.record("delete_object", format!("{}/{}", bucket, key))?;
        self.state.lock().unwrap().objects.remove(key);
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        self.record("list_buckets", String::new())?;
        Ok(self.buckets.clone())
    }

    async fn get_bucket_acl(&self, bucket: &str) -> Result<Vec<Grant>> {
        self.record("get_bucket_acl", bucket.to_string())?;
        Ok(self.grants.clone())
    }

    async fn put_object_acl(&self, bucket: &str, key: &str, acl: ObjectAcl) -> Result<()> {
        self.record("put_object_acl", format!("{}/{} {}", bucket, key, acl.as_str()))
    }
}

#[async_trait]
impl BlobUploader for FakeAws {
    async fn upload(&self, bucket: &str, key: &str, mut reader: ImageReader) -> Result<UploadOutput> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        *self.uploaded_bytes.lock().unwrap() += data.len();
        self.record("upload", format!("{}/{}", bucket, key))?;
        self.state.lock().unwrap().objects.insert(key.to_string());
        Ok(UploadOutput {
            location: format!("https://{}.s3.us-east-1.amazonaws.com/{}", bucket, key),
        })
    }
}

#[async_trait]
impl Presigner for FakeAws {
    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String> {
        self.record("presign_get", format!("{}/{}", bucket, key))?;
        Ok(format!(
            "https://{}.s3.amazonaws.com/{}?X-Amz-Expires={}",
            bucket,
            key,
            ttl.as_secs()
        ))
    }
}

#[async_trait]
impl ComputeImages for FakeAws {
    async fn describe_regions(&self) -> Result<Vec<String>> {
        self.record("describe_regions", String::new())?;
        Ok(self.regions.clone())
    }

    async fn import_snapshot(&self, request: &ImportSnapshotRequest) -> Result<String> {
        self.record("import_snapshot", format!("{}/{}", request.bucket, request.key))?;
        Ok("import-snap-1".to_string())
    }

    async fn describe_import_snapshot_tasks(
        &self,
        task_ids: &[String],
    ) -> Result<Vec<ImportSnapshotTask>> {
        self.record("describe_import_snapshot_tasks", task_ids.join(","))?;
        let snapshot = self.create("snap");
        Ok(vec![ImportSnapshotTask {
            task_id: task_ids[0].clone(),
            status: "completed".to_string(),
            status_message: None,
            snapshot_id: Some(snapshot),
        }])
    }

    async fn register_image(&self, request: &RegisterImageRequest) -> Result<String> {
        self.record(
            "register_image",
            format!("{} {} {}", request.name, request.architecture, request.snapshot_id),
        )?;
        Ok(self.create("ami"))
    }

    async fn copy_image(&self, name: &str, source_image_id: &str, source_region: &str)
        -> Result<String> {
        self.record("copy_image", format!("{} {} {}", name, source_image_id, source_region))?;
        Ok(self.create("ami"))
    }

    async fn describe_images(&self, filter: &ImageFilter) -> Result<Vec<Image>> {
        self.record("describe_images", format!("{:?}", filter))?;
        Ok(Vec::new())
    }

    async fn modify_image_attribute(&self, image_id: &str, add_launch_permissions: &[String])
        -> Result<()> {
        self.record(
            "modify_image_attribute",
            format!("{} {}", image_id, add_launch_permissions.join(",")),
        )
    }

    async fn modify_snapshot_attribute(
        &self,
        snapshot_id: &str,
        add_create_volume_permissions: &[String],
    ) -> Result<()> {
        self.record(
            "modify_snapshot_attribute",
            format!("{} {}", snapshot_id, add_create_volume_permissions.join(",")),
        )
    }

    async fn deregister_image(&self, image_id: &str) -> Result<()> {
        self.record("deregister_image", image_id.to_string())?;
        self.remove(image_id)
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.record("delete_snapshot", snapshot_id.to_string())?;
        self.remove(snapshot_id)
    }

    async fn create_tags(&self, resources: &[String], tags: &[Tag]) -> Result<()> {
        let tags: Vec<String> = tags.iter().map(|t| format!("{}={}", t.key, t.value)).collect();
        self.record("create_tags", format!("{} {}", resources.join(","), tags.join(",")))
    }
}

#[async_trait]
impl ComputeVm for FakeAws {
    async fn create_security_group(&self, name: &str, description: &str) -> Result<String> {
        self.record("create_security_group", format!("{} {}", name, description))?;
        Ok(self.create("sg"))
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        self.record("delete_security_group", group_id.to_string())?;
        self.remove(group_id)
    }

    async fn authorize_ingress(
        &self,
        group_id: &str,
        cidr: &str,
        from_port: u16,
        to_port: u16,
        protocol: &str,
    ) -> Result<()> {
        self.record(
            "authorize_ingress",
            format!("{} {} {}-{} {}", group_id, cidr, from_port, to_port, protocol),
        )
    }

    async fn run_instances(&self, request: &RunInstancesRequest) -> Result<Vec<Instance>> {
        self.record(
            "run_instances",
            format!("{} {} {}", request.image_id, request.instance_type, request.user_data),
        )?;
        Ok(vec![Instance {
            instance_id: self.create("i"),
            state: "pending".to_string(),
            public_ip: None,
        }])
    }

    async fn describe_instances(&self, instance_ids: &[String]) -> Result<Vec<Instance>> {
        self.record("describe_instances", instance_ids.join(","))?;
        Ok(instance_ids
            .iter()
            .map(|id| Instance {
                instance_id: id.clone(),
                state: "running".to_string(),
                public_ip: Some("203.0.113.10".to_string()),
            })
            .collect())
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()> {
        self.record("terminate_instances", instance_ids.join(","))?;
        for id in instance_ids {
            self.remove(id)?;
        }
        Ok(())
    }

    async fn wait_until_running(&self, instance_id: &str) -> Result<()> {
        self.record("wait_until_running", instance_id.to_string())
    }

    async fn wait_until_terminated(&self, instance_id: &str) -> Result<()> {
        self.record("wait_until_terminated", instance_id.to_string())
    }
}

// =============================================================================
// Azure
// =============================================================================

/// In-memory ARM provider
///
/// Every call is recorded as `"<operation> <name>"`. Created resources are
/// tracked by name; deleting an unknown one returns `NotFound`. Operations
/// named in `fail_on` return a cloud error. The operation given to
/// [`FakeArm::cancelling_on`] cancels its token once it has run.
pub struct FakeArm {
    pub location: String,
    pub storage_accounts: Mutex<HashMap<String, String>>,
    pub fail_on: HashSet<&'static str>,
    pub calls: Mutex<Vec<String>>,
    pub gallery_params: Mutex<Vec<GalleryImageParams>>,
    pub version_params: Mutex<Vec<GalleryImageVersionParams>>,
    pub vm_params: Mutex<Vec<VmParams>>,
    resources: Mutex<HashSet<String>>,
    cancel_on: Option<(&'static str, CancellationToken)>,
}

impl Default for FakeArm {
    fn default() -> Self {
        Self {
            location: "westeurope".to_string(),
            storage_accounts: Mutex::new(HashMap::new()),
            fail_on: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            gallery_params: Mutex::new(Vec::new()),
            version_params: Mutex::new(Vec::new()),
            vm_params: Mutex::new(Vec::new()),
            resources: Mutex::new(HashSet::new()),
            cancel_on: None,
        }
    }
}

impl FakeArm {
    /// A provider whose resource group already has a tagged storage account
    pub fn with_storage_account(name: &str) -> Self {
        let arm = Self::default();
        arm.storage_accounts
            .lock()
            .unwrap()
            .insert(name.to_string(), "c2VjcmV0".to_string());
        arm
    }

    pub fn failing_on(mut self, ops: &[&'static str]) -> Self {
        self.fail_on.extend(ops.iter().copied());
        self
    }

    pub fn cancelling_on(mut self, op: &'static str, token: CancellationToken) -> Self {
        self.cancel_on = Some((op, token));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded calls whose operation starts with `prefix`
    pub fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn live_resources(&self) -> Vec<String> {
        let mut live: Vec<String> = self.resources.lock().unwrap().iter().cloned().collect();
        live.sort();
        live
    }

    fn record(&self, op: &'static str, name: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("{} {}", op, name));
        if self.fail_on.contains(op) {
            return Err(Error::CloudError(format!("{} {} failed", op, name)));
        }
        if let Some((_, token)) = self.cancel_on.as_ref().filter(|(on, _)| *on == op) {
            token.cancel();
        }
        Ok(())
    }

    fn create(&self, op: &'static str, kind: &str, name: &str) -> Result<String> {
        self.record(op, name)?;
        let key = format!("{}/{}", kind, name);
        self.resources.lock().unwrap().insert(key.clone());
        Ok(format!("/fake/{}", key))
    }

    fn delete(&self, op: &'static str, kind: &str, name: &str) -> Result<()> {
        self.record(op, name)?;
        if self.resources.lock().unwrap().remove(&format!("{}/{}", kind, name)) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("{} {} was not found", kind, name)))
        }
    }
}

#[async_trait]
impl ArmResources for FakeArm {
    async fn resource_group_location(&self, resource_group: &str) -> Result<String> {
        self.record("resource_group_location", resource_group)?;
        Ok(self.location.clone())
    }

    async fn list_resources(&self, resource_group: &str, filter: &str) -> Result<Vec<String>> {
        self.record("list_resources", filter)?;
        let expected = AzureTag::storage_account(&self.location).filter();
        if filter != expected {
            return Ok(Vec::new());
        }
        let _ = resource_group;
        Ok(self.storage_accounts.lock().unwrap().keys().cloned().collect())
    }

    async fn create_storage_account(
        &self,
        _resource_group: &str,
        name: &str,
        _location: &str,
        _tag: &AzureTag,
    ) -> Result<()> {
        self.record("create_storage_account", name)?;
        self.storage_accounts
            .lock()
            .unwrap()
            .insert(name.to_string(), "bmV3a2V5".to_string());
        Ok(())
    }

    async fn list_storage_account_keys(
        &self,
        _resource_group: &str,
        account: &str,
    ) -> Result<Vec<String>> {
        self.record("list_storage_account_keys", account)?;
        Ok(self
            .storage_accounts
            .lock()
            .unwrap()
            .get(account)
            .cloned()
            .into_iter()
            .collect())
    }
}

#[async_trait]
impl ArmBlobs for FakeArm {
    async fn container_exists(&self, _account: &str, _key: &str, container: &str) -> Result<bool> {
        self.record("container_exists", container)?;
        Ok(self
            .resources
            .lock()
            .unwrap()
            .contains(&format!("container/{}", container)))
    }

    async fn create_container(&self, _account: &str, _key: &str, container: &str) -> Result<()> {
        self.create("create_container", "container", container).map(|_| ())
    }

    async fn upload_page_blob(
        &self,
        _account: &str,
        _key: &str,
        _container: &str,
        blob: &str,
        _local: &Path,
        _concurrency: usize,
    ) -> Result<()> {
        self.create("upload_page_blob", "blob", blob).map(|_| ())
    }

    async fn delete_blob(&self, _account: &str, _key: &str, _container: &str, blob: &str)
        -> Result<()> {
        self.delete("delete_blob", "blob", blob)
    }
}

#[async_trait]
impl ArmCompute for FakeArm {
    async fn create_image(&self, _resource_group: &str, name: &str, _params: &ImageParams)
        -> Result<String> {
        self.create("create_image", "image", name)
    }

    async fn delete_image(&self, _resource_group: &str, name: &str) -> Result<()> {
        self.delete("delete_image", "image", name)
    }

    async fn create_gallery(&self, _resource_group: &str, name: &str, _location: &str)
        -> Result<()> {
        self.create("create_gallery", "gallery", name).map(|_| ())
    }

    async fn delete_gallery(&self, _resource_group: &str, name: &str) -> Result<()> {
        self.delete("delete_gallery", "gallery", name)
    }

    async fn create_gallery_image(
        &self,
        _resource_group: &str,
        _gallery: &str,
        name: &str,
        params: &GalleryImageParams,
    ) -> Result<()> {
        self.gallery_params.lock().unwrap().push(params.clone());
        self.create("create_gallery_image", "gallery_image", name).map(|_| ())
    }

    async fn delete_gallery_image(&self, _resource_group: &str, _gallery: &str, name: &str)
        -> Result<()> {
        self.delete("delete_gallery_image", "gallery_image", name)
    }

    async fn create_gallery_image_version(
        &self,
        _resource_group: &str,
        _gallery: &str,
        _image: &str,
        version: &str,
        params: &GalleryImageVersionParams,
    ) -> Result<()> {
        self.version_params.lock().unwrap().push(params.clone());
        self.create("create_gallery_image_version", "version", version)
            .map(|_| ())
    }

    async fn delete_gallery_image_version(
        &self,
        _resource_group: &str,
        _gallery: &str,
        _image: &str,
        version: &str,
    ) -> Result<()> {
        self.delete("delete_gallery_image_version", "version", version)
    }

    async fn create_vm(&self, _resource_group: &str, name: &str, params: &VmParams) -> Result<()> {
        self.vm_params.lock().unwrap().push(params.clone());
        self.create("create_vm", "vm", name)?;
        self.resources
            .lock()
            .unwrap()
            .insert(format!("disk/{}", params.disk_name));
        Ok(())
    }

    async fn delete_vm(&self, _resource_group: &str, name: &str) -> Result<()> {
        self.delete("delete_vm", "vm", name)
    }

    async fn delete_disk(&self, _resource_group: &str, name: &str) -> Result<()> {
        self.delete("delete_disk", "disk", name)
    }
}

#[async_trait]
impl ArmNetwork for FakeArm {
    async fn create_vnet(
        &self,
        _resource_group: &str,
        name: &str,
        _location: &str,
        _address_prefix: &str,
    ) -> Result<String> {
        self.create("create_vnet", "vnet", name)
    }

    async fn delete_vnet(&self, _resource_group: &str, name: &str) -> Result<()> {
        self.delete("delete_vnet", "vnet", name)
    }

    async fn create_subnet(
        &self,
        _resource_group: &str,
        _vnet: &str,
        name: &str,
        _address_prefix: &str,
    ) -> Result<String> {
        self.create("create_subnet", "subnet", name)
    }

    async fn delete_subnet(&self, _resource_group: &str, _vnet: &str, name: &str) -> Result<()> {
        self.delete("delete_subnet", "subnet", name)
    }

    async fn create_public_ip(&self, _resource_group: &str, name: &str, _location: &str)
        -> Result<PublicIp> {
        let id = self.create("create_public_ip", "public_ip", name)?;
        Ok(PublicIp {
            id,
            address: "198.51.100.7".to_string(),
        })
    }

    async fn delete_public_ip(&self, _resource_group: &str, name: &str) -> Result<()> {
        self.delete("delete_public_ip", "public_ip", name)
    }

    async fn create_security_group(
        &self,
        _resource_group: &str,
        name: &str,
        _location: &str,
        _rules: &[SecurityRule],
    ) -> Result<String> {
        self.create("create_security_group", "security_group", name)
    }

    async fn delete_security_group(&self, _resource_group: &str, name: &str) -> Result<()> {
        self.delete("delete_security_group", "security_group", name)
    }

    async fn create_nic(&self, _resource_group: &str, name: &str, _params: &NicParams)
        -> Result<String> {
        self.create("create_nic", "nic", name)
    }

    async fn delete_nic(&self, _resource_group: &str, name: &str) -> Result<()> {
        self.delete("delete_nic", "nic", name)
    }
}
