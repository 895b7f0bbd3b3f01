// src/cloud/aws/cli.rs

//! Capability adapter driving the `aws` command-line tool
//!
//! Every call runs `aws --region <region> --output json <service> <op> ...`
//! through the helper-process runner and decodes the JSON answer. Error
//! codes that mean "resource does not exist" become [`Error::NotFound`] so
//! teardown code can treat them as already deleted.

use super::{
    BlobUploader, ComputeImages, ComputeVm, Grant, Image, ImageFilter, ImageReader,
    ImportSnapshotRequest, ImportSnapshotTask, Instance, ObjectAcl, ObjectStore, Presigner,
    RegisterImageRequest, RunInstancesRequest, Tag, UploadOutput,
};
use crate::error::{Error, Result};
use crate::runner::{resolve_program, ProcessOutput, Runner};
use async_trait::async_trait;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use url::Url;

const NOT_FOUND_MARKERS: &[&str] = &[
    "NotFound",
    "NoSuchKey",
    "NoSuchBucket",
    "does not exist",
];

/// Static credentials passed to the CLI through its environment
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// `aws` CLI bound to one region
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: PathBuf,
    region: String,
    credentials: Option<AwsCredentials>,
    endpoint: Option<String>,
}

impl AwsCli {
    /// Locate `aws` on `PATH`
    pub fn new(region: impl Into<String>) -> Result<Self> {
        Ok(Self {
            program: resolve_program("aws")?,
            region: region.into(),
            credentials: None,
            endpoint: None,
        })
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Use explicit credentials instead of the CLI's default chain
    pub fn with_credentials(mut self, credentials: AwsCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Talk to an S3/EC2-compatible endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    fn runner<I, S>(&self, args: I) -> Runner
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString>,
    {
        let mut runner = Runner::new(&self.program)
            .args(["--region", self.region.as_str(), "--output", "json"]);
        if let Some(endpoint) = &self.endpoint {
            runner = runner.args(["--endpoint-url", endpoint.as_str()]);
        }
        runner = runner.args(args);
        if let Some(creds) = &self.credentials {
            runner = runner
                .env("AWS_ACCESS_KEY_ID", &creds.access_key_id)
                .env("AWS_SECRET_ACCESS_KEY", &creds.secret_access_key);
            if let Some(token) = &creds.session_token {
                runner = runner.env("AWS_SESSION_TOKEN", token);
            }
        }
        runner
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

    async fn call(&self, args: Vec<String>) -> Result<ProcessOutput> {
        let runner = self.runner(args);
        let output = runner.run(None).await?;
        Self::check(&runner, output)
    }

    async fn call_json<T: DeserializeOwned>(&self, args: Vec<String>) -> Result<T> {
        let output = self.call(args).await?;
        serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::ParseError(format!("decoding aws output failed: {}", e)))
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegionsOut {
    #[serde(default)]
    regions: Vec<RegionOut>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegionOut {
    region_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BucketsOut {
    #[serde(default)]
    buckets: Vec<BucketOut>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BucketOut {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AclOut {
    #[serde(default)]
    grants: Vec<GrantOut>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GrantOut {
    #[serde(default)]
    grantee: Option<GranteeOut>,
    permission: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GranteeOut {
    #[serde(default, rename = "ID")]
    id: Option<String>,
    #[serde(default, rename = "URI")]
    uri: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImportOut {
    import_task_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImportTasksOut {
    #[serde(default)]
    import_snapshot_tasks: Vec<ImportTaskOut>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImportTaskOut {
    import_task_id: String,
    #[serde(default)]
    snapshot_task_detail: SnapshotDetailOut,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SnapshotDetailOut {
    #[serde(default)]
    status: String,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    snapshot_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageIdOut {
    image_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImagesOut {
    #[serde(default)]
    images: Vec<ImageOut>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageOut {
    image_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    block_device_mappings: Vec<MappingOut>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MappingOut {
    #[serde(default)]
    ebs: Option<EbsOut>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EbsOut {
    #[serde(default)]
    snapshot_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupOut {
    group_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstancesOut {
    #[serde(default)]
    instances: Vec<InstanceOut>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReservationsOut {
    #[serde(default)]
    reservations: Vec<InstancesOut>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceOut {
    instance_id: String,
    #[serde(default)]
    state: Option<StateOut>,
    #[serde(default)]
    public_ip_address: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StateOut {
    name: String,
}

impl From<InstanceOut> for Instance {
    fn from(out: InstanceOut) -> Self {
        Self {
            instance_id: out.instance_id,
            state: out.state.map(|s| s.name).unwrap_or_default(),
            public_ip: out.public_ip_address,
        }
    }
}

fn tags_json(tags: &[Tag]) -> String {
    let tags: Vec<_> = tags
        .iter()
        .map(|t| json!({"Key": t.key, "Value": t.value}))
        .collect();
    serde_json::Value::Array(tags).to_string()
}

#[async_trait]
impl ObjectStore for AwsCli {
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.call(args(["s3api", "delete-object", "--bucket", bucket, "--key", key]))
            .await
            .map(|_| ())
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let out: BucketsOut = self.call_json(args(["s3api", "list-buckets"])).await?;
        Ok(out.buckets.into_iter().map(|b| b.name).collect())
    }

    async fn get_bucket_acl(&self, bucket: &str) -> Result<Vec<Grant>> {
        let out: AclOut = self
            .call_json(args(["s3api", "get-bucket-acl", "--bucket", bucket]))
            .await?;
        Ok(out
            .grants
            .into_iter()
            .map(|g| Grant {
                grantee: g.grantee.and_then(|e| e.id.or(e.uri).or(e.display_name)),
                permission: g.permission,
            })
            .collect())
    }

    async fn put_object_acl(&self, bucket: &str, key: &str, acl: ObjectAcl) -> Result<()> {
        self.call(args([
            "s3api",
            "put-object-acl",
            "--bucket",
            bucket,
            "--key",
            key,
            "--acl",
            acl.as_str(),
        ]))
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl BlobUploader for AwsCli {
    async fn upload(&self, bucket: &str, key: &str, reader: ImageReader) -> Result<UploadOutput> {
        let target = format!("s3://{}/{}", bucket, key);
        let runner = self.runner(["s3", "cp", "-", target.as_str()]);
        let output = runner.run_with_reader(Some(reader)).await?;
        Self::check(&runner, output)?;

        let mut location = Url::parse(&format!("https://{}.s3.{}.amazonaws.com/", bucket, self.region))
            .map_err(|e| Error::ParseError(format!("invalid bucket URL: {}", e)))?;
        location.set_path(key);
        Ok(UploadOutput {
            location: location.to_string(),
        })
    }
}

#[async_trait]
impl Presigner for AwsCli {
    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String> {
        let target = format!("s3://{}/{}", bucket, key);
        let expires = ttl.as_secs().to_string();
        let output = self
            .call(args(["s3", "presign", &target, "--expires-in", &expires]))
            .await?;
        let url = output.stdout_str().trim().to_string();
        Url::parse(&url).map_err(|e| Error::ParseError(format!("invalid presigned URL: {}", e)))?;
        Ok(url)
    }
}

#[async_trait]
impl ComputeImages for AwsCli {
    async fn describe_regions(&self) -> Result<Vec<String>> {
        let out: RegionsOut = self.call_json(args(["ec2", "describe-regions"])).await?;
        Ok(out.regions.into_iter().map(|r| r.region_name).collect())
    }

    async fn import_snapshot(&self, request: &ImportSnapshotRequest) -> Result<String> {
        let container = json!({
            "UserBucket": {"S3Bucket": request.bucket, "S3Key": request.key}
        })
        .to_string();
        let mut cmd = args([
            "ec2",
            "import-snapshot",
            "--description",
            &request.description,
            "--disk-container",
            &container,
        ]);
        if let Some(role) = &request.role_name {
            cmd.extend(args(["--role-name", role]));
        }
        let out: ImportOut = self.call_json(cmd).await?;
        Ok(out.import_task_id)
    }

    async fn describe_import_snapshot_tasks(
        &self,
        task_ids: &[String],
    ) -> Result<Vec<ImportSnapshotTask>> {
        let mut cmd = args(["ec2", "describe-import-snapshot-tasks", "--import-task-ids"]);
        cmd.extend(task_ids.iter().cloned());
        let out: ImportTasksOut = self.call_json(cmd).await?;
        Ok(out
            .import_snapshot_tasks
            .into_iter()
            .map(|t| ImportSnapshotTask {
                task_id: t.import_task_id,
                status: t.snapshot_task_detail.status,
                status_message: t.snapshot_task_detail.status_message,
                snapshot_id: t.snapshot_task_detail.snapshot_id,
            })
            .collect())
    }

    async fn register_image(&self, request: &RegisterImageRequest) -> Result<String> {
        let mappings = json!([{
            "DeviceName": request.root_device_name,
            "Ebs": {"SnapshotId": request.snapshot_id}
        }])
        .to_string();
        let mut cmd = args([
            "ec2",
            "register-image",
            "--name",
            &request.name,
            "--architecture",
            &request.architecture,
            "--virtualization-type",
            &request.virtualization_type,
            "--root-device-name",
            &request.root_device_name,
            "--block-device-mappings",
            &mappings,
        ]);
        cmd.push(if request.ena_support { "--ena-support" } else { "--no-ena-support" }.to_string());
        if let Some(mode) = &request.boot_mode {
            cmd.extend(args(["--boot-mode", mode]));
        }
        let out: ImageIdOut = self.call_json(cmd).await?;
        Ok(out.image_id)
    }

    async fn copy_image(
        &self,
        name: &str,
        source_image_id: &str,
        source_region: &str,
    ) -> Result<String> {
        let out: ImageIdOut = self
            .call_json(args([
                "ec2",
                "copy-image",
                "--name",
                name,
                "--source-image-id",
                source_image_id,
                "--source-region",
                source_region,
            ]))
            .await?;
        Ok(out.image_id)
    }

    async fn describe_images(&self, filter: &ImageFilter) -> Result<Vec<Image>> {
        let mut cmd = args(["ec2", "describe-images"]);
        match filter {
            ImageFilter::Ids(ids) => {
                cmd.push("--image-ids".to_string());
                cmd.extend(ids.iter().cloned());
            }
            ImageFilter::Tag { key, value } => {
                cmd.push("--filters".to_string());
                cmd.push(format!("Name=tag:{},Values={}", key, value));
            }
        }
        let out: ImagesOut = self.call_json(cmd).await?;
        Ok(out
            .images
            .into_iter()
            .map(|i| Image {
                image_id: i.image_id,
                name: i.name,
                state: i.state,
                snapshot_ids: i
                    .block_device_mappings
                    .into_iter()
                    .filter_map(|m| m.ebs.and_then(|e| e.snapshot_id))
                    .collect(),
            })
            .collect())
    }

    async fn modify_image_attribute(
        &self,
        image_id: &str,
        add_launch_permissions: &[String],
    ) -> Result<()> {
        let adds: Vec<_> = add_launch_permissions
            .iter()
            .map(|id| json!({"UserId": id}))
            .collect();
        let perms = json!({ "Add": adds }).to_string();
        self.call(args([
            "ec2",
            "modify-image-attribute",
            "--image-id",
            image_id,
            "--launch-permission",
            &perms,
        ]))
        .await
        .map(|_| ())
    }

    async fn modify_snapshot_attribute(
        &self,
        snapshot_id: &str,
        add_create_volume_permissions: &[String],
    ) -> Result<()> {
        let mut cmd = args([
            "ec2",
            "modify-snapshot-attribute",
            "--snapshot-id",
            snapshot_id,
            "--attribute",
            "createVolumePermission",
            "--operation-type",
            "add",
            "--user-ids",
        ]);
        cmd.extend(add_create_volume_permissions.iter().cloned());
        self.call(cmd).await.map(|_| ())
    }

    async fn deregister_image(&self, image_id: &str) -> Result<()> {
        self.call(args(["ec2", "deregister-image", "--image-id", image_id]))
            .await
            .map(|_| ())
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.call(args(["ec2", "delete-snapshot", "--snapshot-id", snapshot_id]))
            .await
            .map(|_| ())
    }

    async fn create_tags(&self, resources: &[String], tags: &[Tag]) -> Result<()> {
        let mut cmd = args(["ec2", "create-tags", "--tags", &tags_json(tags), "--resources"]);
        cmd.extend(resources.iter().cloned());
        self.call(cmd).await.map(|_| ())
    }
}

#[async_trait]
impl ComputeVm for AwsCli {
    async fn create_security_group(&self, name: &str, description: &str) -> Result<String> {
        let out: GroupOut = self
            .call_json(args([
                "ec2",
                "create-security-group",
                "--group-name",
                name,
                "--description",
                description,
            ]))
            .await?;
        Ok(out.group_id)
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        self.call(args(["ec2", "delete-security-group", "--group-id", group_id]))
            .await
            .map(|_| ())
    }

    async fn authorize_ingress(
        &self,
        group_id: &str,
        cidr: &str,
        from_port: u16,
        to_port: u16,
        protocol: &str,
    ) -> Result<()> {
        let perms = json!([{
            "IpProtocol": protocol,
            "FromPort": from_port,
            "ToPort": to_port,
            "IpRanges": [{"CidrIp": cidr}]
        }])
        .to_string();
        self.call(args([
            "ec2",
            "authorize-security-group-ingress",
            "--group-id",
            group_id,
            "--ip-permissions",
            &perms,
        ]))
        .await
        .map(|_| ())
    }

    async fn run_instances(&self, request: &RunInstancesRequest) -> Result<Vec<Instance>> {
        // The CLI base64-encodes --user-data itself
        let user_data = base64::engine::general_purpose::STANDARD
            .decode(&request.user_data)
            .map_err(|e| Error::InternalError(format!("user data is not base64: {}", e)))?;
        let user_data = String::from_utf8_lossy(&user_data).into_owned();

        let mut cmd = args([
            "ec2",
            "run-instances",
            "--count",
            "1",
            "--image-id",
            &request.image_id,
            "--instance-type",
            &request.instance_type,
            "--user-data",
            &user_data,
            "--security-group-ids",
        ]);
        cmd.extend(request.security_group_ids.iter().cloned());
        let out: InstancesOut = self.call_json(cmd).await?;
        Ok(out.instances.into_iter().map(Instance::from).collect())
    }

    async fn describe_instances(&self, instance_ids: &[String]) -> Result<Vec<Instance>> {
        let mut cmd = args(["ec2", "describe-instances", "--instance-ids"]);
        cmd.extend(instance_ids.iter().cloned());
        let out: ReservationsOut = self.call_json(cmd).await?;
        Ok(out
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .map(Instance::from)
            .collect())
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()> {
        let mut cmd = args(["ec2", "terminate-instances", "--instance-ids"]);
        cmd.extend(instance_ids.iter().cloned());
        self.call(cmd).await.map(|_| ())
    }

    async fn wait_until_running(&self, instance_id: &str) -> Result<()> {
        debug!("Waiting for instance {} to run", instance_id);
        self.call(args(["ec2", "wait", "instance-running", "--instance-ids", instance_id]))
            .await
            .map(|_| ())
    }

    async fn wait_until_terminated(&self, instance_id: &str) -> Result<()> {
        debug!("Waiting for instance {} to terminate", instance_id);
        self.call(args(["ec2", "wait", "instance-terminated", "--instance-ids", instance_id]))
            .await
            .map(|_| ())
    }
}
