// tests/azure.rs

//! Integration tests for the Azure image and boot pipelines over an
//! in-memory resource manager

mod common;

use common::{write_script, FakeArm};
use osimage::cloud::azure::boot::{
    run_remote, AzureBoot, ResourceRecord, SetupOptions, SshOptions, SshTools,
};
use osimage::cloud::azure::{AzureClient, AzureVm, HyperVGen, VmOptions};
use osimage::{Arch, Error};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SUBSCRIPTION: &str = "sub";
const RESOURCE_GROUP: &str = "rg";

fn boot(arm: &Arc<FakeArm>) -> AzureBoot {
    let client = Arc::new(AzureClient::from_provider(SUBSCRIPTION, arm.clone()));
    AzureBoot::new(client, SUBSCRIPTION, RESOURCE_GROUP)
}

fn setup_options(arch: Arch) -> SetupOptions {
    SetupOptions {
        local_image: Some(PathBuf::from("/var/tmp/disk.vhd")),
        image: None,
        image_name: "img-name".to_string(),
        vm_name: "vm-name".to_string(),
        size: None,
        arch,
        username: "azure".to_string(),
        ssh_public_key: "ssh-ed25519 AAAA tester@host".to_string(),
    }
}

/// Log every ssh invocation next to the script
const RECORDING_SSH: &str = "printf '%s\\n' \"$*\" >> \"$(dirname \"$0\")/ssh.log\"\necho ran\n";

/// Fake `ssh`, `scp` and `ssh-keyscan` in `dir`; `ssh` runs `ssh_body`
fn ssh_tools(dir: &Path, ssh_body: &str) -> SshTools {
    SshTools {
        ssh: write_script(dir, "ssh", ssh_body),
        scp: write_script(
            dir,
            "scp",
            "printf '%s\\n' \"$*\" >> \"$(dirname \"$0\")/scp.log\"\n",
        ),
        keyscan: write_script(dir, "ssh-keyscan", "echo \"$1 ssh-ed25519 AAAAC3fake\"\n"),
    }
}

fn ssh_options(dir: &Path) -> SshOptions {
    SshOptions {
        username: "azure".to_string(),
        private_key: dir.join("id_ed25519"),
    }
}

/// Operation names of `calls`, without their arguments
fn ops(calls: &[String]) -> Vec<&str> {
    calls
        .iter()
        .map(|c| c.split(' ').next().unwrap_or_default())
        .collect()
}

#[tokio::test]
async fn test_aarch64_upload_creates_gallery_image() {
    let arm = Arc::new(FakeArm::with_storage_account("imagesexisting"));
    let mut res = ResourceRecord::default();

    let image_ref = boot(&arm)
        .upload(
            &PathBuf::from("/var/tmp/disk.vhd"),
            "img-name",
            Arch::Aarch64,
            &mut res,
        )
        .await
        .unwrap();

    assert_eq!(
        image_ref,
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/galleries/img_name_gallery/images/img-name-img/versions/1.0.0"
    );
    assert_eq!(
        arm.calls_to("create_"),
        vec![
            "create_container images",
            "create_gallery img_name_gallery",
            "create_gallery_image img-name-img",
            "create_image img-name-mimg",
            "create_gallery_image_version 1.0.0",
        ]
    );
    assert!(arm.calls_to("create_storage_account").is_empty());

    let definition = &arm.gallery_params.lock().unwrap()[0];
    assert_eq!(definition.architecture, "Arm64");
    assert_eq!(definition.sku, "IB-SKU-img-name-img");
    assert_eq!(definition.hyper_v, HyperVGen::V2);
    assert_eq!(definition.location, "westeurope");

    let version = &arm.version_params.lock().unwrap()[0];
    assert_eq!(version.target_regions, vec!["westeurope"]);
    assert_eq!(
        version.source_image_id,
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/images/img-name-mimg"
    );

    let gallery = res.gallery_image.clone().unwrap();
    assert_eq!(gallery.gallery, "img_name_gallery");
    assert_eq!(gallery.intermediate_image, "img-name-mimg");
    assert_eq!(res.blob.as_deref(), Some("img-name.vhd"));
    assert!(res.image.is_none());

    arm.clear_calls();
    boot(&arm).teardown(&res).await.unwrap();
    assert_eq!(
        arm.calls_to("delete_"),
        vec![
            "delete_gallery_image_version 1.0.0",
            "delete_gallery_image img-name-img",
            "delete_gallery img_name_gallery",
            "delete_image img-name-mimg",
            "delete_blob img-name.vhd",
        ]
    );
    assert_eq!(arm.live_resources(), vec!["container/images"]);
}

#[tokio::test]
async fn test_x86_64_upload_creates_managed_image() {
    let arm = Arc::new(FakeArm::with_storage_account("imagesexisting"));
    let mut res = ResourceRecord::default();

    let image_ref = boot(&arm)
        .upload(
            &PathBuf::from("/var/tmp/disk.vhd"),
            "img-name",
            Arch::X86_64,
            &mut res,
        )
        .await
        .unwrap();

    assert_eq!(
        image_ref,
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/images/img-name"
    );
    assert_eq!(res.image.as_deref(), Some("img-name"));
    assert!(res.gallery_image.is_none());
    assert!(arm.calls_to("create_gallery").is_empty());
}

#[tokio::test]
async fn test_missing_storage_account_is_created() {
    let arm = Arc::new(FakeArm::default());
    let azure = boot(&arm);

    let mut res = ResourceRecord::default();
    azure
        .upload(&PathBuf::from("/var/tmp/a.vhd"), "first", Arch::X86_64, &mut res)
        .await
        .unwrap();
    let created = arm.calls_to("create_storage_account");
    assert_eq!(created.len(), 1);
    let account = created[0].trim_start_matches("create_storage_account ");
    assert_eq!(account.len(), 24);
    assert!(account.starts_with("images"));

    // The tagged account is found on the next upload
    let mut res = ResourceRecord::default();
    azure
        .upload(&PathBuf::from("/var/tmp/b.vhd"), "second.vhd", Arch::X86_64, &mut res)
        .await
        .unwrap();
    assert_eq!(arm.calls_to("create_storage_account").len(), 1);
    assert_eq!(arm.calls_to("create_container").len(), 1);
    assert_eq!(res.blob.as_deref(), Some("second.vhd"));
}

#[tokio::test]
async fn test_create_and_destroy_vm_order() {
    let arm = Arc::new(FakeArm::default());
    let client = AzureClient::from_provider(SUBSCRIPTION, arm.clone());

    let vm = client
        .create_vm(
            RESOURCE_GROUP,
            &VmOptions {
                name: "vm-name".to_string(),
                image: "/images/img".to_string(),
                size: "Standard_B1s".to_string(),
                username: "azure".to_string(),
                ssh_key: "ssh-ed25519 AAAA".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(vm.ip_address, "198.51.100.7");
    assert_eq!(
        arm.calls_to("create_"),
        vec![
            "create_vnet vm-name-vnet",
            "create_subnet vm-name-subnet",
            "create_public_ip vm-name-ip",
            "create_security_group vm-name-sg",
            "create_nic vm-name-intf",
            "create_vm vm-name",
        ]
    );
    let params = &arm.vm_params.lock().unwrap()[0];
    assert_eq!(params.disk_name, "vm-name-disk");
    assert_eq!(params.ssh_key_path, "/home/azure/.ssh/authorized_keys");

    client.destroy_vm(&vm).await.unwrap();
    assert_eq!(
        arm.calls_to("delete_"),
        vec![
            "delete_vm vm-name",
            "delete_disk vm-name-disk",
            "delete_nic vm-name-intf",
            "delete_security_group vm-name-sg",
            "delete_public_ip vm-name-ip",
            "delete_subnet vm-name-subnet",
            "delete_vnet vm-name-vnet",
        ]
    );
    assert!(arm.live_resources().is_empty());
}

#[tokio::test]
async fn test_failed_vm_creation_removes_partial_network() {
    let arm = Arc::new(FakeArm::default().failing_on(&["create_nic"]));
    let client = AzureClient::from_provider(SUBSCRIPTION, arm.clone());

    let err = client
        .create_vm(
            RESOURCE_GROUP,
            &VmOptions {
                name: "vm-name".to_string(),
                image: "/images/img".to_string(),
                size: "Standard_B1s".to_string(),
                username: "azure".to_string(),
                ssh_key: "ssh-ed25519 AAAA".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("create_nic"));
    assert!(arm.live_resources().is_empty());
}

#[tokio::test]
async fn test_setup_then_teardown_twice() {
    let arm = Arc::new(FakeArm::with_storage_account("imagesexisting"));
    let azure = boot(&arm);
    let mut res = ResourceRecord::default();

    azure.setup(&setup_options(Arch::X86_64), &mut res).await.unwrap();
    let vm = res.vm.clone().unwrap();
    assert_eq!(vm.ip_address, "198.51.100.7");
    assert_eq!(
        arm.vm_params.lock().unwrap()[0].size,
        Arch::X86_64.azure_default_vm_size().unwrap()
    );
    assert_eq!(
        arm.vm_params.lock().unwrap()[0].image_id,
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/images/img-name"
    );

    arm.clear_calls();
    azure.teardown(&res).await.unwrap();
    assert_eq!(
        ops(&arm.calls_to("delete_")),
        vec![
            "delete_vm",
            "delete_disk",
            "delete_nic",
            "delete_security_group",
            "delete_public_ip",
            "delete_subnet",
            "delete_vnet",
            "delete_image",
            "delete_blob",
        ]
    );
    assert_eq!(arm.live_resources(), vec!["container/images"]);

    // Everything is already gone; a second teardown still succeeds
    azure.teardown(&res).await.unwrap();
}

#[tokio::test]
async fn test_failed_setup_rolls_back() {
    let arm = Arc::new(FakeArm::with_storage_account("imagesexisting").failing_on(&["create_vm"]));
    let mut res = ResourceRecord::default();

    let err = boot(&arm)
        .setup(&setup_options(Arch::X86_64), &mut res)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("create_vm"));
    assert!(res.is_empty());
    assert_eq!(arm.live_resources(), vec!["container/images"]);
}

#[tokio::test]
async fn test_failed_gallery_version_rolls_back() {
    let arm = Arc::new(
        FakeArm::with_storage_account("imagesexisting")
            .failing_on(&["create_gallery_image_version"]),
    );
    let mut res = ResourceRecord::default();

    let err = boot(&arm)
        .setup(&setup_options(Arch::Aarch64), &mut res)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("create_gallery_image_version"));
    assert_eq!(
        arm.calls_to("delete_gallery"),
        vec![
            "delete_gallery_image_version 1.0.0",
            "delete_gallery_image img-name-img",
            "delete_gallery img_name_gallery",
        ]
    );
    assert_eq!(arm.live_resources(), vec!["container/images"]);
    assert!(res.is_empty());
}

#[tokio::test]
async fn test_setup_without_image_is_rejected() {
    let arm = Arc::new(FakeArm::default());
    let mut opts = setup_options(Arch::X86_64);
    opts.local_image = None;

    let mut res = ResourceRecord::default();
    let err = boot(&arm).setup(&opts, &mut res).await.unwrap_err();
    assert!(err.to_string().contains("image"));
    assert!(arm.calls_to("create_").is_empty());
}

#[tokio::test]
async fn test_existing_image_skips_upload() {
    let arm = Arc::new(FakeArm::default());
    let mut opts = setup_options(Arch::Aarch64);
    opts.local_image = None;
    opts.image = Some("/galleries/g/images/i/versions/1.0.0".to_string());
    opts.size = Some("Standard_D2ps_v5".to_string());

    let mut res = ResourceRecord::default();
    boot(&arm).setup(&opts, &mut res).await.unwrap();

    assert!(arm.calls_to("upload_page_blob").is_empty());
    assert!(res.blob.is_none());
    let params = &arm.vm_params.lock().unwrap()[0];
    assert_eq!(params.image_id, "/galleries/g/images/i/versions/1.0.0");
    assert_eq!(params.size, "Standard_D2ps_v5");
}

#[test]
fn test_resource_record_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resources.json");

    let mut res = ResourceRecord {
        blob: Some("img-name.vhd".to_string()),
        image: Some("img-name".to_string()),
        ..Default::default()
    };
    res.vm = Some(osimage::cloud::azure::VmRecord::planned(RESOURCE_GROUP, "vm-name"));
    res.save(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(!text.contains("galleryimage"));
    assert_eq!(ResourceRecord::load(&path).unwrap(), res);
}

#[tokio::test]
async fn test_run_remote_passes_every_argument() {
    let tools_dir = tempfile::tempdir().unwrap();
    let tools = ssh_tools(tools_dir.path(), RECORDING_SSH);

    let work = tempfile::tempdir().unwrap();
    let exe = work.path().join("exe.sh");
    let data = work.path().join("data.txt");
    std::fs::write(&exe, "#!/bin/sh\n").unwrap();
    std::fs::write(&data, "payload").unwrap();
    let command = vec![
        exe.display().to_string(),
        "--verbose".to_string(),
        data.display().to_string(),
    ];

    let mut status = Vec::new();
    run_remote(&tools, "192.0.2.4", &ssh_options(work.path()), &command, &mut status)
        .await
        .unwrap();

    let ssh_log = std::fs::read_to_string(tools_dir.path().join("ssh.log")).unwrap();
    let ssh_calls: Vec<&str> = ssh_log.lines().collect();
    assert_eq!(ssh_calls.len(), 2);
    assert!(ssh_calls[0].ends_with("-l azure 192.0.2.4 exit"));
    assert!(
        ssh_calls[1].ends_with("-l azure 192.0.2.4 ./exe.sh --verbose data.txt"),
        "unexpected remote command: {}",
        ssh_calls[1]
    );

    let scp_log = std::fs::read_to_string(tools_dir.path().join("scp.log")).unwrap();
    let scp_calls: Vec<&str> = scp_log.lines().collect();
    assert_eq!(scp_calls.len(), 2);
    assert!(scp_calls[0].ends_with(&format!("-- {} azure@192.0.2.4:exe.sh", exe.display())));
    assert!(scp_calls[1].ends_with(&format!("-- {} azure@192.0.2.4:data.txt", data.display())));

    assert!(String::from_utf8(status).unwrap().ends_with("ran\n"));
}

#[tokio::test]
async fn test_cancel_after_vm_creation_tears_down() {
    let token = CancellationToken::new();
    let arm = Arc::new(
        FakeArm::with_storage_account("imagesexisting").cancelling_on("create_vm", token.clone()),
    );
    let mut res = ResourceRecord::default();

    let err = boot(&arm)
        .with_cancellation(token)
        .setup(&setup_options(Arch::X86_64), &mut res)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)), "unexpected error: {}", err);
    assert!(err.is_timeout());
    assert!(res.is_empty());
    assert_eq!(arm.calls_to("delete_vm").len(), 1);
    assert_eq!(arm.live_resources(), vec!["container/images"]);
}

#[tokio::test]
async fn test_cancel_during_upload_skips_later_steps() {
    let token = CancellationToken::new();
    let arm = Arc::new(
        FakeArm::with_storage_account("imagesexisting")
            .cancelling_on("upload_page_blob", token.clone()),
    );
    let mut res = ResourceRecord::default();

    let err = boot(&arm)
        .with_cancellation(token)
        .setup(&setup_options(Arch::X86_64), &mut res)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert!(arm.calls_to("create_image").is_empty());
    assert!(arm.calls_to("create_vm").is_empty());
    assert_eq!(arm.calls_to("delete_blob").len(), 1);
    assert_eq!(arm.live_resources(), vec!["container/images"]);
}

#[tokio::test]
async fn test_cancelled_run_tears_down() {
    let tools_dir = tempfile::tempdir().unwrap();
    // Answers the connection check, then hangs on the real command
    let tools = ssh_tools(
        tools_dir.path(),
        "case \"$*\" in *exit) exit 0 ;; esac\nsleep 30\n",
    );
    let token = CancellationToken::new();
    let arm = Arc::new(FakeArm::with_storage_account("imagesexisting"));
    let azure = boot(&arm)
        .with_cancellation(token.clone())
        .with_ssh_tools(tools);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let err = azure
        .run(
            &setup_options(Arch::X86_64),
            &ssh_options(tools_dir.path()),
            &["test.sh".to_string()],
            &mut Vec::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)), "unexpected error: {}", err);
    assert_eq!(arm.calls_to("delete_vm").len(), 1);
    assert_eq!(arm.live_resources(), vec!["container/images"]);
}
