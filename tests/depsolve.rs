// tests/depsolve.rs

//! Integration tests for the depsolve helper client
//!
//! Every test drives a real `/bin/sh` helper that records its requests and
//! answers with canned JSON.

mod common;

use common::{appstream, baseos, FakeHelper, Probe};
use osimage::depsolve::{ApiVersion, ProtocolHandler};
use osimage::{Error, PackageSet, RepoConfig, SbomType, Solver};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

fn solver(helper: &FakeHelper) -> Solver {
    Solver::new("platform:el9", "9", "x86_64", helper.dir.path().join("cache"))
        .with_helper([helper.program.clone()])
}

fn wire_repo(repo: &RepoConfig) -> Value {
    json!({
        "id": repo.hash(),
        "name": repo.name,
        "baseurl": repo.base_urls,
        "gpgcheck": repo.check_gpg.unwrap_or(false),
    })
}

fn v2_package(name: &str, repo: &RepoConfig) -> Value {
    json!({
        "name": name,
        "epoch": 0,
        "version": "1.0",
        "release": "1.el9",
        "arch": "x86_64",
        "repo_id": repo.hash(),
        "location": format!("Packages/{}-1.0-1.el9.x86_64.rpm", name),
        "remote_locations": [format!("https://example.com/{}.rpm", name)],
        "checksum": {"algorithm": "sha256", "value": "abcd"},
    })
}

fn two_step_chain() -> Vec<PackageSet> {
    vec![
        PackageSet::new(["bash"]).with_repositories(vec![baseos()]),
        PackageSet::new(["nginx"])
            .with_exclude(["httpd"])
            .with_repositories(vec![baseos(), appstream()]),
    ]
}

#[tokio::test]
async fn test_chain_request_uses_repo_hashes() {
    let base = baseos();
    let app = appstream();
    let response = json!({
        "solver": "dnf5",
        "transactions": [
            [v2_package("bash", &base)],
            [v2_package("nginx", &app)],
        ],
        "repos": {
            base.hash(): wire_repo(&base),
            app.hash(): wire_repo(&app),
        },
    });
    let helper = FakeHelper::new(Probe::V2, &response.to_string(), "", 0);

    let result = solver(&helper).depsolve(&two_step_chain(), None).await.unwrap();

    let request = helper.request().expect("helper was not called");
    assert_eq!(request["api_version"], 2);
    assert_eq!(request["command"], "depsolve");
    assert_eq!(request["module_platform_id"], "platform:el9");
    assert_eq!(request["releasever"], "9");

    let args = &request["arguments"];
    let repo_ids: Vec<&str> = args["repos"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(repo_ids, vec![base.hash(), app.hash()]);

    let transactions = args["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0]["repo-ids"], json!([base.hash()]));
    assert_eq!(transactions[1]["repo-ids"], json!([base.hash(), app.hash()]));
    assert_eq!(transactions[1]["exclude-specs"], json!(["httpd"]));
    assert_eq!(args["optional-metadata"], json!(["filelists"]));

    assert_eq!(result.solver, "dnf5");
    assert_eq!(result.transactions.len(), 2);
    let names: Vec<&str> = result.packages.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["bash", "nginx"]);
    assert_eq!(result.repos.len(), 2);
}

#[tokio::test]
async fn test_dropped_repository_never_reaches_helper() {
    let helper = FakeHelper::new(Probe::V2, "{}", "", 0);
    let chain = vec![
        PackageSet::new(["bash"]).with_repositories(vec![baseos(), appstream()]),
        PackageSet::new(["nginx"]).with_repositories(vec![baseos()]),
    ];

    let err = solver(&helper).depsolve(&chain, None).await.unwrap_err();
    assert!(matches!(err, Error::ChainError(_)), "unexpected error: {}", err);
    assert!(!helper.probed());
    assert!(helper.request().is_none());
}

#[tokio::test]
async fn test_empty_chain_gives_empty_result() {
    let helper = FakeHelper::new(Probe::V2, r#"{"solver": "dnf5"}"#, "", 0);

    let result = solver(&helper).depsolve(&[], None).await.unwrap();

    let request = helper.request().expect("helper was not called");
    assert_eq!(request["arguments"]["transactions"], json!([]));
    assert!(result.packages.is_empty());
    assert!(result.transactions.is_empty());
    assert!(result.repos.is_empty());
    assert_eq!(result.solver, "dnf5");
}

#[tokio::test]
async fn test_set_without_repositories_needs_root_dir() {
    let helper = FakeHelper::new(Probe::V2, "{}", "", 0);
    let chain = vec![PackageSet::new(["bash"])];

    let err = solver(&helper).depsolve(&chain, None).await.unwrap_err();
    assert!(matches!(err, Error::ChainError(_)));
    assert!(helper.request().is_none());
}

#[tokio::test]
async fn test_mtls_repository_marks_packages() {
    let mut repo = RepoConfig::with_base_url("cdn", "https://cdn.example.com/repo");
    repo.ssl_client_key = "/etc/pki/client.key".to_string();
    repo.ssl_client_cert = "/etc/pki/client.crt".to_string();

    let mut wire = wire_repo(&repo);
    wire["sslclientkey"] = json!(repo.ssl_client_key);
    wire["sslclientcert"] = json!(repo.ssl_client_cert);
    let response = json!({
        "solver": "dnf",
        "transactions": [[v2_package("kernel", &repo)]],
        "repos": { repo.hash(): wire },
    });
    let helper = FakeHelper::new(Probe::V2, &response.to_string(), "", 0);

    let chain = vec![PackageSet::new(["kernel"]).with_repositories(vec![repo.clone()])];
    let result = solver(&helper).depsolve(&chain, None).await.unwrap();

    let request = helper.request().unwrap();
    assert_eq!(
        request["arguments"]["repos"][0]["sslclientkey"],
        "/etc/pki/client.key"
    );
    assert_eq!(result.packages[0].secrets.as_deref(), Some("org.osbuild.mtls"));
    assert_eq!(result.repos[0].ssl_client_key, "/etc/pki/client.key");
}

#[tokio::test]
async fn test_empty_output_is_internal_error() {
    let helper = FakeHelper::new(Probe::V2, "", "", 0);
    let chain = vec![PackageSet::new(["bash"]).with_repositories(vec![baseos()])];

    let err = solver(&helper).depsolve(&chain, None).await.unwrap_err();
    match &err {
        Error::DepsolveError { kind, reason } => {
            assert_eq!(kind, "InternalError");
            assert!(reason.ends_with("output was empty"), "reason: {}", reason);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.is_internal());
}

#[tokio::test]
async fn test_helper_error_is_reported() {
    let response = json!({"kind": "MarkingErrors", "reason": "no package matches 'nosuch'"});
    let helper = FakeHelper::new(Probe::V2, &response.to_string(), "", 1);
    let chain = vec![PackageSet::new(["nosuch"]).with_repositories(vec![baseos()])];

    let err = solver(&helper).depsolve(&chain, None).await.unwrap_err();
    match err {
        Error::DepsolveError { kind, reason } => {
            assert_eq!(kind, "MarkingErrors");
            assert_eq!(reason, "no package matches 'nosuch'");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_repo_error_names_sources() {
    let response = json!({"kind": "RepoError", "reason": "cannot download repomd.xml"});
    let helper = FakeHelper::new(Probe::V2, &response.to_string(), "", 1);
    let chain = vec![PackageSet::new(["bash"]).with_repositories(vec![baseos()])];

    let err = solver(&helper).depsolve(&chain, None).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("https://example.com/baseos"), "{}", message);
    assert!(message.contains("cannot download repomd.xml"), "{}", message);
}

#[tokio::test]
async fn test_stderr_goes_to_sink() {
    let base = baseos();
    let response = json!({
        "solver": "dnf5",
        "transactions": [[v2_package("bash", &base)]],
        "repos": { base.hash(): wire_repo(&base) },
    });
    let helper = FakeHelper::new(Probe::V2, &response.to_string(), "loading metadata\n", 0);
    let sink = Arc::new(Mutex::new(Vec::<u8>::new()));

    let chain = vec![PackageSet::new(["bash"]).with_repositories(vec![base])];
    solver(&helper)
        .with_stderr_sink(sink.clone())
        .depsolve(&chain, None)
        .await
        .unwrap();

    let captured = String::from_utf8(sink.lock().unwrap().clone()).unwrap();
    assert_eq!(captured, "loading metadata\n");
}

#[tokio::test]
async fn test_v1_fallback_when_probe_rejected() {
    let base = baseos();
    let response = json!({
        "solver": "dnf",
        "packages": [{
            "name": "bash",
            "epoch": 0,
            "version": "5.1",
            "release": "1.el9",
            "arch": "x86_64",
            "repo_id": base.hash(),
            "path": "Packages/bash.rpm",
            "remote_location": "https://example.com/baseos/Packages/bash.rpm",
            "checksum": "sha256:0123abcd",
        }],
        "repos": {
            base.hash(): {
                "id": base.hash(),
                "name": "baseos",
                "baseurl": base.base_urls,
                "gpgcheck": true,
                "repo_gpgcheck": false,
            },
        },
    });
    let helper = FakeHelper::new(Probe::Reject, &response.to_string(), "", 0);
    let solver = solver(&helper);

    let chain = vec![PackageSet::new(["bash"]).with_repositories(vec![base])];
    let result = solver.depsolve(&chain, None).await.unwrap();

    let probe: Value =
        serde_json::from_slice(&std::fs::read(helper.dir.path().join("probe.json")).unwrap())
            .unwrap();
    assert_eq!(probe, json!({"command": "api-versions"}));

    let request = helper.request().unwrap();
    assert!(request.get("api_version").is_none());
    assert_eq!(request["proxy"], "");

    assert_eq!(solver.handler().await.version(), 1);
    let bash = &result.packages[0];
    let checksum = bash.checksum.as_ref().unwrap();
    assert_eq!(checksum.algorithm, "sha256");
    assert_eq!(checksum.value, "0123abcd");
    assert!(bash.check_gpg);
    assert_eq!(bash.remote_locations.len(), 1);
}

#[tokio::test]
async fn test_v1_only_helper_negotiates_v1() {
    let helper = FakeHelper::new(Probe::V1Only, "[]", "", 0);
    let solver = solver(&helper);
    assert_eq!(solver.handler().await.version(), 1);
    assert!(helper.probed());
}

#[tokio::test]
async fn test_pinned_version_skips_probe() {
    let helper = FakeHelper::new(Probe::V1Only, "{}", "", 0);
    let solver = solver(&helper).with_api_version(ApiVersion::V2);
    assert_eq!(solver.handler().await.version(), 2);
    assert!(!helper.probed());
}

#[tokio::test]
async fn test_sbom_is_requested_and_returned() {
    let base = baseos();
    let response = json!({
        "solver": "dnf5",
        "transactions": [[v2_package("bash", &base)]],
        "repos": { base.hash(): wire_repo(&base) },
        "sbom": {"spdxVersion": "SPDX-2.3"},
    });
    let helper = FakeHelper::new(Probe::V2, &response.to_string(), "", 0);

    let chain = vec![PackageSet::new(["bash"]).with_repositories(vec![base])];
    let result = solver(&helper)
        .depsolve(&chain, Some(SbomType::Spdx))
        .await
        .unwrap();

    let request = helper.request().unwrap();
    assert_eq!(request["arguments"]["sbom"], json!({"type": "spdx"}));
    let sbom: Value = serde_json::from_str(result.sbom.unwrap().get()).unwrap();
    assert_eq!(sbom["spdxVersion"], "SPDX-2.3");
}

#[tokio::test]
async fn test_dump_v1_uses_request_repos() {
    let base = baseos();
    let response = json!([
        {
            "name": "zsh",
            "summary": "Z shell",
            "repo_id": base.hash(),
            "epoch": 0,
            "version": "5.8",
            "release": "9.el9",
            "arch": "x86_64",
            "buildtime": "2023-01-02T03:04:05Z",
            "license": "MIT",
        },
        {
            "name": "bash",
            "summary": "GNU Bourne Again shell",
            "repo_id": base.hash(),
            "epoch": 0,
            "version": "5.1",
            "release": "1.el9",
            "arch": "x86_64",
            "buildtime": "2023-01-02T03:04:05",
            "license": "GPLv3+",
        },
    ]);
    let helper = FakeHelper::new(Probe::V1Only, &response.to_string(), "", 0);

    let listing = solver(&helper).dump(&[base.clone()]).await.unwrap();

    let request = helper.request().unwrap();
    assert_eq!(request["command"], "dump");
    assert_eq!(request["arguments"]["repos"][0]["id"], base.hash());

    assert_eq!(listing.packages.len(), 2);
    assert_eq!(listing.repos.len(), 1);
    assert_eq!(listing.repos[0].id, base.hash());
    assert!(listing.packages.iter().all(|p| p.build_time.is_some()));
}

#[tokio::test]
async fn test_search_v2_sends_globs() {
    let base = baseos();
    let response = json!({
        "solver": "dnf5",
        "packages": [v2_package("python3-libs", &base)],
        "repos": { base.hash(): wire_repo(&base) },
    });
    let helper = FakeHelper::new(Probe::V2, &response.to_string(), "", 0);

    let globs = vec!["python3*".to_string()];
    let listing = solver(&helper).search(&[base], &globs).await.unwrap();

    let request = helper.request().unwrap();
    assert_eq!(request["command"], "search");
    assert_eq!(
        request["arguments"]["search"],
        json!({"latest": false, "packages": ["python3*"]})
    );
    assert_eq!(listing.packages.len(), 1);
    assert_eq!(listing.solver, "dnf5");
}

#[tokio::test]
async fn test_unknown_repo_id_in_answer() {
    let base = baseos();
    let mut pkg = v2_package("bash", &base);
    pkg["repo_id"] = json!("nosuchrepo");
    let response = json!({
        "solver": "dnf5",
        "transactions": [[pkg]],
        "repos": { base.hash(): wire_repo(&base) },
    });
    let helper = FakeHelper::new(Probe::V2, &response.to_string(), "", 0);

    let chain = vec![PackageSet::new(["bash"]).with_repositories(vec![base])];
    let err = solver(&helper).depsolve(&chain, None).await.unwrap_err();
    assert!(err.is_internal());
    assert!(err.to_string().contains("nosuchrepo"));
}
