// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common arguments: depsolve helper settings
fn solver_args() -> Vec<Arg> {
    vec![
        Arg::new("platform_id")
            .long("platform-id")
            .value_name("ID")
            .required(true)
            .help("Module platform ID, e.g. platform:f40"),
        Arg::new("releasever")
            .long("releasever")
            .value_name("VERSION")
            .required(true)
            .help("Release version substituted for $releasever"),
        Arg::new("arch").long("arch").help("Target architecture (default: host)"),
        Arg::new("cache_dir")
            .long("cache-dir")
            .value_name("PATH")
            .help("Metadata cache directory"),
        Arg::new("helper")
            .long("helper")
            .value_name("ARG")
            .action(ArgAction::Append)
            .help("Helper command; repeat for leading arguments"),
        Arg::new("api_version")
            .long("api-version")
            .value_name("VERSION")
            .help("Helper API version: auto, 1 or 2"),
        Arg::new("proxy").long("proxy").help("Proxy for repository access"),
        Arg::new("root_dir")
            .long("root-dir")
            .value_name("PATH")
            .help("Use this root's repositories for package sets without any"),
    ]
}

/// Common arguments: AWS region and bucket
fn aws_args() -> Vec<Arg> {
    vec![
        Arg::new("region").long("region").help("AWS region"),
        Arg::new("bucket").long("bucket").help("S3 bucket for the intermediate upload"),
        Arg::new("endpoint_url")
            .long("endpoint-url")
            .value_name("URL")
            .help("Alternative service endpoint"),
    ]
}

/// Common argument: resource record file
fn resource_file_arg() -> Arg {
    Arg::new("resource_file")
        .short('r')
        .long("resourcefile")
        .default_value("resources.json")
        .help("Resource record written by setup and read by teardown")
}

/// Common arguments: Azure login and VM options
fn azure_args() -> Vec<Arg> {
    vec![
        Arg::new("client_id").long("client-id").help("Service principal client ID"),
        Arg::new("client_secret")
            .long("client-secret")
            .help("Service principal secret"),
        Arg::new("tenant").long("tenant").help("Azure tenant"),
        Arg::new("subscription").long("subscription").help("Azure subscription"),
        Arg::new("resource_group")
            .long("resource-group")
            .help("Resource group holding every created resource"),
        Arg::new("username").long("username").help("Admin user of the VM"),
        Arg::new("ssh_pubkey").long("ssh-pubkey").help("Public key installed for the user"),
        Arg::new("ssh_privkey").long("ssh-privkey").help("Private key used to reach the VM"),
        Arg::new("image").long("image").help("Boot an already registered image"),
        Arg::new("vm_name").long("vm-name").default_value("vm-name"),
        Arg::new("image_name").long("image-name").default_value("image-name"),
        Arg::new("size").long("size").help("VM size (default: per architecture)"),
        Arg::new("arch").long("arch").help("Image architecture (default: host)"),
        resource_file_arg(),
    ]
}

fn build_cli() -> Command {
    Command::new("osimage")
        .version(env!("CARGO_PKG_VERSION"))
        .author("osimage Contributors")
        .about("Depsolve package sets and ship OS images to the cloud")
        .subcommand_required(false)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log at debug level unless RUST_LOG says otherwise"),
        )
        .arg(Arg::new("config").long("config").value_name("PATH").help("Configuration file"))
        .subcommand(
            Command::new("depsolve")
                .about("Depsolve a chain of package sets")
                .args(solver_args())
                .arg(Arg::new("chain").required(true).help("JSON file with the package set chain"))
                .arg(Arg::new("sbom").long("sbom").value_name("TYPE").help("Also produce an SBOM"))
                .arg(Arg::new("output").short('o').long("output").help("Output file")),
        )
        .subcommand(
            Command::new("dump")
                .about("List every package available in a set of repositories")
                .args(solver_args())
                .arg(Arg::new("repos").long("repos").required(true).help("JSON repository list"))
                .arg(Arg::new("output").short('o').long("output").help("Output file")),
        )
        .subcommand(
            Command::new("search")
                .about("Search repositories for packages by name glob")
                .args(solver_args())
                .arg(Arg::new("repos").long("repos").required(true).help("JSON repository list"))
                .arg(
                    Arg::new("globs")
                        .required(true)
                        .action(ArgAction::Append)
                        .help("Package name globs"),
                )
                .arg(Arg::new("output").short('o').long("output").help("Output file")),
        )
        .subcommand(
            Command::new("aws")
                .about("AWS image uploads")
                .subcommand(
                    Command::new("check")
                        .about("Check region access, bucket existence and bucket write permission")
                        .args(aws_args()),
                )
                .subcommand(
                    Command::new("upload")
                        .about("Upload a raw disk image and register it as an AMI")
                        .args(aws_args())
                        .arg(Arg::new("name").long("name").required(true).help("AMI name"))
                        .arg(Arg::new("arch").long("arch").help("Target architecture"))
                        .arg(Arg::new("boot_mode").long("boot-mode").help("legacy, uefi or hybrid"))
                        .arg(
                            Arg::new("share_with")
                                .long("share-with")
                                .action(ArgAction::Append)
                                .help("Account IDs allowed to launch the image"),
                        )
                        .arg(Arg::new("image").required(true).help("Disk image to upload")),
                ),
        )
        .subcommand(
            Command::new("boot")
                .about("Boot a freshly built image on a cloud and tear it down again")
                .subcommand(
                    Command::new("aws")
                        .about("Boot on EC2")
                        .subcommand(
                            Command::new("setup")
                                .about("Upload and register an image, then start an instance")
                                .args(aws_args())
                                .arg(resource_file_arg())
                                .arg(Arg::new("image").required(true).help("Disk image to upload")),
                        )
                        .subcommand(
                            Command::new("teardown")
                                .about("Delete everything recorded by a previous setup")
                                .args(aws_args())
                                .arg(resource_file_arg()),
                        ),
                )
                .subcommand(
                    Command::new("azure")
                        .about("Boot on Azure")
                        .subcommand(
                            Command::new("setup")
                                .about("Upload an image if given, register it and start a VM")
                                .args(azure_args())
                                .arg(Arg::new("local_image").help("Local VHD to upload")),
                        )
                        .subcommand(
                            Command::new("teardown")
                                .about("Delete everything recorded by a previous setup")
                                .args(azure_args()),
                        )
                        .subcommand(
                            Command::new("run")
                                .about("Set up, run a command on the VM with local files copied over, tear down")
                                .args(azure_args())
                                .arg(Arg::new("local_image").required(true).help("Local VHD"))
                                .arg(
                                    Arg::new("command")
                                        .value_name("ARG")
                                        .required(true)
                                        .action(ArgAction::Append)
                                        .trailing_var_arg(true)
                                        .allow_hyphen_values(true)
                                        .help("Executable and its arguments; local files are copied over"),
                                ),
                        ),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(Arg::new("shell").required(true).help("bash, zsh, fish, elvish or powershell")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("osimage.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
