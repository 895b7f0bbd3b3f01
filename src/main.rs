// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{AwsCommands, BootAwsCommands, BootAzureCommands, BootCommands, Cli, Commands};
use osimage::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(command) = cli.command else {
        println!("osimage {}", env!("CARGO_PKG_VERSION"));
        println!("Run 'osimage --help' for usage information");
        return Ok(());
    };

    if let Commands::Completions { shell } = command {
        return commands::cmd_completions(shell);
    }

    let config = Config::load_or_default(cli.config.as_deref())?;

    match command {
        Commands::Depsolve {
            solver,
            chain,
            sbom,
            output,
        } => {
            commands::cmd_depsolve(
                &solver,
                &chain,
                sbom.as_deref(),
                output.as_deref(),
                &config.solver,
            )
            .await
        }
        Commands::Dump {
            solver,
            repos,
            output,
        } => commands::cmd_dump(&solver, &repos, output.as_deref(), &config.solver).await,
        Commands::Search {
            solver,
            repos,
            globs,
            output,
        } => {
            commands::cmd_search(&solver, &repos, &globs, output.as_deref(), &config.solver)
                .await
        }

        Commands::Aws(AwsCommands::Check { aws }) => {
            if !commands::cmd_aws_check(&aws, &config.aws).await? {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Aws(AwsCommands::Upload {
            aws,
            name,
            arch,
            boot_mode,
            share_with,
            image,
        }) => {
            commands::cmd_aws_upload(
                &aws,
                &name,
                arch.as_deref(),
                boot_mode.as_deref(),
                &share_with,
                &image,
                &config.aws,
            )
            .await
        }

        Commands::Boot(BootCommands::Aws(BootAwsCommands::Setup {
            aws,
            resource_file,
            image_name,
            arch,
            boot_mode,
            username,
            ssh_pubkey,
            instance_type,
            image,
        })) => {
            commands::cmd_boot_aws_setup(
                &aws,
                &resource_file,
                &image_name,
                arch.as_deref(),
                boot_mode.as_deref(),
                username.as_deref(),
                ssh_pubkey.as_ref(),
                instance_type.as_deref(),
                &image,
                &config,
            )
            .await
        }
        Commands::Boot(BootCommands::Aws(BootAwsCommands::Teardown { aws, resource_file })) => {
            commands::cmd_boot_aws_teardown(&aws, &resource_file, &config).await
        }
        Commands::Boot(BootCommands::Azure(BootAzureCommands::Setup { args, local_image })) => {
            commands::cmd_boot_azure_setup(&args, local_image.as_deref(), &config).await
        }
        Commands::Boot(BootCommands::Azure(BootAzureCommands::Teardown { args })) => {
            commands::cmd_boot_azure_teardown(&args, &config).await
        }
        Commands::Boot(BootCommands::Azure(BootAzureCommands::Run {
            args,
            local_image,
            command,
        })) => commands::cmd_boot_azure_run(&args, &local_image, &command, &config).await,

        Commands::Completions { .. } => Ok(()),
    }
}
