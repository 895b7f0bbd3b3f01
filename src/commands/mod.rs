// src/commands/mod.rs
//! Command handlers for the osimage CLI

mod aws;
mod boot;
mod depsolve;

pub use aws::{cmd_aws_check, cmd_aws_upload};
pub use boot::{
    cmd_boot_aws_setup, cmd_boot_aws_teardown, cmd_boot_azure_run, cmd_boot_azure_setup,
    cmd_boot_azure_teardown,
};
pub use depsolve::{cmd_depsolve, cmd_dump, cmd_search};

use crate::cli::Cli;
use anyhow::Result;
use clap::CommandFactory;
use clap_complete::Shell;
use tokio_util::sync::CancellationToken;

/// A token cancelled when the user hits Ctrl-C
pub(crate) fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });
    token
}

/// Write completions for `shell` to stdout
pub fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
    Ok(())
}
