// src/commands/depsolve.rs
//! Depsolve, dump and search commands

use crate::cli::SolverArgs;
use anyhow::{Context, Result};
use osimage::config::{expand_home, SolverSection};
use osimage::depsolve::load_repos;
use osimage::{ApiVersion, Arch, PackageSet, SbomType, Solver};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Build a solver from flags, falling back to the `[solver]` section
fn build_solver(args: &SolverArgs, config: &SolverSection) -> Result<Solver> {
    let arch = match &args.arch {
        Some(arch) => arch.clone(),
        None => Arch::host()?.to_string(),
    };
    let cache_dir = args
        .cache_dir
        .clone()
        .unwrap_or_else(|| expand_home(&config.cache_dir));
    let api_version = match &args.api_version {
        Some(version) => version.parse::<ApiVersion>()?,
        None => config.api_version,
    };
    let helper = if args.helper.is_empty() {
        config.helper.clone()
    } else {
        args.helper.clone()
    };

    let mut solver = Solver::new(&args.platform_id, &args.releasever, arch, cache_dir)
        .with_helper(helper)
        .with_api_version(api_version);
    if let Some(proxy) = args.proxy.as_ref().or(config.proxy.as_ref()) {
        solver.set_proxy(proxy.as_str());
    }
    if let Some(root_dir) = args.root_dir.as_ref().or(config.root_dir.as_ref()) {
        solver.set_root_dir(root_dir);
    }
    Ok(solver)
}

/// Pretty-print `value` as JSON to `output`, or stdout
fn write_output<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let mut data = serde_json::to_vec_pretty(value)?;
            data.push(b'\n');
            std::fs::write(path, data)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, value)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}

/// Depsolve the package set chain stored in `chain_path`
pub async fn cmd_depsolve(
    args: &SolverArgs,
    chain_path: &Path,
    sbom: Option<&str>,
    output: Option<&Path>,
    config: &SolverSection,
) -> Result<()> {
    let data = std::fs::read(chain_path)
        .with_context(|| format!("Failed to read {}", chain_path.display()))?;
    let chain: Vec<PackageSet> = serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse package sets in {}", chain_path.display()))?;
    let sbom = sbom.map(str::parse::<SbomType>).transpose()?;

    info!("Depsolving {} package set(s) from {}", chain.len(), chain_path.display());
    let solver = build_solver(args, config)?;
    let result = solver.depsolve(&chain, sbom).await?;

    write_output(&result, output)
}

/// Dump every package of the repositories stored in `repos_path`
pub async fn cmd_dump(
    args: &SolverArgs,
    repos_path: &Path,
    output: Option<&Path>,
    config: &SolverSection,
) -> Result<()> {
    let repos = load_repos(repos_path)?;
    let solver = build_solver(args, config)?;
    let listing = solver.dump(&repos).await?;
    write_output(&listing, output)
}

/// Search the repositories stored in `repos_path`
pub async fn cmd_search(
    args: &SolverArgs,
    repos_path: &Path,
    globs: &[String],
    output: Option<&Path>,
    config: &SolverSection,
) -> Result<()> {
    let repos = load_repos(repos_path)?;
    let solver = build_solver(args, config)?;
    let listing = solver.search(&repos, globs).await?;
    write_output(&listing, output)
}
