// src/depsolve/chain.rs

//! Depsolve chain planning
//!
//! A chain is an ordered list of package sets. Later sets may add
//! repositories but never drop one that an earlier set used, so every
//! transaction sees at least the repositories of the one before it.
//!
//! Planning validates the chain, deduplicates repositories by hash in
//! first-seen order, and assigns each transaction the hashes of its own
//! repositories.

use crate::error::{Error, Result};
use crate::repository::{PackageSet, RepoConfig};
use std::collections::HashSet;

/// One transaction of a planned chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionArgs {
    pub package_specs: Vec<String>,
    pub exclude_specs: Vec<String>,
    pub module_enable_specs: Vec<String>,
    /// Hashes into `ChainPlan::repos`
    pub repo_ids: Vec<String>,
    pub install_weak_deps: bool,
}

/// A validated chain ready for serialization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainPlan {
    /// Deduplicated repositories with `id` set to their hash
    pub repos: Vec<RepoConfig>,
    pub transactions: Vec<TransactionArgs>,
}

impl ChainPlan {
    /// Request repositories by hash, in plan order
    pub fn find_repo(&self, id: &str) -> Option<&RepoConfig> {
        self.repos.iter().find(|r| r.id == id)
    }

    /// Sources of every repository, for wrapping repo fetch errors
    pub fn source_urls(&self) -> Vec<String> {
        self.repos
            .iter()
            .filter_map(|r| r.source_url().map(str::to_string))
            .collect()
    }
}

/// Copy a repository for the wire: its ID becomes its content hash
pub fn wire_repo(repo: &RepoConfig) -> RepoConfig {
    RepoConfig {
        id: repo.hash(),
        ..repo.clone()
    }
}

/// Check that each step's repositories carry over into the next step
pub fn validate_chain(chain: &[PackageSet]) -> Result<()> {
    let hashes: Vec<Vec<(String, String)>> = chain
        .iter()
        .map(|set| {
            set.repositories
                .iter()
                .map(|r| (r.hash(), r.display_name()))
                .collect()
        })
        .collect();

    for (i, pair) in hashes.windows(2).enumerate() {
        let next: HashSet<&str> = pair[1].iter().map(|(h, _)| h.as_str()).collect();
        if let Some((_, name)) = pair[0].iter().find(|(h, _)| !next.contains(h.as_str())) {
            return Err(Error::ChainError(format!(
                "repository {:?} of transaction {} is missing from transaction {}",
                name,
                i,
                i + 1
            )));
        }
    }
    Ok(())
}

/// Validate a chain and turn it into a plan
///
/// A transaction without repositories is only allowed when a root directory
/// supplies host repository configuration.
pub fn plan_chain(chain: &[PackageSet], has_root_dir: bool) -> Result<ChainPlan> {
    for (i, set) in chain.iter().enumerate() {
        if set.repositories.is_empty() && !has_root_dir {
            return Err(Error::ChainError(format!(
                "transaction {} has no repositories and no root directory is set",
                i
            )));
        }
        for repo in &set.repositories {
            repo.validate()?;
        }
    }

    validate_chain(chain)?;

    let mut plan = ChainPlan::default();
    let mut seen = HashSet::new();

    for set in chain {
        let mut repo_ids = Vec::with_capacity(set.repositories.len());
        for repo in &set.repositories {
            let wire = wire_repo(repo);
            if seen.insert(wire.id.clone()) {
                plan.repos.push(wire.clone());
            }
            if !repo_ids.contains(&wire.id) {
                repo_ids.push(wire.id);
            }
        }

        plan.transactions.push(TransactionArgs {
            package_specs: set.include.clone(),
            exclude_specs: set.exclude.clone(),
            module_enable_specs: set.enabled_modules.clone(),
            repo_ids,
            install_weak_deps: set.install_weak_deps,
        });
    }

    Ok(plan)
}
