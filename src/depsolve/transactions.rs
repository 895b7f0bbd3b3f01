// src/depsolve/transactions.rs

//! Per-transaction package layout of a depsolve result

use crate::error::{Error, Result};
use crate::repository::{sort_by_nevra, Package};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a file comes from: the first transaction and package that ship it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFileInfo<'a> {
    pub path: String,
    pub tx_index: usize,
    pub package: &'a Package,
}

/// Packages of each chain step, in chain order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionList(pub Vec<Vec<Package>>);

impl TransactionList {
    pub fn new(transactions: Vec<Vec<Package>>) -> Self {
        Self(transactions)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vec<Package>> {
        self.0.iter()
    }

    /// Every package of every transaction, sorted by NEVRA
    pub fn all_packages(&self) -> Vec<Package> {
        let mut all: Vec<Package> = self.0.iter().flatten().cloned().collect();
        sort_by_nevra(&mut all);
        all
    }

    /// First package with the given name, searching in chain order
    pub fn find_package(&self, name: &str) -> Result<&Package> {
        self.0
            .iter()
            .flatten()
            .find(|p| p.name == name)
            .ok_or_else(|| {
                Error::NotFound(format!("package {:?} not found in the transaction list", name))
            })
    }

    /// Map each path to the earliest transaction that installs it
    ///
    /// Paths no package ships are left out. Returns `None` for an empty
    /// path list.
    pub fn files_transaction_info(
        &self,
        paths: &[&str],
    ) -> Option<HashMap<String, TransactionFileInfo<'_>>> {
        if paths.is_empty() {
            return None;
        }

        let mut wanted: Vec<&str> = paths.to_vec();
        let mut found = HashMap::with_capacity(paths.len());

        'outer: for (tx_index, tx) in self.0.iter().enumerate() {
            for package in tx {
                for file in &package.files {
                    if let Some(pos) = wanted.iter().position(|p| *p == file.as_str()) {
                        let path = wanted.swap_remove(pos).to_string();
                        found.insert(
                            path.clone(),
                            TransactionFileInfo {
                                path,
                                tx_index,
                                package,
                            },
                        );
                        if wanted.is_empty() {
                            break 'outer;
                        }
                    }
                }
            }
        }

        Some(found)
    }
}

impl From<Vec<Vec<Package>>> for TransactionList {
    fn from(transactions: Vec<Vec<Package>>) -> Self {
        Self(transactions)
    }
}
