// src/repository/package.rs

//! Resolved packages as reported by the depsolve helper

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Package or header checksum
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: String,
    pub value: String,
}

impl Checksum {
    pub fn new(algorithm: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

impl FromStr for Checksum {
    type Err = Error;

    /// Parse the `<algorithm>:<value>` form
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((algorithm, value)) if !algorithm.is_empty() && !value.is_empty() => {
                Ok(Self::new(algorithm, value))
            }
            _ => Err(Error::ParseError(format!("invalid checksum {:?}", s))),
        }
    }
}

/// A relational dependency such as `bash = 5.1.8-9.el9` or `/bin/sh`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelDep {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub relationship: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl RelDep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn versioned(
        name: impl Into<String>,
        relationship: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            relationship: relationship.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for RelDep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.relationship.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{} {} {}", self.name, self.relationship, self.version)
        }
    }
}

/// A concrete RPM chosen by the solver, or listed by dump/search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Package {
    pub name: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub repo_id: String,

    /// Path relative to the repository root
    pub location: String,
    pub remote_locations: Vec<String>,
    pub checksum: Option<Checksum>,
    pub header_checksum: Option<Checksum>,

    pub license: String,
    pub summary: String,
    pub description: String,
    pub url: String,
    pub vendor: String,
    pub packager: String,
    pub build_time: Option<DateTime<Utc>>,
    pub download_size: u64,
    pub install_size: u64,
    pub group: String,
    pub source_rpm: String,
    pub reason: String,

    pub provides: Vec<RelDep>,
    pub requires: Vec<RelDep>,
    pub requires_pre: Vec<RelDep>,
    pub conflicts: Vec<RelDep>,
    pub obsoletes: Vec<RelDep>,
    pub regular_requires: Vec<RelDep>,
    pub recommends: Vec<RelDep>,
    pub suggests: Vec<RelDep>,
    pub enhances: Vec<RelDep>,
    pub supplements: Vec<RelDep>,

    pub files: Vec<String>,

    /// Secrets tag inherited from the owning repository
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<String>,
    pub check_gpg: bool,
    pub ignore_ssl: bool,
}

impl Package {
    /// `[epoch:]version-release.arch`, omitting a zero epoch
    pub fn evra(&self) -> String {
        if self.epoch == 0 {
            format!("{}-{}.{}", self.version, self.release, self.arch)
        } else {
            format!(
                "{}:{}-{}.{}",
                self.epoch, self.version, self.release, self.arch
            )
        }
    }

    /// `name-[epoch:]version-release.arch`
    pub fn nevra(&self) -> String {
        format!("{}-{}", self.name, self.evra())
    }

    /// First remote location, if any
    pub fn remote_location(&self) -> Option<&str> {
        self.remote_locations.first().map(String::as_str)
    }

    /// Total order on the full NEVRA
    pub fn cmp_nevra(&self, other: &Self) -> Ordering {
        (&self.name, self.epoch, &self.version, &self.release, &self.arch).cmp(&(
            &other.name,
            other.epoch,
            &other.version,
            &other.release,
            &other.arch,
        ))
    }

    fn same_nevra(&self, other: &Self) -> bool {
        self.cmp_nevra(other) == Ordering::Equal
    }
}

/// Sort packages by full NEVRA
pub fn sort_by_nevra(packages: &mut [Package]) {
    packages.sort_by(Package::cmp_nevra);
}

/// Drop later duplicates of the same NEVRA, keeping first-seen order
pub fn dedup_by_nevra(packages: Vec<Package>) -> Vec<Package> {
    let mut seen: Vec<Package> = Vec::with_capacity(packages.len());
    for pkg in packages {
        if !seen.iter().any(|p| p.same_nevra(&pkg)) {
            seen.push(pkg);
        }
    }
    seen
}

/// Flat list of packages from a dump or search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageList(pub Vec<Package>);

impl PackageList {
    pub fn new(packages: Vec<Package>) -> Self {
        Self(packages)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.0.iter()
    }

    /// First package with the given name
    pub fn get(&self, name: &str) -> Result<&Package> {
        self.0.iter().find(|p| p.name == name).ok_or_else(|| {
            Error::NotFound(format!("package {:?} not found in the Package list", name))
        })
    }

    /// Packages whose name matches any of the shell globs, in list order
    pub fn search<S: AsRef<str>>(&self, patterns: &[S]) -> Result<PackageList> {
        let globs = patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p.as_ref()).map_err(|e| {
                    Error::ParseError(format!("invalid glob {:?}: {}", p.as_ref(), e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PackageList(
            self.0
                .iter()
                .filter(|pkg| globs.iter().any(|g| g.matches(&pkg.name)))
                .cloned()
                .collect(),
        ))
    }
}

impl IntoIterator for PackageList {
    type Item = Package;
    type IntoIter = std::vec::IntoIter<Package>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<Vec<Package>> for PackageList {
    fn from(packages: Vec<Package>) -> Self {
        Self(packages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(name: &str, epoch: u32, version: &str, release: &str, arch: &str) -> Package {
        Package {
            name: name.into(),
            epoch,
            version: version.into(),
            release: release.into(),
            arch: arch.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_evra_and_nevra() {
        let tmux = pkg("tmux", 0, "3.3a", "3.fc38", "x86_64");
        assert_eq!(tmux.evra(), "3.3a-3.fc38.x86_64");
        assert_eq!(tmux.nevra(), "tmux-3.3a-3.fc38.x86_64");

        let grub = pkg("grub2", 1, "2.06", "94.fc38", "noarch");
        assert_eq!(grub.evra(), "1:2.06-94.fc38.noarch");
        assert_eq!(grub.nevra(), "grub2-1:2.06-94.fc38.noarch");
    }

    #[test]
    fn test_checksum_display_and_parse() {
        let sum = Checksum::new("sha256", "1234567890");
        assert_eq!(sum.to_string(), "sha256:1234567890");
        assert_eq!("sha256:1234567890".parse::<Checksum>().unwrap(), sum);
        assert!("sha256".parse::<Checksum>().is_err());
        assert!(":abc".parse::<Checksum>().is_err());
    }

    #[test]
    fn test_reldep_display() {
        assert_eq!(RelDep::new("/bin/sh").to_string(), "/bin/sh");
        assert_eq!(
            RelDep::versioned("bash", ">=", "5.0").to_string(),
            "bash >= 5.0"
        );
    }

    #[test]
    fn test_nevra_ordering() {
        let mut packages = vec![
            pkg("pkg-b", 0, "1.0", "1", "x86_64"),
            pkg("pkg-a", 1, "1.0", "1", "x86_64"),
            pkg("pkg-a", 0, "2.0", "1", "x86_64"),
            pkg("pkg-a", 0, "1.0", "1", "noarch"),
        ];
        sort_by_nevra(&mut packages);
        let order: Vec<String> = packages.iter().map(Package::nevra).collect();
        assert_eq!(
            order,
            vec![
                "pkg-a-1.0-1.noarch",
                "pkg-a-2.0-1.x86_64",
                "pkg-a-1:1.0-1.x86_64",
                "pkg-b-1.0-1.x86_64",
            ]
        );
    }

    #[test]
    fn test_dedup_keeps_first() {
        let mut first = pkg("bash", 0, "5.1", "1", "x86_64");
        first.repo_id = "baseos".into();
        let mut second = first.clone();
        second.repo_id = "appstream".into();

        let deduped = dedup_by_nevra(vec![first, pkg("zsh", 0, "5.9", "1", "x86_64"), second]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].repo_id, "baseos");
        assert_eq!(deduped[1].name, "zsh");
    }

    #[test]
    fn test_package_list_get() {
        let list = PackageList::new(vec![pkg("tmux", 0, "3.3a", "3.fc38", "x86_64")]);
        assert_eq!(list.get("tmux").unwrap().version, "3.3a");

        let err = list.get("vim").unwrap_err();
        assert_eq!(
            err.to_string(),
            "package \"vim\" not found in the Package list"
        );
    }

    #[test]
    fn test_package_list_search() {
        let list = PackageList::new(vec![
            pkg("package0", 0, "1", "1", "x86_64"),
            pkg("package1", 0, "1", "1", "x86_64"),
            pkg("package11", 0, "1", "1", "x86_64"),
            pkg("package2", 0, "1", "1", "x86_64"),
            pkg("other", 0, "1", "1", "x86_64"),
        ]);

        let found = list.search(&["package1*"]).unwrap();
        let names: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["package1", "package11"]);

        let found = list.search(&["package?", "other"]).unwrap();
        let names: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["package0", "package1", "package2", "other"]);

        assert!(list.search(&["nomatch*"]).unwrap().is_empty());
        assert!(list.search(&["[unclosed"]).is_err());
    }

    #[test]
    fn test_package_json_defaults() {
        let parsed: Package = serde_json::from_str(r#"{"name":"bash","epoch":1}"#).unwrap();
        assert_eq!(parsed.name, "bash");
        assert_eq!(parsed.epoch, 1);
        assert!(parsed.checksum.is_none());
        assert!(parsed.provides.is_empty());
    }
}
