// src/arch.rs

//! Machine architectures and their provider-specific names

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// CPU architecture of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// x86_64 / AMD64
    X86_64,
    /// AArch64 / ARM64
    Aarch64,
    /// 64-bit little-endian POWER
    Ppc64le,
    /// IBM Z
    S390x,
    /// RISC-V 64-bit
    Riscv64,
}

impl Arch {
    /// Architecture of the running host
    pub fn host() -> Result<Self> {
        std::env::consts::ARCH.parse()
    }

    /// Canonical RPM name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
            Self::Ppc64le => "ppc64le",
            Self::S390x => "s390x",
            Self::Riscv64 => "riscv64",
        }
    }

    /// Architecture name understood by EC2 `RegisterImage`
    pub fn ec2_name(&self) -> Result<&'static str> {
        match self {
            Self::X86_64 => Ok("x86_64"),
            Self::Aarch64 => Ok("arm64"),
            other => Err(Error::InvalidArch(format!(
                "ec2 doesn't support the following arch: {}",
                other
            ))),
        }
    }

    /// Architecture name of an Azure gallery image definition
    pub fn azure_name(&self) -> Result<&'static str> {
        match self {
            Self::X86_64 => Ok("x64"),
            Self::Aarch64 => Ok("Arm64"),
            other => Err(Error::InvalidArch(format!(
                "azure doesn't support the following arch: {}",
                other
            ))),
        }
    }

    /// Default Azure VM size for this architecture
    pub fn azure_default_vm_size(&self) -> Result<&'static str> {
        match self {
            Self::X86_64 => Ok("Standard_DS1_v2"),
            Self::Aarch64 => Ok("Standard_D2pls_v5"),
            other => Err(Error::InvalidArch(format!(
                "no default Azure VM size for architecture {:?}",
                other.as_str()
            ))),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Ok(Self::X86_64),
            "aarch64" | "arm64" => Ok(Self::Aarch64),
            "ppc64le" => Ok(Self::Ppc64le),
            "s390x" => Ok(Self::S390x),
            "riscv64" => Ok(Self::Riscv64),
            _ => Err(Error::InvalidArch(format!("unknown architecture {:?}", s))),
        }
    }
}
