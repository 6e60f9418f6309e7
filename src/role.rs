// src/role.rs

//! Run roles and their binary markers
//!
//! The same binary can act as installer, maintenance tool (uninstaller,
//! updater, package manager), reinstaller or offline generator. The role is
//! an explicit value passed through fetching, resolution and execution, and
//! is encoded in maintenance tool layouts as a fixed 64-bit marker.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trailing cookie identifying an installkit binary layout
pub const MAGIC_COOKIE: u64 = 0x494b_4954_c0de_f00d;

const INSTALLER_MARKER: u64 = 0x494b_4954_0000_0001;
const UNINSTALLER_MARKER: u64 = 0x494b_4954_0000_0002;
const UPDATER_MARKER: u64 = 0x494b_4954_0000_0003;
const PACKAGE_MANAGER_MARKER: u64 = 0x494b_4954_0000_0004;
const REINSTALLER_MARKER: u64 = 0x494b_4954_0000_0005;
const OFFLINE_GENERATOR_MARKER: u64 = 0x494b_4954_0000_0006;

/// What the current run does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    Installer,
    Uninstaller,
    Updater,
    PackageManager,
    Reinstaller,
    OfflineGenerator,
}

impl Role {
    /// Fixed layout marker for this role
    pub fn marker(self) -> u64 {
        match self {
            Role::Installer => INSTALLER_MARKER,
            Role::Uninstaller => UNINSTALLER_MARKER,
            Role::Updater => UPDATER_MARKER,
            Role::PackageManager => PACKAGE_MANAGER_MARKER,
            Role::Reinstaller => REINSTALLER_MARKER,
            Role::OfflineGenerator => OFFLINE_GENERATOR_MARKER,
        }
    }

    /// Decode a layout marker
    pub fn from_marker(marker: u64) -> Result<Self> {
        match marker {
            INSTALLER_MARKER => Ok(Role::Installer),
            UNINSTALLER_MARKER => Ok(Role::Uninstaller),
            UPDATER_MARKER => Ok(Role::Updater),
            PACKAGE_MANAGER_MARKER => Ok(Role::PackageManager),
            REINSTALLER_MARKER => Ok(Role::Reinstaller),
            OFFLINE_GENERATOR_MARKER => Ok(Role::OfflineGenerator),
            other => Err(Error::InvalidLayout(format!(
                "Unknown role marker {:#018x}",
                other
            ))),
        }
    }

    /// Roles that only touch components with a pending update
    pub fn is_update_only(self) -> bool {
        matches!(self, Role::Updater | Role::Reinstaller)
    }

    /// Roles that run against an existing installation
    pub fn is_maintenance(self) -> bool {
        matches!(
            self,
            Role::Uninstaller | Role::Updater | Role::PackageManager | Role::Reinstaller
        )
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Installer => write!(f, "installer"),
            Role::Uninstaller => write!(f, "uninstaller"),
            Role::Updater => write!(f, "updater"),
            Role::PackageManager => write!(f, "package-manager"),
            Role::Reinstaller => write!(f, "reinstaller"),
            Role::OfflineGenerator => write!(f, "offline-generator"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "installer" => Ok(Role::Installer),
            "uninstaller" => Ok(Role::Uninstaller),
            "updater" => Ok(Role::Updater),
            "package-manager" => Ok(Role::PackageManager),
            "reinstaller" => Ok(Role::Reinstaller),
            "offline-generator" => Ok(Role::OfflineGenerator),
            other => Err(Error::ParseError(format!("Unknown role '{}'", other))),
        }
    }
}
