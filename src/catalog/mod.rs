// src/catalog/mod.rs

//! Package catalogs and the merge into a component working set
//!
//! A catalog is the list of package descriptors published by a repository.
//! Catalog entries are immutable; merging them with the installed registry
//! (see `merge`) produces the `ComponentSet` the tree builder consumes.
//!
//! # Catalog format
//!
//! ```json
//! {
//!   "packages": [
//!     {
//!       "name": "org.app",
//!       "version": "1.2.0",
//!       "release_date": "2024-05-01",
//!       "dependencies": ["org.runtime>=2.0"],
//!       "operations": [
//!         { "kind": "copy", "arguments": ["@DownloadDir@/org.app/app.bin", "@TargetDir@/app.bin"] }
//!       ]
//!     }
//!   ]
//! }
//! ```

mod merge;

pub use merge::{
    FetchOutcome, Fetched, FORCE_UPDATE_MESSAGE, essential_gate, fetch_components, merge_all,
    package_needs_update,
};

use crate::error::{Error, Result};
use crate::operation::Operation;
use crate::version::ComponentVersion;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A remote package descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Package {
    pub name: String,
    /// Alternative tree position; becomes the component key when set
    pub tree_name: Option<String>,
    pub display_name: String,
    pub description: String,
    pub version: ComponentVersion,
    pub release_date: Option<NaiveDate>,
    pub dependencies: Vec<String>,
    pub auto_dependencies: Vec<String>,
    pub replaces: Vec<String>,
    pub essential: bool,
    pub forced_update: bool,
    pub forced_installation: bool,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    pub default: bool,
    pub checkable: bool,
    pub requires_admin: bool,
    pub sorting_priority: i64,
    pub inherit_version: Option<String>,
    pub content_sha1: Option<String>,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    /// Archive names fetched before installation
    pub archives: Vec<String>,
    pub operations: Vec<Operation>,
    pub uninstall_paths: Vec<UninstallPath>,
}

impl Default for Package {
    fn default() -> Self {
        Self {
            name: String::new(),
            tree_name: None,
            display_name: String::new(),
            description: String::new(),
            version: ComponentVersion::default(),
            release_date: None,
            dependencies: Vec::new(),
            auto_dependencies: Vec::new(),
            replaces: Vec::new(),
            essential: false,
            forced_update: false,
            forced_installation: false,
            is_virtual: false,
            default: false,
            checkable: true,
            requires_admin: false,
            sorting_priority: 0,
            inherit_version: None,
            content_sha1: None,
            uncompressed_size: 0,
            compressed_size: 0,
            archives: Vec::new(),
            operations: Vec::new(),
            uninstall_paths: Vec::new(),
        }
    }
}

impl Package {
    pub fn new(name: impl Into<String>, version: impl Into<ComponentVersion>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }
}

/// Extra path removed when its component is uninstalled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UninstallPath {
    pub path: String,
    /// Remove a directory recursively instead of entry by entry
    #[serde(default)]
    pub wipe: bool,
}

/// Gate deciding whether a package may be offered at all
///
/// Product-key and license checks plug in here.
pub trait PackageFilter {
    fn is_valid_package(&self, name: &str) -> bool;
}

/// Filter that accepts every package
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl PackageFilter for AcceptAll {
    fn is_valid_package(&self, _name: &str) -> bool {
        true
    }
}

impl<F> PackageFilter for F
where
    F: Fn(&str) -> bool,
{
    fn is_valid_package(&self, name: &str) -> bool {
        self(name)
    }
}

/// A repository's package list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub packages: Vec<Package>,
}

impl Catalog {
    pub fn new(packages: Vec<Package>) -> Self {
        Self { packages }
    }

    /// Parse a catalog from JSON
    pub fn from_json(content: &str) -> Result<Self> {
        let catalog: Catalog = serde_json::from_str(content)
            .map_err(|e| Error::ParseError(format!("Invalid catalog: {}", e)))?;
        for package in &catalog.packages {
            if package.name.trim().is_empty() {
                return Err(Error::ParseError(
                    "Catalog contains a package without a name".to_string(),
                ));
            }
        }
        Ok(catalog)
    }

    /// Load a catalog file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("Failed to read catalog {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }
}
