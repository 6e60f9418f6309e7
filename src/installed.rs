// src/installed.rs

//! On-disk registry of installed packages
//!
//! The registry is the single source of truth for what is installed in a
//! target directory. Each entry records the package metadata together with
//! the ordered operations that installed it, so an uninstall or update can
//! undo exactly what was done. Operations that belong to the session rather
//! than to a component (the target directory itself) are kept separately.
//!
//! The file is JSON and is rewritten atomically (temp file in the same
//! directory, then rename) after every state change.

use crate::error::{Error, Result};
use crate::operation::Operation;
use crate::version::ComponentVersion;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Record of a package installed on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalPackage {
    pub name: String,
    pub version: ComponentVersion,
    pub tree_name: Option<String>,
    pub display_name: String,
    pub description: String,
    pub dependencies: Vec<String>,
    pub auto_dependencies: Vec<String>,
    pub forced_installation: bool,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    pub checkable: bool,
    pub inherit_version: Option<String>,
    pub content_sha1: Option<String>,
    pub uncompressed_size: u64,
    pub install_date: Option<NaiveDate>,
    pub last_update_date: Option<NaiveDate>,
    /// Operations that installed this package, in perform order
    pub operations: Vec<Operation>,
}

impl Default for LocalPackage {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: ComponentVersion::default(),
            tree_name: None,
            display_name: String::new(),
            description: String::new(),
            dependencies: Vec::new(),
            auto_dependencies: Vec::new(),
            forced_installation: false,
            is_virtual: false,
            checkable: true,
            inherit_version: None,
            content_sha1: None,
            uncompressed_size: 0,
            install_date: None,
            last_update_date: None,
            operations: Vec::new(),
        }
    }
}

impl LocalPackage {
    pub fn new(name: impl Into<String>, version: impl Into<ComponentVersion>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }
}

/// Serialized form of the registry file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryDocument {
    pub packages: BTreeMap<String, LocalPackage>,
    /// Session-owned operations (no component)
    pub detached_operations: Vec<Operation>,
}

/// Installed-package registry bound to a file
#[derive(Debug, Clone)]
pub struct InstalledRegistry {
    path: PathBuf,
    doc: RegistryDocument,
}

impl InstalledRegistry {
    /// Load the registry at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| {
                Error::IoError(format!("Failed to read registry {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&content).map_err(|e| {
                Error::ParseError(format!(
                    "Failed to parse registry {}: {}",
                    path.display(),
                    e
                ))
            })?
        } else {
            RegistryDocument::default()
        };

        debug!(
            "Loaded registry {} with {} packages",
            path.display(),
            doc.packages.len()
        );
        Ok(Self { path, doc })
    }

    /// Build a registry from already decoded contents
    pub fn from_document(path: impl Into<PathBuf>, doc: RegistryDocument) -> Self {
        Self {
            path: path.into(),
            doc,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &RegistryDocument {
        &self.doc
    }

    pub fn packages(&self) -> &BTreeMap<String, LocalPackage> {
        &self.doc.packages
    }

    pub fn get(&self, name: &str) -> Option<&LocalPackage> {
        self.doc.packages.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.doc.packages.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.doc.packages.is_empty() && self.doc.detached_operations.is_empty()
    }

    /// Insert or replace a package record
    pub fn add_package(&mut self, package: LocalPackage) {
        debug!("Registering package {} {}", package.name, package.version);
        self.doc.packages.insert(package.name.clone(), package);
    }

    pub fn remove_package(&mut self, name: &str) -> Option<LocalPackage> {
        self.doc.packages.remove(name)
    }

    /// Record a session-owned operation
    pub fn add_detached_operation(&mut self, operation: Operation) {
        self.doc.detached_operations.push(operation);
    }

    /// Append a performed operation to its owner's record
    ///
    /// Operations without an owner, or whose owner is not registered, are
    /// kept as session-owned.
    pub fn record_operation(&mut self, operation: Operation) {
        match self.doc.packages.get_mut(operation.component()) {
            Some(package) => package.operations.push(operation),
            None => {
                if !operation.component().is_empty() {
                    warn!(
                        "Recording {} for unregistered package {}",
                        operation.describe(),
                        operation.component()
                    );
                }
                self.doc.detached_operations.push(operation);
            }
        }
    }

    /// Forget an operation after it was undone
    ///
    /// A package whose last operation is removed is dropped from the registry.
    /// Returns the name of the dropped package, if any.
    pub fn remove_operation(&mut self, operation: &Operation) -> Option<String> {
        let owner = operation.component();
        let Some(package) = self.doc.packages.get_mut(owner) else {
            self.doc
                .detached_operations
                .retain(|op| op.sequence != operation.sequence);
            return None;
        };
        package.operations.retain(|op| op.sequence != operation.sequence);
        if package.operations.is_empty() {
            self.doc.packages.remove(owner);
            return Some(owner.to_string());
        }
        None
    }

    /// Every recorded operation in perform order
    pub fn all_operations(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self
            .doc
            .packages
            .values()
            .flat_map(|p| p.operations.iter().cloned())
            .chain(self.doc.detached_operations.iter().cloned())
            .collect();
        ops.sort_by_key(|op| op.sequence);
        ops
    }

    /// Sequence number for the next performed operation
    pub fn next_sequence(&self) -> u64 {
        self.all_operations()
            .last()
            .map_or(1, |op| op.sequence + 1)
    }

    /// Atomically write the registry to its file
    pub fn write_to_disk(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
            Error::IoError(format!("Failed to create temp file in {}: {}", dir.display(), e))
        })?;
        let json = serde_json::to_vec_pretty(&self.doc)
            .map_err(|e| Error::IoError(format!("Failed to serialize registry: {}", e)))?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| {
            Error::IoError(format!(
                "Failed to write registry {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(())
    }

    /// Remove the registry file
    pub fn delete_file(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            info!("Removed registry {}", self.path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationKind, keys};
    use tempfile::TempDir;

    fn op(component: &str, sequence: u64) -> Operation {
        let mut op = Operation::new(OperationKind::Mkdir, vec![format!("/tmp/{}", sequence)]);
        op.set_value(keys::COMPONENT, component);
        op.sequence = sequence;
        op
    }

    #[test]
    fn test_open_missing_is_empty() {
        let temp = TempDir::new().unwrap();
        let registry = InstalledRegistry::open(temp.path().join("components.json")).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.next_sequence(), 1);
    }

    #[test]
    fn test_write_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("components.json");

        let mut registry = InstalledRegistry::open(&path).unwrap();
        let mut pkg = LocalPackage::new("org.app", "1.2");
        pkg.operations = vec![op("org.app", 2), op("org.app", 3)];
        registry.add_package(pkg);
        registry.add_detached_operation(op("", 1));
        registry.write_to_disk().unwrap();

        let reloaded = InstalledRegistry::open(&path).unwrap();
        assert_eq!(reloaded.document(), registry.document());
        assert_eq!(reloaded.next_sequence(), 4);

        let sequences: Vec<u64> = reloaded.all_operations().iter().map(|o| o.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn test_remove_operation_drops_empty_package() {
        let temp = TempDir::new().unwrap();
        let mut registry = InstalledRegistry::open(temp.path().join("r.json")).unwrap();
        let mut pkg = LocalPackage::new("a", "1.0");
        pkg.operations = vec![op("a", 1), op("a", 2)];
        registry.add_package(pkg);

        assert_eq!(registry.remove_operation(&op("a", 2)), None);
        assert!(registry.contains("a"));
        assert_eq!(registry.remove_operation(&op("a", 1)), Some("a".to_string()));
        assert!(!registry.contains("a"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_record_operation_routes_by_owner() {
        let temp = TempDir::new().unwrap();
        let mut registry = InstalledRegistry::open(temp.path().join("r.json")).unwrap();
        registry.add_package(LocalPackage::new("a", "1.0"));

        registry.record_operation(op("a", 1));
        registry.record_operation(op("", 2));
        registry.record_operation(op("stray", 3));

        assert_eq!(registry.get("a").unwrap().operations.len(), 1);
        assert_eq!(registry.document().detached_operations.len(), 2);

        registry.remove_operation(&op("stray", 3));
        assert_eq!(registry.document().detached_operations.len(), 1);
    }

    #[test]
    fn test_delete_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("components.json");
        let registry = InstalledRegistry::open(&path).unwrap();
        registry.write_to_disk().unwrap();
        assert!(path.exists());
        registry.delete_file().unwrap();
        assert!(!path.exists());
    }
}
