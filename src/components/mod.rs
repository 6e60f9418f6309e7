// src/components/mod.rs

//! Runtime component model
//!
//! A `Component` is one selectable unit in the install tree. Components are
//! created from catalog packages or from installed-package records and live in
//! an arena (`ComponentSet`) indexed by key. Parent/child links and
//! replacement relations are stored as keys, never as owning pointers.
//!
//! # Keys
//!
//! The key of a component is its tree-name when one is declared, otherwise its
//! name. Dots in a key describe the tree position: `org.app.docs` is a child
//! of `org.app`.
//!
//! # Usage
//!
//! ```ignore
//! use installkit::components::{ComponentSet, ComponentTree};
//!
//! let set = installkit::catalog::merge_all(&catalog, &installed, &AcceptAll)?;
//! let mut tree = ComponentTree::build(set, Role::Installer)?;
//! tree.select("org.app.docs", Role::Installer)?;
//! ```

mod tree;

pub use tree::{ComponentTree, Replacement};

use crate::catalog::{Package, UninstallPath};
use crate::error::{Error, Result};
use crate::installed::LocalPackage;
use crate::operation::Operation;
use crate::version::ComponentVersion;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Planned action for a component in the current run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InstallAction {
    /// Installed and stays installed
    KeepInstalled,
    /// Not installed and stays that way
    #[default]
    KeepUninstalled,
    /// Will be installed (or reinstalled as an update)
    Install,
    /// Will be removed
    Uninstall,
}

impl fmt::Display for InstallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallAction::KeepInstalled => write!(f, "keep-installed"),
            InstallAction::KeepUninstalled => write!(f, "keep-uninstalled"),
            InstallAction::Install => write!(f, "install"),
            InstallAction::Uninstall => write!(f, "uninstall"),
        }
    }
}

/// A node in the runtime install tree
#[derive(Debug, Clone)]
pub struct Component {
    pub key: String,
    pub name: String,
    pub tree_name: Option<String>,
    pub display_name: String,
    pub description: String,
    pub version: ComponentVersion,
    /// Version shown to the user, resolved through `inherit_version`
    pub display_version: ComponentVersion,
    pub release_date: Option<NaiveDate>,
    pub dependencies: Vec<String>,
    pub auto_dependencies: Vec<String>,
    pub replaces: Vec<String>,
    pub essential: bool,
    pub forced_update: bool,
    pub forced_installation: bool,
    pub is_virtual: bool,
    pub checkable: bool,
    pub default_selected: bool,
    pub requires_admin: bool,
    pub sorting_priority: i64,
    pub inherit_version: Option<String>,
    pub content_sha1: Option<String>,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub archives: Vec<String>,
    /// Operation templates instantiated at install time
    pub operations: Vec<Operation>,
    pub uninstall_paths: Vec<UninstallPath>,

    pub parent: Option<String>,
    pub children: Vec<String>,

    pub installed: bool,
    pub installed_version: Option<ComponentVersion>,
    pub last_update_date: Option<NaiveDate>,
    /// Created from an installed record with no catalog entry
    pub local_only: bool,
    /// Intermediate node created to complete the dotted tree
    pub synthetic: bool,

    pub enabled: bool,
    pub selected: bool,
    pub update_requested: bool,
    pub uninstall_requested: bool,
    pub action: InstallAction,
}

impl Component {
    /// Create a component from a catalog package
    pub fn from_package(package: &Package) -> Self {
        let key = package
            .tree_name
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| package.name.clone());

        Self {
            key,
            name: package.name.clone(),
            tree_name: package.tree_name.clone().filter(|t| !t.is_empty()),
            display_name: package.display_name.clone(),
            description: package.description.clone(),
            version: package.version.clone(),
            display_version: package.version.clone(),
            release_date: package.release_date,
            dependencies: package.dependencies.clone(),
            auto_dependencies: package.auto_dependencies.clone(),
            replaces: package.replaces.clone(),
            essential: package.essential,
            forced_update: package.forced_update,
            forced_installation: package.forced_installation,
            is_virtual: package.is_virtual,
            checkable: package.checkable,
            default_selected: package.default,
            requires_admin: package.requires_admin,
            sorting_priority: package.sorting_priority,
            inherit_version: package.inherit_version.clone(),
            content_sha1: package.content_sha1.clone(),
            uncompressed_size: package.uncompressed_size,
            compressed_size: package.compressed_size,
            archives: package.archives.clone(),
            operations: package.operations.clone(),
            uninstall_paths: package.uninstall_paths.clone(),
            parent: None,
            children: Vec::new(),
            installed: false,
            installed_version: None,
            last_update_date: None,
            local_only: false,
            synthetic: false,
            enabled: true,
            selected: false,
            update_requested: false,
            uninstall_requested: false,
            action: InstallAction::KeepUninstalled,
        }
    }

    /// Create a placeholder from an installed-package record
    pub fn from_local(local: &LocalPackage) -> Self {
        let key = local
            .tree_name
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| local.name.clone());

        Self {
            key,
            name: local.name.clone(),
            tree_name: local.tree_name.clone().filter(|t| !t.is_empty()),
            display_name: local.display_name.clone(),
            description: local.description.clone(),
            version: local.version.clone(),
            display_version: local.version.clone(),
            release_date: None,
            dependencies: local.dependencies.clone(),
            auto_dependencies: local.auto_dependencies.clone(),
            replaces: Vec::new(),
            essential: false,
            forced_update: false,
            forced_installation: local.forced_installation,
            is_virtual: local.is_virtual,
            checkable: local.checkable,
            default_selected: false,
            requires_admin: false,
            sorting_priority: 0,
            inherit_version: local.inherit_version.clone(),
            content_sha1: local.content_sha1.clone(),
            uncompressed_size: local.uncompressed_size,
            compressed_size: 0,
            archives: Vec::new(),
            operations: Vec::new(),
            uninstall_paths: Vec::new(),
            parent: None,
            children: Vec::new(),
            installed: true,
            installed_version: Some(local.version.clone()),
            last_update_date: local.last_update_date,
            local_only: true,
            synthetic: false,
            enabled: true,
            selected: true,
            update_requested: false,
            uninstall_requested: false,
            action: InstallAction::KeepInstalled,
        }
    }

    /// Create a virtual, non-checkable intermediate node
    pub fn synthetic(key: impl Into<String>) -> Self {
        let key = key.into();
        let package = Package {
            name: key.clone(),
            display_name: key.clone(),
            is_virtual: true,
            checkable: false,
            ..Default::default()
        };
        let mut component = Self::from_package(&package);
        component.synthetic = true;
        component
    }

    /// Record that this component is present in the installed registry
    pub fn mark_installed_from(&mut self, local: &LocalPackage) {
        self.installed = true;
        self.installed_version = Some(local.version.clone());
        self.last_update_date = local.last_update_date;
        self.selected = true;
        self.action = InstallAction::KeepInstalled;
    }

    /// Whether the user asked to install this component in this run
    pub fn is_selected_for_installation(&self) -> bool {
        self.enabled && (self.selected || self.forced_installation) && !self.installed
    }

    /// Whether an installed component needs its operations rerun
    pub fn needs_reinstall(&self) -> bool {
        self.installed && self.update_requested
    }

    /// Parent key derived from the dotted component key
    pub fn parent_key(&self) -> Option<&str> {
        self.key.rsplit_once('.').map(|(parent, _)| parent)
    }

    /// Whether `name` refers to this component by key or by name
    pub fn answers_to(&self, name: &str) -> bool {
        self.key == name || self.name == name
    }
}

/// Ordered, key-unique working set of components
///
/// Iteration follows declaration order, which breaks ties during resolution.
#[derive(Debug, Clone, Default)]
pub struct ComponentSet {
    order: Vec<String>,
    map: HashMap<String, Component>,
}

impl ComponentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a component, failing if its key is already taken
    pub fn insert(&mut self, component: Component) -> Result<()> {
        if self.map.contains_key(&component.key) {
            return Err(Error::DuplicateComponentKey(component.key));
        }
        self.order.push(component.key.clone());
        self.map.insert(component.key.clone(), component);
        Ok(())
    }

    /// Remove a component, keeping the order of the rest
    pub fn remove(&mut self, key: &str) -> Option<Component> {
        let component = self.map.remove(key)?;
        self.order.retain(|k| k != key);
        Some(component)
    }

    pub fn get(&self, key: &str) -> Option<&Component> {
        self.map.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Component> {
        self.map.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Find a component by key, falling back to its plain name
    pub fn find(&self, name: &str) -> Option<&Component> {
        self.map
            .get(name)
            .or_else(|| self.iter().find(|c| c.name == name))
    }

    pub fn keys(&self) -> &[String] {
        &self.order
    }

    /// Components in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.order.iter().filter_map(|k| self.map.get(k))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Declaration position of a key
    pub fn position(&self, key: &str) -> Option<usize> {
        self.order.iter().position(|k| k == key)
    }
}
