// src/components/tree.rs

//! Component tree construction and selection
//!
//! Builds the parent/child forest from dotted keys, detaches replaced
//! components, resolves display versions and applies the initial check state.

use super::{Component, ComponentSet, InstallAction};
use crate::error::{Error, Result};
use crate::role::Role;
use crate::version::ComponentVersion;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// A component detached from the tree because another one replaces it
#[derive(Debug, Clone)]
pub struct Replacement {
    /// Key of the replacing component
    pub by: String,
    /// The replaced component as it was before detaching
    pub component: Component,
}

/// Forest of components backed by a key-indexed arena
#[derive(Debug, Clone, Default)]
pub struct ComponentTree {
    components: ComponentSet,
    roots: Vec<String>,
    replacements: BTreeMap<String, Replacement>,
}

impl ComponentTree {
    /// Build the tree from a merged working set
    pub fn build(mut set: ComponentSet, role: Role) -> Result<Self> {
        let replacements = store_replaced(&mut set);
        add_intermediate_nodes(&mut set)?;

        let links: Vec<(String, String)> = set
            .iter()
            .filter_map(|c| c.parent_key().map(|p| (c.key.clone(), p.to_string())))
            .collect();
        for (child, parent) in links {
            if let Some(c) = set.get_mut(&child) {
                c.parent = Some(parent.clone());
            }
            if let Some(p) = set.get_mut(&parent) {
                p.children.push(child);
            }
        }

        verify_parent_chains(&set)?;

        let mut roots: Vec<String> = set
            .iter()
            .filter(|c| c.parent.is_none())
            .map(|c| c.key.clone())
            .collect();
        sort_by_priority(&mut roots, &set);

        let keys = set.keys().to_vec();
        for key in &keys {
            let mut children = set.get(key).map(|c| c.children.clone()).unwrap_or_default();
            sort_by_priority(&mut children, &set);
            if let Some(c) = set.get_mut(key) {
                c.children = children;
            }
        }

        for key in &keys {
            let display = display_version(&set, key);
            if let Some(c) = set.get_mut(key) {
                if c.checkable && c.default_selected && role == Role::Installer {
                    c.selected = true;
                }
                if c.installed {
                    c.selected = true;
                    c.action = InstallAction::KeepInstalled;
                }
                c.display_version = display;
            }
        }

        debug!(
            "Built component tree: {} components, {} roots, {} replaced",
            set.len(),
            roots.len(),
            replacements.len()
        );

        Ok(Self {
            components: set,
            roots,
            replacements,
        })
    }

    pub fn components(&self) -> &ComponentSet {
        &self.components
    }

    pub fn get(&self, key: &str) -> Option<&Component> {
        self.components.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Component> {
        self.components.get_mut(key)
    }

    /// Look a component up by key or plain name
    pub fn find(&self, name: &str) -> Option<&Component> {
        self.components.find(name)
    }

    /// Root keys sorted by descending priority
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn children(&self, key: &str) -> &[String] {
        self.components
            .get(key)
            .map(|c| c.children.as_slice())
            .unwrap_or(&[])
    }

    /// Replaced components keyed by their name
    pub fn replacements(&self) -> &BTreeMap<String, Replacement> {
        &self.replacements
    }

    pub fn replacement_for(&self, name: &str) -> Option<&Replacement> {
        self.replacements.get(name)
    }

    /// Mark a component (and its checkable descendants) for installation
    ///
    /// In update roles, selecting a catalog component requests its update.
    pub fn select(&mut self, key: &str, role: Role) -> Result<()> {
        let component = self
            .components
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("Component {}", key)))?;
        if !component.checkable || !component.enabled {
            return Err(Error::InvalidSelection(format!(
                "Component {} cannot be selected",
                key
            )));
        }

        for k in self.subtree(key) {
            if let Some(c) = self.components.get_mut(&k) {
                if !c.enabled || (!c.checkable && k != key && !c.synthetic) {
                    continue;
                }
                if role.is_update_only() {
                    c.update_requested = !c.local_only;
                }
                c.selected = true;
                c.uninstall_requested = false;
            }
        }
        Ok(())
    }

    /// Unmark a component (and its descendants)
    ///
    /// In package-manager mode an installed component becomes a removal request.
    pub fn deselect(&mut self, key: &str, role: Role) -> Result<()> {
        let component = self
            .components
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("Component {}", key)))?;
        if component.forced_installation {
            return Err(Error::InvalidSelection(format!(
                "Component {} is forced and cannot be deselected",
                key
            )));
        }
        if !component.checkable || !component.enabled {
            return Err(Error::InvalidSelection(format!(
                "Component {} cannot be deselected",
                key
            )));
        }

        for k in self.subtree(key) {
            if let Some(c) = self.components.get_mut(&k) {
                if c.forced_installation {
                    continue;
                }
                if role.is_update_only() {
                    c.update_requested = false;
                    continue;
                }
                c.selected = false;
                if c.installed && role != Role::Installer {
                    c.uninstall_requested = true;
                }
            }
        }
        Ok(())
    }

    /// Restrict an update run to its essential and forced updates
    ///
    /// Every other update is disabled and unchecked; the remaining ones stay
    /// checked but can no longer be toggled.
    pub fn restrict_to_essential_updates(&mut self, update_keys: &[String]) {
        for key in update_keys {
            if let Some(c) = self.components.get_mut(key) {
                c.checkable = false;
                if c.essential || c.forced_update {
                    c.enabled = true;
                    c.selected = true;
                    c.update_requested = true;
                } else {
                    c.enabled = false;
                    c.selected = false;
                    c.update_requested = false;
                }
            }
        }
    }

    pub fn set_action(&mut self, key: &str, action: InstallAction) {
        if let Some(c) = self.components.get_mut(key) {
            c.action = action;
        }
    }

    /// A key followed by all of its descendants, depth first
    fn subtree(&self, key: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![key.to_string()];
        let mut seen = HashSet::new();
        while let Some(k) = stack.pop() {
            if !seen.insert(k.clone()) {
                continue;
            }
            stack.extend(self.children(&k).iter().rev().cloned());
            out.push(k);
        }
        out
    }
}

/// Take replaced components out of the working set
fn store_replaced(set: &mut ComponentSet) -> BTreeMap<String, Replacement> {
    let mut replacements = BTreeMap::new();
    let keys = set.keys().to_vec();

    for key in keys {
        let replaces = match set.get(&key) {
            Some(c) if !c.replaces.is_empty() => c.replaces.clone(),
            _ => continue,
        };

        for name in replaces.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            if replacements.contains_key(name) {
                warn!(
                    "Component {} is already replaced, ignoring replacement by {}",
                    name, key
                );
                continue;
            }
            let target = match set.find(name) {
                Some(c) if c.key != key => c.key.clone(),
                Some(_) => continue,
                None => {
                    warn!("Cannot find replaced component {} for {}", name, key);
                    continue;
                }
            };
            if let Some(component) = set.remove(&target) {
                debug!("Component {} replaced by {}", name, key);
                replacements.insert(
                    name.to_string(),
                    Replacement {
                        by: key.clone(),
                        component,
                    },
                );
            }
        }
    }
    replacements
}

/// Create virtual nodes for dotted prefixes that have no component
fn add_intermediate_nodes(set: &mut ComponentSet) -> Result<()> {
    let keys = set.keys().to_vec();
    for key in keys {
        let mut current = key.as_str();
        while let Some((parent, _)) = current.rsplit_once('.') {
            if parent.is_empty() || set.contains(parent) {
                break;
            }
            set.insert(Component::synthetic(parent))?;
            current = parent;
        }
    }
    Ok(())
}

fn verify_parent_chains(set: &ComponentSet) -> Result<()> {
    for component in set.iter() {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        let mut current = Some(component.key.as_str());
        while let Some(key) = current {
            path.push(key.to_string());
            if !visited.insert(key) {
                return Err(Error::CyclicDependency(path));
            }
            current = set.get(key).and_then(|c| c.parent.as_deref());
        }
    }
    Ok(())
}

fn sort_by_priority(keys: &mut [String], set: &ComponentSet) {
    keys.sort_by_key(|k| Reverse(set.get(k).map_or(0, |c| c.sorting_priority)));
}

/// Follow `inherit_version` links to the version a component displays
fn display_version(set: &ComponentSet, key: &str) -> ComponentVersion {
    let Some(start) = set.get(key) else {
        return ComponentVersion::default();
    };

    let mut visited = HashSet::new();
    visited.insert(start.name.clone());
    let mut current = start;
    while let Some(target) = current.inherit_version.as_deref().filter(|t| !t.is_empty()) {
        if !visited.insert(target.to_string()) {
            warn!("Cycle in inherited versions of {}, using own version", key);
            return shown_version(start);
        }
        match set.find(target) {
            Some(next) => current = next,
            None => {
                warn!("Component {} inherits version from missing {}", key, target);
                break;
            }
        }
    }
    shown_version(current)
}

fn shown_version(component: &Component) -> ComponentVersion {
    component
        .installed_version
        .clone()
        .unwrap_or_else(|| component.version.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Package;

    fn component(name: &str) -> Component {
        Component::from_package(&Package {
            name: name.to_string(),
            version: "1.0".into(),
            ..Default::default()
        })
    }

    fn set_of(components: Vec<Component>) -> ComponentSet {
        let mut set = ComponentSet::new();
        for c in components {
            set.insert(c).unwrap();
        }
        set
    }

    #[test]
    fn test_builds_parent_links_and_intermediates() {
        let set = set_of(vec![component("org.app"), component("org.app.docs.html")]);
        let tree = ComponentTree::build(set, Role::Installer).unwrap();

        let docs = tree.get("org.app.docs").expect("intermediate node created");
        assert!(docs.synthetic);
        assert!(!docs.checkable);
        assert_eq!(docs.parent.as_deref(), Some("org.app"));
        assert_eq!(tree.children("org.app.docs"), ["org.app.docs.html"]);
        assert_eq!(tree.roots(), ["org"]);
        assert_eq!(tree.children("org"), ["org.app"]);
    }

    #[test]
    fn test_roots_sorted_by_priority() {
        let mut low = component("low");
        low.sorting_priority = 1;
        let mut high = component("high");
        high.sorting_priority = 10;
        let plain = component("plain");
        let tree = ComponentTree::build(set_of(vec![low, plain, high]), Role::Installer).unwrap();
        assert_eq!(tree.roots(), ["high", "low", "plain"]);
    }

    #[test]
    fn test_replacement_detaches_component() {
        let mut new = component("new");
        new.replaces = vec!["old".into(), "missing".into()];
        let tree =
            ComponentTree::build(set_of(vec![component("old"), new]), Role::Installer).unwrap();

        assert!(tree.get("old").is_none());
        let replacement = tree.replacement_for("old").unwrap();
        assert_eq!(replacement.by, "new");
        assert_eq!(replacement.component.name, "old");
        assert!(tree.replacement_for("missing").is_none());
    }

    #[test]
    fn test_display_version_inheritance() {
        let mut base = component("base");
        base.version = "3.2".into();
        let mut addon = component("addon");
        addon.inherit_version = Some("base".into());
        let mut looped_a = component("loop_a");
        looped_a.inherit_version = Some("loop_b".into());
        let mut looped_b = component("loop_b");
        looped_b.inherit_version = Some("loop_a".into());
        looped_b.version = "9.9".into();

        let tree = ComponentTree::build(
            set_of(vec![base, addon, looped_a, looped_b]),
            Role::Installer,
        )
        .unwrap();
        assert_eq!(tree.get("addon").unwrap().display_version.as_str(), "3.2");
        assert_eq!(tree.get("loop_a").unwrap().display_version.as_str(), "1.0");
    }

    #[test]
    fn test_default_preselected_only_for_installer() {
        let mut c = component("app");
        c.default_selected = true;
        let tree = ComponentTree::build(set_of(vec![c.clone()]), Role::Installer).unwrap();
        assert!(tree.get("app").unwrap().selected);

        let tree = ComponentTree::build(set_of(vec![c]), Role::PackageManager).unwrap();
        assert!(!tree.get("app").unwrap().selected);
    }

    #[test]
    fn test_select_and_deselect_subtree() {
        let set = set_of(vec![component("app"), component("app.docs"), component("app.src")]);
        let mut tree = ComponentTree::build(set, Role::Installer).unwrap();

        tree.select("app", Role::Installer).unwrap();
        assert!(tree.get("app.docs").unwrap().selected);
        assert!(tree.get("app.src").unwrap().selected);

        tree.deselect("app.src", Role::Installer).unwrap();
        assert!(!tree.get("app.src").unwrap().selected);
        assert!(tree.get("app").unwrap().selected);

        assert!(matches!(
            tree.select("nope", Role::Installer),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_deselect_installed_requests_uninstall() {
        let mut c = component("app");
        c.installed = true;
        let mut tree = ComponentTree::build(set_of(vec![c]), Role::PackageManager).unwrap();
        tree.deselect("app", Role::PackageManager).unwrap();
        let app = tree.get("app").unwrap();
        assert!(app.uninstall_requested);
        assert!(!app.selected);
    }

    #[test]
    fn test_forced_cannot_be_deselected() {
        let mut c = component("core");
        c.forced_installation = true;
        let mut tree = ComponentTree::build(set_of(vec![c]), Role::Installer).unwrap();
        assert!(matches!(
            tree.deselect("core", Role::Installer),
            Err(Error::InvalidSelection(_))
        ));
    }

    #[test]
    fn test_parent_cycle_detected() {
        let mut a = component("a");
        a.parent = Some("b".into());
        let mut b = component("b");
        b.parent = Some("a".into());
        let set = set_of(vec![a, b]);
        let err = verify_parent_chains(&set).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency(_)));
    }
}
