// src/catalog/merge.rs

//! Merging remote packages with installed records
//!
//! Produces the working `ComponentSet` for a run. What enters the set depends
//! on the role: installers and package managers see the whole catalog plus
//! installed leftovers, updaters only see real updates (plus installed
//! components as dependency placeholders), and uninstallers only see what is
//! installed.

use super::{Package, PackageFilter};
use crate::components::{Component, ComponentSet};
use crate::error::{Error, Result};
use crate::installed::LocalPackage;
use crate::role::Role;
use crate::version::compare_versions;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Message reported when an essential update blocks the package manager
pub const FORCE_UPDATE_MESSAGE: &str =
    "There is an important update available, please run the updater first.";

/// Result of the essential/forced update gate
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FetchOutcome {
    #[default]
    Ready,
    /// An essential update must be installed before anything else
    ForceUpdate(String),
}

/// Output of a role-specific fetch
#[derive(Debug, Clone, Default)]
pub struct Fetched {
    pub set: ComponentSet,
    pub outcome: FetchOutcome,
    /// Keys of components that are genuine updates (update roles only)
    pub updates: Vec<String>,
    pub found_essential_update: bool,
}

/// Build the working set appropriate for `role`
pub fn fetch_components(
    role: Role,
    packages: &[Package],
    installed: &BTreeMap<String, LocalPackage>,
    filter: &dyn PackageFilter,
) -> Result<Fetched> {
    match role {
        Role::Installer | Role::OfflineGenerator => Ok(Fetched {
            set: merge_all(packages, installed, filter)?,
            ..Default::default()
        }),
        Role::PackageManager => {
            let set = merge_all(packages, installed, filter)?;
            let outcome = essential_gate(packages, installed);
            if let FetchOutcome::ForceUpdate(ref msg) = outcome {
                info!("{}", msg);
            }
            Ok(Fetched {
                set,
                outcome,
                ..Default::default()
            })
        }
        Role::Updater | Role::Reinstaller => fetch_updates(role, packages, installed, filter),
        Role::Uninstaller => {
            let mut set = ComponentSet::new();
            for local in installed.values() {
                set.insert(Component::from_local(local))?;
            }
            Ok(Fetched {
                set,
                ..Default::default()
            })
        }
    }
}

/// Merge the whole catalog with the installed records
///
/// Remote packages are keyed by tree-name (or name). Installed records that no
/// catalog entry covers become placeholders so they stay visible for removal.
pub fn merge_all(
    packages: &[Package],
    installed: &BTreeMap<String, LocalPackage>,
    filter: &dyn PackageFilter,
) -> Result<ComponentSet> {
    let mut set = ComponentSet::new();
    // name -> key of the remote component
    let mut remote_keys: HashMap<String, String> = HashMap::new();

    for package in packages {
        if !filter.is_valid_package(&package.name) {
            debug!("Skipping package {} rejected by filter", package.name);
            continue;
        }
        if remote_keys.contains_key(&package.name) {
            return Err(Error::DuplicateComponentKey(package.name.clone()));
        }
        let component = Component::from_package(package);
        remote_keys.insert(package.name.clone(), component.key.clone());
        set.insert(component)?;
    }

    for local in installed.values() {
        let local_tree = local.tree_name.as_deref().filter(|t| !t.is_empty());

        let Some(remote_key) = remote_keys.get(&local.name).cloned() else {
            // Installed but gone from the catalog
            let placeholder = Component::from_local(local);
            if set.contains(&placeholder.key) {
                return Err(Error::DuplicateComponentKey(placeholder.key));
            }
            set.insert(placeholder)?;
            continue;
        };

        let remote_tree = set
            .get(&remote_key)
            .and_then(|c| c.tree_name.clone());

        match (remote_tree.as_deref(), local_tree) {
            // Installed under a tree-name the catalog does not declare: keep the
            // installed position instead of moving the component.
            (None, Some(tree)) if tree != remote_key => {
                if let Some(mut component) = set.remove(&remote_key) {
                    if set.contains(tree) {
                        return Err(Error::DuplicateComponentKey(tree.to_string()));
                    }
                    debug!("Keeping {} at installed position {}", local.name, tree);
                    component.key = tree.to_string();
                    component.tree_name = Some(tree.to_string());
                    component.mark_installed_from(local);
                    set.insert(component)?;
                }
            }
            // Different explicit tree-names: the catalog entry wins
            (Some(remote), Some(tree)) if remote != tree => {
                debug!(
                    "Catalog tree-name {} overrides installed {} for {}",
                    remote, tree, local.name
                );
                if let Some(component) = set.get_mut(&remote_key) {
                    component.mark_installed_from(local);
                }
            }
            _ => {
                if let Some(component) = set.get_mut(&remote_key) {
                    component.mark_installed_from(local);
                }
            }
        }
    }

    debug!(
        "Merged {} packages and {} installed records into {} components",
        packages.len(),
        installed.len(),
        set.len()
    );
    Ok(set)
}

/// Whether `update` carries something new compared to the installed record
///
/// The content checksum decides when the catalog provides one, otherwise the
/// catalog version must be strictly greater.
pub fn package_needs_update(local: &LocalPackage, update: &Package) -> bool {
    match update.content_sha1.as_deref().filter(|s| !s.is_empty()) {
        Some(sha1) => local.content_sha1.as_deref() != Some(sha1),
        None => {
            compare_versions(update.version.as_str(), local.version.as_str()) == Ordering::Greater
        }
    }
}

/// Package-manager gate for essential and forced updates
///
/// An essential package that is not installed, or a newer essential/forced
/// update of an installed package, blocks the package manager until the
/// updater has run.
pub fn essential_gate(
    packages: &[Package],
    installed: &BTreeMap<String, LocalPackage>,
) -> FetchOutcome {
    let mut blocked = false;

    for update in packages {
        if !update.essential && !update.forced_update {
            continue;
        }

        let Some(local) = installed.get(&update.name) else {
            if update.essential {
                debug!("Essential package {} is not installed", update.name);
                blocked = true;
            }
            // Forced update of something not installed: nothing to do
            continue;
        };

        if !package_needs_update(local, update) {
            continue;
        }

        // A missing date orders before every real date
        if local.last_update_date >= update.release_date {
            continue;
        }

        debug!("Pending essential update for {}", update.name);
        blocked = true;
        break;
    }

    if blocked {
        FetchOutcome::ForceUpdate(FORCE_UPDATE_MESSAGE.to_string())
    } else {
        FetchOutcome::Ready
    }
}

/// Collect real updates for the updater and reinstaller roles
fn fetch_updates(
    role: Role,
    packages: &[Package],
    installed: &BTreeMap<String, LocalPackage>,
    filter: &dyn PackageFilter,
) -> Result<Fetched> {
    let mut set = ComponentSet::new();
    let mut updates = Vec::new();
    let mut found_essential_update = false;
    let mut without_update = installed.clone();
    let empty = LocalPackage::default();

    for update in packages {
        if !filter.is_valid_package(&update.name) {
            continue;
        }

        let mut valid = installed.contains_key(&update.name);
        if !valid {
            valid = update
                .replaces
                .iter()
                .any(|name| installed.contains_key(name.trim()));
        }
        // Essential packages may arrive without being installed (offline setups)
        if !valid && !update.essential {
            continue;
        }

        let local = installed.get(&update.name).unwrap_or(&empty);
        match role {
            Role::Reinstaller => {
                if local.last_update_date.is_some() && local.last_update_date == update.release_date
                {
                    continue;
                }
            }
            _ => {
                if !package_needs_update(local, update) {
                    continue;
                }
                if let (Some(updated), Some(released)) =
                    (local.last_update_date, update.release_date)
                {
                    if updated > released {
                        continue;
                    }
                }
            }
        }

        if update.essential || update.forced_update {
            found_essential_update = true;
        }

        let mut component = Component::from_package(update);
        if let Some(local) = installed.get(&update.name) {
            component.mark_installed_from(local);
        }
        component.selected = true;
        component.update_requested = true;
        without_update.remove(&update.name);
        updates.push(component.key.clone());
        set.insert(component)?;
    }

    // Installed components without an update take part as dependencies
    for local in without_update.values() {
        let placeholder = Component::from_local(local);
        if set.contains(&placeholder.key) {
            warn!(
                "Installed component {} collides with an update key, skipping",
                placeholder.key
            );
            continue;
        }
        set.insert(placeholder)?;
    }

    info!(
        "Found {} updates (essential: {})",
        updates.len(),
        found_essential_update
    );

    Ok(Fetched {
        set,
        outcome: FetchOutcome::Ready,
        updates,
        found_essential_update,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AcceptAll;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    fn installed(locals: Vec<LocalPackage>) -> BTreeMap<String, LocalPackage> {
        locals.into_iter().map(|p| (p.name.clone(), p)).collect()
    }

    #[test]
    fn test_merge_marks_installed_and_keeps_leftovers() {
        let packages = vec![Package::new("a", "2.0"), Package::new("b", "1.0")];
        let locals = installed(vec![LocalPackage::new("a", "1.0"), LocalPackage::new("gone", "0.5")]);

        let set = merge_all(&packages, &locals, &AcceptAll).unwrap();
        assert_eq!(set.keys(), ["a", "b", "gone"]);

        let a = set.get("a").unwrap();
        assert!(a.installed);
        assert_eq!(a.installed_version.as_ref().unwrap().as_str(), "1.0");
        assert_eq!(a.version.as_str(), "2.0");
        assert!(!set.get("b").unwrap().installed);
        assert!(set.get("gone").unwrap().local_only);
    }

    #[test]
    fn test_merge_duplicate_remote_fails() {
        let packages = vec![Package::new("a", "1.0"), Package::new("a", "2.0")];
        let err = merge_all(&packages, &BTreeMap::new(), &AcceptAll).unwrap_err();
        assert!(matches!(err, Error::DuplicateComponentKey(ref k) if k == "a"));
    }

    #[test]
    fn test_merge_tree_name_collision_fails() {
        let mut remapped = Package::new("x", "1.0");
        remapped.tree_name = Some("a".to_string());
        let packages = vec![Package::new("a", "1.0"), remapped];
        let err = merge_all(&packages, &BTreeMap::new(), &AcceptAll).unwrap_err();
        assert!(matches!(err, Error::DuplicateComponentKey(ref k) if k == "a"));
    }

    #[test]
    fn test_merge_filter_skips_packages() {
        let packages = vec![Package::new("a", "1.0"), Package::new("secret", "1.0")];
        let filter = |name: &str| name != "secret";
        let set = merge_all(&packages, &BTreeMap::new(), &filter).unwrap();
        assert_eq!(set.keys(), ["a"]);
    }

    #[test]
    fn test_merge_keeps_installed_tree_position() {
        let packages = vec![Package::new("tool", "2.0")];
        let mut local = LocalPackage::new("tool", "1.0");
        local.tree_name = Some("extras.tool".to_string());

        let set = merge_all(&packages, &installed(vec![local]), &AcceptAll).unwrap();
        assert_eq!(set.keys(), ["extras.tool"]);
        let tool = set.get("extras.tool").unwrap();
        assert!(tool.installed);
        assert_eq!(tool.version.as_str(), "2.0");
    }

    #[test]
    fn test_merge_remote_tree_name_wins() {
        let mut remote = Package::new("tool", "2.0");
        remote.tree_name = Some("new.place".to_string());
        let mut local = LocalPackage::new("tool", "1.0");
        local.tree_name = Some("old.place".to_string());

        let set = merge_all(&[remote], &installed(vec![local]), &AcceptAll).unwrap();
        assert_eq!(set.keys(), ["new.place"]);
        assert!(set.get("new.place").unwrap().installed);
    }

    #[test]
    fn test_needs_update_prefers_checksum() {
        let mut local = LocalPackage::new("a", "1.0");
        local.content_sha1 = Some("abc".to_string());

        let mut same = Package::new("a", "9.0");
        same.content_sha1 = Some("abc".to_string());
        assert!(!package_needs_update(&local, &same));

        let mut changed = Package::new("a", "1.0");
        changed.content_sha1 = Some("def".to_string());
        assert!(package_needs_update(&local, &changed));

        assert!(package_needs_update(&local, &Package::new("a", "1.1")));
        assert!(!package_needs_update(&local, &Package::new("a", "1.0")));
    }

    #[test]
    fn test_gate_blocks_missing_essential() {
        let mut essential = Package::new("maintenance", "1.0");
        essential.essential = true;
        let packages = vec![essential, Package::new("b", "2.0")];
        let locals = installed(vec![LocalPackage::new("b", "1.0")]);

        assert_eq!(
            essential_gate(&packages, &locals),
            FetchOutcome::ForceUpdate(FORCE_UPDATE_MESSAGE.to_string())
        );
    }

    #[test]
    fn test_gate_ignores_missing_forced_and_current() {
        let mut forced = Package::new("forced", "2.0");
        forced.forced_update = true;
        let mut essential = Package::new("core", "2.0");
        essential.essential = true;
        essential.release_date = date(2024, 1, 1);
        let mut local = LocalPackage::new("core", "1.0");
        local.last_update_date = date(2024, 2, 1);

        let outcome = essential_gate(&[forced, essential], &installed(vec![local]));
        assert_eq!(outcome, FetchOutcome::Ready);
    }

    #[test]
    fn test_gate_blocks_newer_essential() {
        let mut essential = Package::new("core", "2.0");
        essential.essential = true;
        essential.release_date = date(2024, 3, 1);
        let mut local = LocalPackage::new("core", "1.0");
        local.last_update_date = date(2024, 2, 1);

        let outcome = essential_gate(&[essential], &installed(vec![local]));
        assert!(matches!(outcome, FetchOutcome::ForceUpdate(_)));
    }

    #[test]
    fn test_gate_with_missing_dates() {
        let mut essential = Package::new("core", "2.0");
        essential.essential = true;
        essential.release_date = date(2024, 3, 1);

        // Never updated: older than any release
        let local = LocalPackage::new("core", "1.0");
        let outcome = essential_gate(&[essential.clone()], &installed(vec![local]));
        assert!(matches!(outcome, FetchOutcome::ForceUpdate(_)));

        // Undated release: not newer than a known update date
        essential.release_date = None;
        let mut local = LocalPackage::new("core", "1.0");
        local.last_update_date = date(2024, 2, 1);
        let outcome = essential_gate(&[essential.clone()], &installed(vec![local]));
        assert_eq!(outcome, FetchOutcome::Ready);

        // Neither side dated
        let local = LocalPackage::new("core", "1.0");
        let outcome = essential_gate(&[essential], &installed(vec![local]));
        assert_eq!(outcome, FetchOutcome::Ready);
    }

    #[test]
    fn test_updater_collects_only_updates() {
        let mut core = Package::new("core", "2.0");
        core.essential = true;
        let packages = vec![
            core,
            Package::new("app", "1.5"),
            Package::new("same", "1.0"),
            Package::new("not_installed", "1.0"),
        ];
        let locals = installed(vec![
            LocalPackage::new("core", "1.0"),
            LocalPackage::new("app", "1.0"),
            LocalPackage::new("same", "1.0"),
            LocalPackage::new("untouched", "3.0"),
        ]);

        let fetched = fetch_components(Role::Updater, &packages, &locals, &AcceptAll).unwrap();
        assert_eq!(fetched.updates, vec!["core".to_string(), "app".to_string()]);
        assert!(fetched.found_essential_update);
        assert!(fetched.set.get("same").unwrap().local_only);
        assert!(fetched.set.get("untouched").unwrap().local_only);
        assert!(fetched.set.get("not_installed").is_none());
        assert!(fetched.set.get("app").unwrap().update_requested);
    }

    #[test]
    fn test_updater_accepts_replacement_of_installed() {
        let mut new = Package::new("new", "1.0");
        new.replaces = vec!["old".to_string()];
        let locals = installed(vec![LocalPackage::new("old", "1.0")]);

        let fetched = fetch_components(Role::Updater, &[new], &locals, &AcceptAll).unwrap();
        assert_eq!(fetched.updates, vec!["new".to_string()]);
        assert!(fetched.set.contains("old"));
        assert!(!fetched.found_essential_update);
    }

    #[test]
    fn test_reinstaller_skips_same_release() {
        let mut pkg = Package::new("app", "1.0");
        pkg.release_date = date(2024, 1, 1);
        let mut local = LocalPackage::new("app", "1.0");
        local.last_update_date = date(2024, 1, 1);
        let locals = installed(vec![local]);

        let fetched =
            fetch_components(Role::Reinstaller, &[pkg.clone()], &locals, &AcceptAll).unwrap();
        assert!(fetched.updates.is_empty());

        pkg.release_date = date(2024, 6, 1);
        let fetched = fetch_components(Role::Reinstaller, &[pkg], &locals, &AcceptAll).unwrap();
        assert_eq!(fetched.updates, vec!["app".to_string()]);
    }

    #[test]
    fn test_uninstaller_sees_only_installed() {
        let locals = installed(vec![LocalPackage::new("a", "1.0")]);
        let fetched = fetch_components(
            Role::Uninstaller,
            &[Package::new("b", "1.0")],
            &locals,
            &AcceptAll,
        )
        .unwrap();
        assert_eq!(fetched.set.keys(), ["a"]);
    }
}
