// src/resolver/uninstall.rs

//! Uninstall closure
//!
//! Starts from the components the user asked to remove and pulls in the
//! installed components that depend (or auto-depend) on them. Anything the
//! install set still needs is protected, and protection cascades: if a
//! member stays, so does everything it depends on. Removal order puts
//! dependents before their dependencies.
//!
//! This pass never fails. Unparsable requirements are ignored and a cycle
//! inside the set falls back to declaration order.

use super::graph::DependencyGraph;
use crate::components::ComponentSet;
use crate::role::Role;
use crate::version::DependencyRequirement;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Keys the user asked to remove
pub fn components_marked_for_uninstallation(set: &ComponentSet) -> Vec<String> {
    set.iter()
        .filter(|c| c.installed && c.uninstall_requested)
        .map(|c| c.key.clone())
        .collect()
}

/// Resolve requirement strings to keys present in the set
fn resolved_keys(set: &ComponentSet, requirements: &[String]) -> Vec<String> {
    requirements
        .iter()
        .filter_map(|raw| DependencyRequirement::parse(raw).ok())
        .filter_map(|req| set.find(&req.name).map(|c| c.key.clone()))
        .collect()
}

/// Resolve the ordered uninstall set
///
/// `install_set` is the current output of the install resolver; none of its
/// members is ever removed.
pub fn resolve_uninstall(
    set: &ComponentSet,
    role: Role,
    requested: &[String],
    install_set: &HashSet<String>,
) -> Vec<String> {
    if role.is_update_only() {
        return Vec::new();
    }

    // Dependency edges among installed and to-be-installed components
    let mut depends_on: HashMap<String, Vec<String>> = HashMap::new();
    let mut auto_depends_on: HashMap<String, Vec<String>> = HashMap::new();
    for c in set.iter() {
        if c.installed || install_set.contains(&c.key) {
            depends_on.insert(c.key.clone(), resolved_keys(set, &c.dependencies));
            auto_depends_on.insert(c.key.clone(), resolved_keys(set, &c.auto_dependencies));
        }
    }

    let mut members: HashSet<String> = requested
        .iter()
        .filter(|k| set.get(k).is_some_and(|c| c.installed) && !install_set.contains(*k))
        .cloned()
        .collect();

    // Pull in installed dependents and auto-dependents
    let mut queue: Vec<String> = members.iter().cloned().collect();
    while let Some(member) = queue.pop() {
        for c in set.iter() {
            if !c.installed || members.contains(&c.key) || install_set.contains(&c.key) {
                continue;
            }
            let needs = |edges: &HashMap<String, Vec<String>>| {
                edges
                    .get(&c.key)
                    .is_some_and(|deps| deps.iter().any(|d| *d == member))
            };
            if needs(&depends_on) || needs(&auto_depends_on) {
                debug!("{} depends on {}, removing it too", c.key, member);
                members.insert(c.key.clone());
                queue.push(c.key.clone());
            }
        }
    }

    // Protect what remaining components still need, until nothing changes
    loop {
        let protected: Vec<String> = members
            .iter()
            .filter(|m| {
                depends_on.iter().any(|(owner, deps)| {
                    !members.contains(owner) && deps.iter().any(|d| d == *m)
                })
            })
            .cloned()
            .collect();
        if protected.is_empty() {
            break;
        }
        for key in protected {
            debug!("Keeping {}, still required", key);
            members.remove(&key);
        }
    }

    // Dependents first: an edge dependency -> dependent sorts the dependent earlier
    let mut graph = DependencyGraph::new();
    for key in set.keys() {
        if members.contains(key) {
            graph.add_node(key);
        }
    }
    for (owner, deps) in depends_on.iter().chain(auto_depends_on.iter()) {
        if !members.contains(owner) {
            continue;
        }
        for dep in deps {
            if members.contains(dep) {
                graph.add_edge(dep, owner);
            }
        }
    }

    match graph.topological_sort() {
        Ok(order) => order,
        Err(e) => {
            warn!("{}; removing in declaration order", e);
            set.keys()
                .iter()
                .filter(|k| members.contains(*k))
                .cloned()
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Package;
    use crate::components::Component;

    fn installed_set(specs: &[(&str, &[&str])]) -> ComponentSet {
        let mut set = ComponentSet::new();
        for (name, deps) in specs {
            let mut p = Package::new(*name, "1.0");
            p.dependencies = deps.iter().map(|d| d.to_string()).collect();
            let mut c = Component::from_package(&p);
            c.installed = true;
            set.insert(c).unwrap();
        }
        set
    }

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dependents_removed_first() {
        let set = installed_set(&[("base", &[]), ("lib", &["base"]), ("app", &["lib"])]);
        let order = resolve_uninstall(&set, Role::Uninstaller, &keys(&["base"]), &HashSet::new());
        assert_eq!(order, vec!["app", "lib", "base"]);
    }

    #[test]
    fn test_install_set_protects() {
        let set = installed_set(&[("base", &[]), ("lib", &["base"]), ("app", &["lib"])]);
        let install: HashSet<String> = keys(&["app"]).into_iter().collect();

        // app stays, so lib and base stay too
        let order = resolve_uninstall(&set, Role::PackageManager, &keys(&["base"]), &install);
        assert!(order.is_empty());

        let order = resolve_uninstall(&set, Role::PackageManager, &keys(&["app"]), &install);
        assert!(order.is_empty());
    }

    #[test]
    fn test_unrelated_requests_only() {
        let set = installed_set(&[("a", &[]), ("b", &[]), ("c", &["a"])]);
        let order = resolve_uninstall(&set, Role::PackageManager, &keys(&["b"]), &HashSet::new());
        assert_eq!(order, vec!["b"]);
    }

    #[test]
    fn test_auto_dependents_pulled_in() {
        let mut set = installed_set(&[("app", &[]), ("docs", &[])]);
        set.get_mut("docs").unwrap().auto_dependencies = vec!["app".into()];
        let order = resolve_uninstall(&set, Role::PackageManager, &keys(&["app"]), &HashSet::new());
        assert_eq!(order, vec!["docs", "app"]);
    }

    #[test]
    fn test_update_roles_remove_nothing() {
        let set = installed_set(&[("a", &[])]);
        assert!(resolve_uninstall(&set, Role::Updater, &keys(&["a"]), &HashSet::new()).is_empty());
    }

    #[test]
    fn test_cycle_degrades_to_declaration_order() {
        let set = installed_set(&[("x", &["y"]), ("y", &["x"])]);
        let order = resolve_uninstall(&set, Role::Uninstaller, &keys(&["y"]), &HashSet::new());
        assert_eq!(order, vec!["x", "y"]);
    }
}
