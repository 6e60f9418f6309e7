// src/resolver/mod.rs

//! Dependency resolution
//!
//! Pure graph algorithms over a `ComponentSet`: the install closure
//! (dependencies first) and the uninstall closure (dependents first).
//! Both orders break ties by catalog declaration order.

mod graph;
mod install;
mod plan;
mod uninstall;

pub use graph::DependencyGraph;
pub use install::{components_marked_for_installation, effective_version, resolve_install};
pub use plan::{InstallPlan, InstallReason};
pub use uninstall::{components_marked_for_uninstallation, resolve_uninstall};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Package;
    use crate::components::{Component, ComponentSet};
    use crate::role::Role;
    use std::collections::HashSet;

    /// Installing and removing never overlap, whatever is requested
    #[test]
    fn test_install_and_uninstall_disjoint() {
        let mut set = ComponentSet::new();
        for (name, deps) in [
            ("base", vec![]),
            ("lib", vec!["base"]),
            ("app", vec!["lib"]),
            ("tool", vec!["base"]),
        ] {
            let mut p = Package::new(name, "1.0");
            p.dependencies = deps.into_iter().map(String::from).collect();
            let mut c = Component::from_package(&p);
            c.installed = true;
            set.insert(c).unwrap();
        }
        set.get_mut("tool").unwrap().uninstall_requested = true;
        set.get_mut("base").unwrap().uninstall_requested = true;

        let inputs = components_marked_for_installation(&set, Role::PackageManager);
        let plan = resolve_install(&set, &inputs).unwrap();
        let install: HashSet<String> = plan.ordered.iter().cloned().collect();

        let requested = components_marked_for_uninstallation(&set);
        let removal = resolve_uninstall(&set, Role::PackageManager, &requested, &install);

        assert!(install.contains("base"));
        assert_eq!(removal, vec!["tool"]);
        assert!(removal.iter().all(|k| !install.contains(k)));
    }
}
