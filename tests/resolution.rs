// tests/resolution.rs

//! Install and uninstall resolution through a session.

mod common;

use common::{Sandbox, install, package_with_deps, resolve};
use installkit::version::DependencyRequirement;
use installkit::{Error, InstallReason, Package, Role};
use std::collections::HashSet;

fn catalog() -> Vec<Package> {
    vec![
        package_with_deps("app", "1.0", &["lib", "runtime>=2.0"]),
        package_with_deps("lib", "1.4", &["runtime"]),
        package_with_deps("runtime", "2.1", &[]),
        package_with_deps("docs", "1.0", &["app"]),
        package_with_deps("extras", "1.0", &[]),
    ]
}

/// No key appears before any of its dependencies
fn assert_topological(packages: &[Package], ordered: &[String]) {
    for (index, key) in ordered.iter().enumerate() {
        let package = packages.iter().find(|p| &p.name == key).unwrap();
        for dep in &package.dependencies {
            let name = DependencyRequirement::parse(dep).unwrap().name;
            let position = ordered.iter().position(|k| *k == name).unwrap_or_else(|| {
                panic!("{} is missing its dependency {}", key, name);
            });
            assert!(position < index, "{} installed before {}", key, name);
        }
    }
}

#[test]
fn test_install_order_is_topological() {
    let sandbox = Sandbox::new();
    let packages = catalog();

    for selection in [&["app"][..], &["docs"], &["lib", "extras"], &["docs", "runtime"]] {
        let mut session = sandbox.open(Role::Installer);
        let (plan, _) = resolve(&mut session, &packages, selection, &[]);
        assert!(plan.is_ok(), "{:?}", plan.error);
        assert_topological(&packages, &plan.ordered);
        for key in selection {
            assert!(plan.contains(key));
        }
    }
}

#[test]
fn test_install_reasons() {
    let sandbox = Sandbox::new();
    let mut session = sandbox.open(Role::Installer);
    let (plan, _) = resolve(&mut session, &catalog(), &["docs"], &[]);

    assert_eq!(plan.ordered, vec!["runtime", "lib", "app", "docs"]);
    assert_eq!(session.install_reason("docs"), Some(InstallReason::Selected));
    assert_eq!(
        session.install_reason("app"),
        Some(InstallReason::Dependency("docs".into()))
    );
    assert_eq!(session.install_reason("extras"), None);
}

#[test]
fn test_missing_dependency_is_reported() {
    let sandbox = Sandbox::new();
    let mut session = sandbox.open(Role::Installer);
    let packages = vec![
        package_with_deps("app", "1.0", &["runtime>=3.0", "ghost"]),
        package_with_deps("runtime", "2.1", &[]),
    ];
    let (plan, _) = resolve(&mut session, &packages, &["app"], &[]);

    let error = plan.error.unwrap();
    assert!(error.contains("runtime"));
    assert!(error.contains("ghost"));
}

#[test]
fn test_cycle_is_fatal() {
    let sandbox = Sandbox::new();
    let mut session = sandbox.open(Role::Installer);
    session
        .fetch(&[
            package_with_deps("a", "1.0", &["b"]),
            package_with_deps("b", "1.0", &["a"]),
        ])
        .unwrap();
    session.select("a").unwrap();

    match session.calculate_components_to_install() {
        Err(Error::CyclicDependency(path)) => {
            assert_eq!(path.first(), path.last());
            assert!(path.contains(&"b".to_string()));
        }
        other => panic!("expected a cycle, got {:?}", other.map(|p| p.ordered)),
    }
}

#[test]
fn test_uninstall_never_removes_needed_components() {
    let sandbox = Sandbox::new();
    let packages = catalog();
    {
        let mut session = sandbox.open(Role::Installer);
        assert!(install(&mut session, &packages, &["docs", "extras"]).is_success());
    }

    for deselect in [&["runtime"][..], &["app"], &["extras"], &["lib", "extras"]] {
        let mut session = sandbox.open(Role::PackageManager);
        let (plan, removal) = resolve(&mut session, &packages, &[], deselect);

        let install: HashSet<&String> = plan.ordered.iter().collect();
        assert!(
            removal.iter().all(|k| !install.contains(k)),
            "{:?} overlaps {:?}",
            removal,
            plan.ordered
        );
    }

    let mut session = sandbox.open(Role::PackageManager);
    let (_, removal) = resolve(&mut session, &packages, &[], &["extras"]);
    assert_eq!(removal, vec!["extras".to_string()]);
}

#[test]
fn test_essential_update_forces_updater() {
    let sandbox = Sandbox::new();
    let mut packages = catalog();
    {
        let mut session = sandbox.open(Role::Installer);
        assert!(install(&mut session, &packages, &["extras"]).is_success());
    }

    let mut core = package_with_deps("core", "1.0", &[]);
    core.essential = true;
    packages.push(core);

    let mut session = sandbox.open(Role::PackageManager);
    assert!(matches!(
        session.fetch(&packages).unwrap(),
        installkit::FetchOutcome::ForceUpdate(_)
    ));
    session.select("extras").unwrap();
    assert!(matches!(
        session.calculate_components_to_install(),
        Err(Error::ForceUpdate(_))
    ));
}
