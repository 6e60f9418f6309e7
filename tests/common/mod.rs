// tests/common/mod.rs

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use installkit::elevation::GrantingElevator;
use installkit::operation::MemoryKeyStore;
use installkit::{
    InstallPlan, Operation, OperationKind, Package, Role, RunOutcome, Session, SessionConfig,
    SessionServices,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A scratch installation: a target directory, a payload file to copy from
/// and a fake base binary for maintenance tools.
///
/// Keep the value alive; dropping it removes everything.
pub struct Sandbox {
    pub temp: TempDir,
    pub target: PathBuf,
    pub store: Arc<MemoryKeyStore>,
}

impl Sandbox {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        fs::write(temp.path().join("base-binary"), b"#!/bin/sh\nexit 0\n").unwrap();
        Self {
            temp,
            target,
            store: Arc::new(MemoryKeyStore::new()),
        }
    }

    pub fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(&self.target);
        config.base_binary = Some(self.temp.path().join("base-binary"));
        config
    }

    pub fn services(&self) -> SessionServices {
        SessionServices::default()
            .with_elevator(Arc::new(GrantingElevator::new()))
            .with_store(self.store.clone())
    }

    pub fn open(&self, role: Role) -> Session {
        Session::open_with(self.config(), role, self.services()).unwrap()
    }

    /// Write a payload file and return its path
    pub fn payload(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp.path().join("payload").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn registry_path(&self) -> PathBuf {
        self.target.join("components.json")
    }

    pub fn tool_path(&self) -> PathBuf {
        self.target.join("maintenancetool")
    }
}

/// Package that creates `<target>/<name>/` and copies `payload` to
/// `<target>/<name>/<file>`
pub fn file_package(name: &str, version: &str, payload: &Path, file: &str) -> Package {
    let mut package = Package::new(name, version);
    package.operations = vec![
        Operation::new(OperationKind::Mkdir, vec![format!("@TargetDir@/{}", name)]),
        Operation::new(
            OperationKind::Copy,
            vec![
                payload.display().to_string(),
                format!("@TargetDir@/{}/{}", name, file),
            ],
        ),
    ];
    package
}

pub fn package_with_deps(name: &str, version: &str, deps: &[&str]) -> Package {
    let mut package = Package::new(name, version);
    package.dependencies = deps.iter().map(|d| d.to_string()).collect();
    package
}

/// Fetch, select and resolve; returns the plan and the removal set
pub fn resolve(
    session: &mut Session,
    packages: &[Package],
    select: &[&str],
    deselect: &[&str],
) -> (InstallPlan, Vec<String>) {
    session.fetch(packages).unwrap();
    for key in select {
        session.select(key).unwrap();
    }
    for key in deselect {
        session.deselect(key).unwrap();
    }
    let plan = session.calculate_components_to_install().unwrap();
    let removal = session.calculate_components_to_uninstall();
    (plan, removal)
}

/// Resolve and run in one go
pub fn install(session: &mut Session, packages: &[Package], select: &[&str]) -> RunOutcome {
    let (plan, removal) = resolve(session, packages, select, &[]);
    session.run(&plan.ordered, &removal)
}

/// Every path below `root`, relative and sorted
pub fn snapshot(root: &Path) -> Vec<String> {
    if !root.exists() {
        return Vec::new();
    }
    let mut entries: Vec<String> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .flatten()
        .map(|e| e.path().strip_prefix(root).unwrap().display().to_string())
        .collect();
    entries.sort();
    entries
}
