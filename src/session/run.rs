// src/session/run.rs

//! Executing a resolved selection
//!
//! Every role shares the same building blocks: fetch archives, undo old
//! operations, install components one by one and commit. Each performed or
//! undone operation is written to the registry right away, so a crash leaves
//! a registry that matches the disk.

use super::{RunOutcome, Session};
use crate::components::{Component, ComponentTree, InstallAction};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::executor::{Executor, UndoReport};
use crate::fetch::ArchiveFetcher;
use crate::hook::{ComponentHook, HookEvent, HookVerdict};
use crate::installed::{InstalledRegistry, LocalPackage, RegistryDocument};
use crate::maintenance::MaintenanceToolWriter;
use crate::operation::{
    Operation, OperationKind, keys, total_weight, uninstall_path_operations,
};
use crate::progress::ProgressEvent;
use crate::role::Role;
use chrono::{Local, NaiveDate};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const DOWNLOAD_END: f64 = 0.2;
const REMOVE_END: f64 = 0.4;
const INSTALL_END: f64 = 0.95;

impl Session {
    /// Execute `install` and `uninstall` (as returned by the calculations)
    ///
    /// A failed or canceled run rolls back everything this session performed.
    pub fn run(&mut self, install: &[String], uninstall: &[String]) -> RunOutcome {
        if self.is_cancelled() {
            return RunOutcome::Canceled;
        }
        info!(
            "Starting {} run: {} to install, {} to uninstall",
            self.role,
            install.len(),
            uninstall.len()
        );
        self.apply_actions(install, uninstall);

        let result = fs::create_dir_all(&self.engine.backup_dir)
            .map_err(Error::from)
            .and_then(|_| match self.role {
                Role::Installer => self.run_installer(install),
                Role::PackageManager | Role::Updater | Role::Reinstaller => {
                    self.run_maintenance(install)
                }
                Role::Uninstaller => self.run_uninstaller(),
                Role::OfflineGenerator => self.run_offline_generator(install),
            });

        self.remove_downloads();
        let outcome = match result {
            Ok(()) => {
                info!("{} run finished", self.role);
                self.engine
                    .progress
                    .report(ProgressEvent::Finished(format!("{} finished", self.role)));
                RunOutcome::Success
            }
            Err(e) => {
                let canceled = e.is_cancelled() || self.is_cancelled();
                if canceled {
                    warn!("{} run canceled: {}", self.role, e);
                } else {
                    error!("{} run failed: {}", self.role, e);
                }
                if self.role != Role::Uninstaller {
                    self.rollback();
                }
                self.engine.progress.report(ProgressEvent::Error(e.to_string()));
                if canceled {
                    RunOutcome::Canceled
                } else {
                    RunOutcome::Failure(e.to_string())
                }
            }
        };

        self.remove_backups();
        outcome
    }

    /// Undo every operation this session performed, newest first
    ///
    /// The target directory creation is weakened to remove the directory only
    /// when it is empty. The registry is saved after each step; an installer
    /// whose registry ends up without packages deletes it.
    pub fn rollback(&mut self) -> UndoReport {
        let mut operations = std::mem::take(&mut self.performed);
        if operations.is_empty() {
            return UndoReport::default();
        }
        info!("Rolling back {} operations", operations.len());

        for op in &mut operations {
            if op.kind == OperationKind::Mkdir
                && op.is_uninstall_only()
                && self.config.remove_target_dir
            {
                op.set_flag(keys::FORCE_REMOVAL, false);
            }
        }

        let installer = self.role == Role::Installer;
        let Session {
            engine,
            registry,
            tree,
            ..
        } = self;
        let executor = engine.executor();

        let total = total_weight(&operations);
        executor.progress().start_undo_phase("Rolling back", total);

        if installer && registry.packages().is_empty() {
            if let Err(e) = registry.delete_file() {
                warn!("Cannot remove registry: {}", e);
            }
        }

        let report = executor.undo_all(&operations, |op| {
            if let Some(name) = registry.remove_operation(op) {
                mark_uninstalled(tree, &name);
            }
            if installer && registry.packages().is_empty() {
                registry.delete_file()
            } else {
                registry.write_to_disk()
            }
        });

        if !report.is_clean() {
            warn!(
                "Rollback left {} operations in place:\n{}",
                report.failed.len(),
                report.failed.join("\n")
            );
        }
        report
    }

    fn apply_actions(&mut self, install: &[String], uninstall: &[String]) {
        let install: HashSet<&str> = install.iter().map(String::as_str).collect();
        let uninstall: HashSet<&str> = uninstall.iter().map(String::as_str).collect();

        for key in self.tree.components().keys().to_vec() {
            let Some(c) = self.tree.get(&key) else {
                continue;
            };
            let action = if install.contains(key.as_str()) {
                if c.installed && !c.update_requested {
                    InstallAction::KeepInstalled
                } else {
                    InstallAction::Install
                }
            } else if c.installed
                && (self.role == Role::Uninstaller || uninstall.contains(key.as_str()))
            {
                InstallAction::Uninstall
            } else if c.installed {
                InstallAction::KeepInstalled
            } else {
                InstallAction::KeepUninstalled
            };
            self.tree.set_action(&key, action);
        }
    }

    /// Keys of `order` whose action is `action`, keeping the order
    fn keys_with_action(&self, order: &[String], action: InstallAction) -> Vec<String> {
        order
            .iter()
            .filter(|k| self.tree.get(k).is_some_and(|c| c.action == action))
            .cloned()
            .collect()
    }

    fn run_installer(&mut self, install: &[String]) -> Result<()> {
        let to_install = self.keys_with_action(install, InstallAction::Install);

        let mut run = self.begin();
        run.create_target_dir()?;
        run.download(&to_install)?;
        run.install_components(&to_install, DOWNLOAD_END)?;
        run.registry.write_to_disk()?;
        run.write_maintenance_tool(Role::PackageManager)
    }

    /// Package manager, updater and reinstaller
    fn run_maintenance(&mut self, install: &[String]) -> Result<()> {
        let to_install = self.keys_with_action(install, InstallAction::Install);
        let removing: Vec<String> = self
            .tree
            .components()
            .iter()
            .filter(|c| c.action == InstallAction::Uninstall)
            .map(|c| c.name.clone())
            .collect();

        let mut run = self.begin();
        for name in &removing {
            run.consult_hook(name, &HookEvent::BeforeUninstall)?;
        }
        run.download(&to_install)?;

        let reinstall: HashSet<String> = to_install.iter().cloned().collect();
        let (undo, keep): (Vec<Operation>, Vec<Operation>) = run
            .old_operations
            .iter()
            .cloned()
            .partition(|op| !keep_operation(&*run.tree, op, &reinstall));
        debug!(
            "Undoing {} old operations, keeping {}",
            undo.len(),
            keep.len()
        );

        let report = run.undo_old(&undo, "Removing components", DOWNLOAD_END, REMOVE_END);
        if !report.is_clean() {
            warn!(
                "{} old operations could not be undone:\n{}",
                report.failed.len(),
                report.failed.join("\n")
            );
        }
        if run.executor.is_cancelled() {
            return Err(Error::Cancelled("Canceled after removing components".into()));
        }

        run.install_components(&to_install, REMOVE_END)?;
        run.registry.write_to_disk()?;
        run.write_maintenance_tool(Role::PackageManager)
    }

    fn run_uninstaller(&mut self) -> Result<()> {
        let mut run = self.begin();
        let names: Vec<String> = run.registry.packages().keys().cloned().collect();
        for name in &names {
            run.consult_hook(name, &HookEvent::BeforeUninstall)?;
        }

        let (session_owned, owned): (Vec<Operation>, Vec<Operation>) = run
            .old_operations
            .iter()
            .cloned()
            .partition(|op| op.component().is_empty());

        let report = run.undo_old(&owned, "Uninstalling", 0.0, INSTALL_END);
        if !report.is_clean() {
            return Err(Error::operation(
                "uninstall",
                format!(
                    "{} operations could not be undone:\n{}",
                    report.failed.len(),
                    report.failed.join("\n")
                ),
            ));
        }

        crate::maintenance::remove_maintenance_tool(
            &run.config.target_dir,
            &run.config.maintenance_tool_name,
        )?;
        run.registry.delete_file()?;

        if run.config.remove_target_dir && !session_owned.is_empty() {
            info!("Removing target directory {}", run.config.target_dir.display());
            let registry = &mut *run.registry;
            let report = run.executor.undo_all(&session_owned, |op| {
                registry.remove_operation(op);
                Ok(())
            });
            if !report.is_clean() {
                warn!("Target directory not fully removed: {}", report.failed.join("; "));
            }
        }
        run.old_operations.clear();
        Ok(())
    }

    /// Fetch every archive of the selection and write an installer binary
    /// next to them
    fn run_offline_generator(&mut self, install: &[String]) -> Result<()> {
        fs::create_dir_all(&self.config.target_dir)?;
        let mut run = self.begin();
        run.download(install)?;
        // The archives are the product here
        *run.created_download_dir = None;

        let base = run.base_binary()?;
        let name = format!("{}-offline", run.config.maintenance_tool_name);
        let empty = InstalledRegistry::from_document(
            run.config.registry_path(),
            RegistryDocument::default(),
        );
        MaintenanceToolWriter::new(base, &run.config.target_dir, name).write(Role::Installer, &empty)?;
        Ok(())
    }

    fn begin(&mut self) -> Run<'_> {
        let Session {
            config,
            role,
            engine,
            registry,
            old_operations,
            performed,
            tree,
            created_download_dir,
            ..
        } = self;

        let mut variables = config.substitution_variables();
        variables
            .entry("DownloadDir".to_string())
            .or_insert_with(|| config.download_dir().display().to_string());

        Run {
            role: *role,
            config,
            executor: engine.executor(),
            fetcher: &*engine.services.fetcher,
            hook: &*engine.services.hook,
            registry,
            old_operations,
            performed,
            tree,
            created_download_dir,
            variables,
        }
    }

    fn remove_downloads(&mut self) {
        if let Some(dir) = self.created_download_dir.take() {
            remove_dir_quietly(&dir);
        }
    }

    fn remove_backups(&self) {
        remove_dir_quietly(&self.engine.backup_dir);
    }
}

/// Borrowed pieces of a session while a run executes
struct Run<'s> {
    role: Role,
    config: &'s SessionConfig,
    executor: Executor<'s>,
    fetcher: &'s dyn ArchiveFetcher,
    hook: &'s dyn ComponentHook,
    registry: &'s mut InstalledRegistry,
    old_operations: &'s mut Vec<Operation>,
    performed: &'s mut Vec<Operation>,
    tree: &'s mut ComponentTree,
    created_download_dir: &'s mut Option<PathBuf>,
    variables: BTreeMap<String, String>,
}

impl Run<'_> {
    /// Create the target directory with a session-owned operation
    ///
    /// It is only logged when the target should go away on full uninstall.
    fn create_target_dir(&mut self) -> Result<()> {
        let progress = self.executor.progress();
        progress.start_phase("Preparing installation", 0.0, 0.0, 1);

        let mut op = Operation::new(
            OperationKind::Mkdir,
            vec![self.config.target_dir.to_string_lossy().into_owned()],
        );
        op.set_value(keys::COMPONENT, "");
        op.set_flag(keys::ADMIN, false);
        op.set_flag(keys::UNINSTALL_ONLY, true);
        op.set_flag(keys::FORCE_REMOVAL, true);
        if let Err(e) = self.executor.perform(&mut op) {
            if op.has_undo_state() {
                if let Err(undo) = self.executor.undo(&op) {
                    warn!("Cannot remove partially created target: {}", undo);
                }
            }
            return Err(e);
        }

        if self.config.remove_target_dir {
            record(self.registry, self.performed, &op)?;
        }
        Ok(())
    }

    /// Fetch the archives of `keys` into the download directory
    fn download(&mut self, keys: &[String]) -> Result<()> {
        let items: Vec<(String, String)> = keys
            .iter()
            .filter_map(|k| self.tree.get(k))
            .flat_map(|c| c.archives.iter().map(move |a| (c.name.clone(), a.clone())))
            .collect();
        if items.is_empty() {
            return Ok(());
        }

        let dir = self.config.download_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            *self.created_download_dir = Some(dir.clone());
        }

        let progress = self.executor.progress();
        progress.start_phase("Downloading archives", 0.0, DOWNLOAD_END, items.len() as u64);
        let fetcher = self.fetcher;

        for (component, archive) in &items {
            if self.executor.is_cancelled() {
                return Err(Error::Cancelled(format!("Download canceled before {}", archive)));
            }
            let file_name = Path::new(archive)
                .file_name()
                .ok_or_else(|| Error::NotFound(format!("Invalid archive name '{}'", archive)))?;

            let bytes = self
                .executor
                .run_on_worker("download", || fetcher.fetch(component, archive))?;
            let path = dir.join(component).join(file_name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &bytes)?;
            debug!("Downloaded {} ({} bytes)", path.display(), bytes.len());
            progress.advance(1, &format!("Downloaded {}", archive));
        }
        info!("Downloaded {} archives", items.len());
        Ok(())
    }

    fn install_components(&mut self, keys: &[String], start: f64) -> Result<()> {
        let total = keys
            .iter()
            .filter_map(|k| self.tree.get(k))
            .fold(0u64, |sum, c| {
                sum.saturating_add(total_weight(&c.operations).saturating_add(1))
            });
        self.executor
            .progress()
            .start_phase("Installing components", start, INSTALL_END, total);

        for key in keys {
            self.install_component(key)?;
        }
        Ok(())
    }

    fn install_component(&mut self, key: &str) -> Result<()> {
        let component = self
            .tree
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Component {}", key)))?;
        if component.synthetic {
            return Ok(());
        }
        info!("Installing {} {}", component.name, component.version);
        self.executor.progress().report(ProgressEvent::Message(format!(
            "Installing {}",
            display_name(&component)
        )));

        let mut variables = self.variables.clone();
        variables.insert("ComponentName".into(), component.name.clone());
        variables.insert("ComponentVersion".into(), component.version.to_string());

        let overrides = match self.consult_hook(&component.name, &HookEvent::BeforeInstall)? {
            Some(params) => params,
            None => BTreeMap::new(),
        };
        let mut operations = instantiate_operations(&component, &variables, &overrides);

        let carried = self
            .registry
            .get(&component.name)
            .map(|p| (p.install_date, p.operations.clone()));
        self.registry.add_package(local_package(&component, carried));

        let registry = &mut *self.registry;
        let performed = &mut *self.performed;
        let result = self
            .executor
            .perform_all(&mut operations, |op| record(registry, performed, op));
        if result.is_err()
            && registry
                .get(&component.name)
                .is_some_and(|p| p.operations.is_empty())
        {
            registry.remove_package(&component.name);
        }
        result?;

        for op in uninstall_path_operations(&component.name, &component.uninstall_paths, &variables)
        {
            record(registry, performed, &op)?;
        }

        if let Some(c) = self.tree.get_mut(key) {
            c.installed = true;
            c.installed_version = Some(c.version.clone());
            c.last_update_date = Some(today());
            c.update_requested = false;
            c.uninstall_requested = false;
            c.action = InstallAction::KeepInstalled;
        }
        debug!("Installed {} in {} role", component.name, self.role);
        Ok(())
    }

    /// Ask the hook about `event`; a denial fails the component
    fn consult_hook(
        &self,
        component: &str,
        event: &HookEvent,
    ) -> Result<Option<BTreeMap<String, String>>> {
        match self.hook.on_event(component, event, &self.variables) {
            HookVerdict::Allow => Ok(None),
            HookVerdict::Deny(reason) => Err(Error::operation(
                event.to_string(),
                format!("{} refused for {}: {}", event, component, reason),
            )),
            HookVerdict::Modify(params) => {
                debug!("Hook adjusted {} parameters for {}", params.len(), component);
                Ok(Some(params))
            }
        }
    }

    /// Undo operations from earlier sessions, newest first
    fn undo_old(&mut self, operations: &[Operation], label: &str, start: f64, end: f64) -> UndoReport {
        if operations.is_empty() {
            return UndoReport::default();
        }
        let total = total_weight(operations);
        self.executor
            .progress()
            .start_removal_phase(label, start, end, total);

        let registry = &mut *self.registry;
        let tree = &mut *self.tree;
        let mut undone = HashSet::new();
        let report = self.executor.undo_all(operations, |op| {
            undone.insert(op.sequence);
            if let Some(name) = registry.remove_operation(op) {
                info!("Removed {}", name);
                mark_uninstalled(tree, &name);
            }
            registry.write_to_disk()
        });
        self.old_operations.retain(|op| !undone.contains(&op.sequence));
        report
    }

    fn base_binary(&self) -> Result<PathBuf> {
        match &self.config.base_binary {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().map_err(|e| {
                Error::PersistenceFailed(format!("Cannot locate running executable: {}", e))
            }),
        }
    }

    fn write_maintenance_tool(&mut self, role: Role) -> Result<()> {
        if !self.config.write_maintenance_tool {
            return Ok(());
        }
        self.executor
            .progress()
            .report(ProgressEvent::Message("Writing maintenance tool".into()));
        let base = self.base_binary()?;
        MaintenanceToolWriter::new(
            base,
            &self.config.target_dir,
            &self.config.maintenance_tool_name,
        )
        .write(role, &*self.registry)?;
        Ok(())
    }
}

/// Whether an old operation survives a maintenance run
///
/// Kept: session-owned and uninstall-only operations, components that stay
/// installed as they are, and replaced components whose replacement is not
/// being installed. Everything else is undone.
fn keep_operation(tree: &ComponentTree, op: &Operation, reinstall: &HashSet<String>) -> bool {
    if op.is_uninstall_only() || op.component().is_empty() {
        return true;
    }
    let owner = op.component();
    if let Some(replacement) = tree.replacement_for(owner) {
        return !reinstall.contains(&replacement.by);
    }
    match tree.find(owner) {
        Some(c) => c.action == InstallAction::KeepInstalled && !reinstall.contains(&c.key),
        None => true,
    }
}

/// Give a performed operation its sequence number and save it
fn record(
    registry: &mut InstalledRegistry,
    performed: &mut Vec<Operation>,
    op: &Operation,
) -> Result<()> {
    let mut recorded = op.clone();
    recorded.sequence = registry.next_sequence();
    registry.record_operation(recorded.clone());
    performed.push(recorded);
    registry.write_to_disk()
}

/// Concrete operations for one component
///
/// Every component starts with a `MinimumProgress` record so it is
/// registered even without operations of its own.
fn instantiate_operations(
    component: &Component,
    variables: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> Vec<Operation> {
    let mut operations = vec![Operation::new(OperationKind::MinimumProgress, Vec::new())];
    operations.extend(component.operations.iter().cloned());

    for op in &mut operations {
        op.sequence = 0;
        for (key, value) in overrides {
            op.set_value(key, value.clone());
        }
        op.substitute_variables(variables);
        op.set_value(keys::COMPONENT, component.name.clone());
        let admin = op.is_admin() || component.requires_admin;
        op.set_flag(keys::ADMIN, admin);
        let uninstall_only = op.is_uninstall_only();
        op.set_flag(keys::UNINSTALL_ONLY, uninstall_only);
    }
    operations
}

fn local_package(
    component: &Component,
    carried: Option<(Option<NaiveDate>, Vec<Operation>)>,
) -> LocalPackage {
    let (install_date, operations) = carried.unwrap_or_default();
    LocalPackage {
        name: component.name.clone(),
        version: component.version.clone(),
        tree_name: component.tree_name.clone(),
        display_name: component.display_name.clone(),
        description: component.description.clone(),
        dependencies: component.dependencies.clone(),
        auto_dependencies: component.auto_dependencies.clone(),
        forced_installation: component.forced_installation,
        is_virtual: component.is_virtual,
        checkable: component.checkable,
        inherit_version: component.inherit_version.clone(),
        content_sha1: component.content_sha1.clone(),
        uncompressed_size: component.uncompressed_size,
        install_date: install_date.or(Some(today())),
        last_update_date: Some(today()),
        operations,
    }
}

fn mark_uninstalled(tree: &mut ComponentTree, name: &str) {
    let key = tree.find(name).map(|c| c.key.clone());
    if let Some(c) = key.and_then(|k| tree.get_mut(&k)) {
        c.installed = false;
        c.installed_version = None;
    }
}

fn display_name(component: &Component) -> &str {
    if component.display_name.is_empty() {
        &component.name
    } else {
        &component.display_name
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn remove_dir_quietly(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => debug!("Removed {}", dir.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Cannot remove {}: {}", dir.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Package;
    use crate::elevation::GrantingElevator;
    use crate::maintenance::read_layout;
    use crate::session::SessionServices;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        target: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let target = temp.path().join("target");
            fs::write(temp.path().join("base-binary"), b"#!/bin/sh\nexit 0\n").unwrap();
            fs::write(temp.path().join("payload.txt"), b"payload").unwrap();
            Self { temp, target }
        }

        fn config(&self) -> SessionConfig {
            let mut config = SessionConfig::new(&self.target);
            config.base_binary = Some(self.temp.path().join("base-binary"));
            config
        }

        fn open(&self, role: Role) -> Session {
            self.open_with(role, services())
        }

        fn open_with(&self, role: Role, services: SessionServices) -> Session {
            Session::open_with(self.config(), role, services).unwrap()
        }

        /// Package that creates `<target>/<name>/` and copies a file into it
        fn package(&self, name: &str, version: &str) -> Package {
            let mut package = Package::new(name, version);
            package.operations = vec![
                Operation::new(
                    OperationKind::Mkdir,
                    vec![format!("@TargetDir@/{}", name)],
                ),
                Operation::new(
                    OperationKind::Copy,
                    vec![
                        self.temp.path().join("payload.txt").display().to_string(),
                        format!("@TargetDir@/{}/file.txt", name),
                    ],
                ),
            ];
            package
        }

        fn broken_package(&self, name: &str) -> Package {
            let mut package = Package::new(name, "1.0");
            package.operations = vec![Operation::new(
                OperationKind::Copy,
                vec![
                    self.temp.path().join("missing.txt").display().to_string(),
                    format!("@TargetDir@/{}.txt", name),
                ],
            )];
            package
        }
    }

    fn services() -> SessionServices {
        SessionServices::default().with_elevator(Arc::new(GrantingElevator::new()))
    }

    fn install(session: &mut Session, packages: &[Package], select: &[&str]) -> RunOutcome {
        session.fetch(packages).unwrap();
        for key in select {
            session.select(key).unwrap();
        }
        let plan = session.calculate_components_to_install().unwrap();
        let removal = session.calculate_components_to_uninstall();
        session.run(&plan.ordered, &removal)
    }

    #[test]
    fn test_installer_run() {
        let fx = Fixture::new();
        let mut session = fx.open(Role::Installer);
        let outcome = install(&mut session, &[fx.package("a", "1.0")], &["a"]);
        assert_eq!(outcome, RunOutcome::Success);

        assert_eq!(fs::read(fx.target.join("a/file.txt")).unwrap(), b"payload");
        assert!(session.registry().contains("a"));
        assert!(session.component("a").unwrap().installed);
        assert!(!fx.target.join(".downloads").exists());

        let layout = read_layout(&fx.target.join("maintenancetool")).unwrap();
        assert_eq!(layout.role, Role::PackageManager);
        assert!(layout.metadata.packages.contains_key("a"));

        let reloaded = InstalledRegistry::open(fx.target.join("components.json")).unwrap();
        let detached = &reloaded.document().detached_operations;
        assert_eq!(detached.len(), 1);
        assert!(detached[0].is_uninstall_only());
    }

    #[test]
    fn test_huge_weights_install() {
        let fx = Fixture::new();
        let mut package = fx.package("a", "1.0");
        for op in &mut package.operations {
            op.set_value(keys::WEIGHT, u64::MAX.to_string());
        }

        let mut session = fx.open(Role::Installer);
        assert_eq!(install(&mut session, &[package], &["a"]), RunOutcome::Success);
        assert!(fx.target.join("a/file.txt").exists());
    }

    #[test]
    fn test_failed_install_leaves_no_trace() {
        let fx = Fixture::new();
        let mut session = fx.open(Role::Installer);
        let packages = [fx.package("a", "1.0"), fx.broken_package("b")];

        let outcome = install(&mut session, &packages, &["a", "b"]);
        assert!(matches!(outcome, RunOutcome::Failure(_)));
        assert!(!fx.target.exists());
        assert!(session.performed_operations().is_empty());
        assert!(!session.component("a").unwrap().installed);
    }

    #[test]
    fn test_failed_install_keeps_existing_target() {
        let fx = Fixture::new();
        fs::create_dir_all(&fx.target).unwrap();
        fs::write(fx.target.join("keep.txt"), b"mine").unwrap();

        let mut session = fx.open(Role::Installer);
        let outcome = install(&mut session, &[fx.broken_package("b")], &["b"]);
        assert!(matches!(outcome, RunOutcome::Failure(_)));

        let entries: Vec<_> = fs::read_dir(&fx.target).unwrap().flatten().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(fs::read(fx.target.join("keep.txt")).unwrap(), b"mine");
    }

    #[test]
    fn test_package_manager_removes_deselected() {
        let fx = Fixture::new();
        let packages = [fx.package("a", "1.0"), fx.package("b", "1.0")];
        {
            let mut session = fx.open(Role::Installer);
            assert!(install(&mut session, &packages, &["a", "b"]).is_success());
        }

        let mut session = fx.open(Role::PackageManager);
        session.fetch(&packages).unwrap();
        session.deselect("b").unwrap();
        let plan = session.calculate_components_to_install().unwrap();
        let removal = session.calculate_components_to_uninstall();
        assert_eq!(removal, vec!["b".to_string()]);

        assert!(session.run(&plan.ordered, &removal).is_success());
        assert!(fx.target.join("a/file.txt").exists());
        assert!(!fx.target.join("b").exists());
        assert!(!session.registry().contains("b"));
        assert!(session.registry().contains("a"));
        assert!(fx.target.join("maintenancetool").exists());
    }

    #[test]
    fn test_uninstaller_removes_everything() {
        let fx = Fixture::new();
        {
            let mut session = fx.open(Role::Installer);
            let outcome = install(&mut session, &[fx.package("a", "1.0")], &["a"]);
            assert!(outcome.is_success());
        }

        let mut session = fx.open(Role::Uninstaller);
        assert_eq!(session.old_operations().len(), 4);
        assert!(session.run(&[], &[]).is_success());
        assert!(!fx.target.exists());
    }

    #[test]
    fn test_canceled_before_start() {
        let fx = Fixture::new();
        let mut session = fx.open(Role::Installer);
        session.fetch(&[fx.package("a", "1.0")]).unwrap();
        session.select("a").unwrap();
        let plan = session.calculate_components_to_install().unwrap();

        session.cancel();
        assert_eq!(session.run(&plan.ordered, &[]), RunOutcome::Canceled);
        assert!(!fx.target.exists());
    }

    #[test]
    fn test_hook_denial_rolls_back() {
        let fx = Fixture::new();
        let hook = |component: &str, event: &HookEvent, _: &BTreeMap<String, String>| {
            if component == "b" && *event == HookEvent::BeforeInstall {
                HookVerdict::Deny("not today".into())
            } else {
                HookVerdict::Allow
            }
        };
        let mut session = fx.open_with(Role::Installer, services().with_hook(Arc::new(hook)));
        let packages = [fx.package("a", "1.0"), fx.package("b", "1.0")];

        match install(&mut session, &packages, &["a", "b"]) {
            RunOutcome::Failure(message) => assert!(message.contains("not today")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!fx.target.exists());
    }

    #[test]
    fn test_offline_generator_keeps_archives() {
        let fx = Fixture::new();
        let repo = fx.temp.path().join("repo");
        fs::create_dir_all(repo.join("a")).unwrap();
        fs::write(repo.join("a/data.7z"), b"archive").unwrap();

        let mut package = fx.package("a", "1.0");
        package.archives = vec!["data.7z".into()];
        let services = services().with_fetcher(Arc::new(crate::fetch::LocalDirFetcher::new(&repo)));
        let mut session = fx.open_with(Role::OfflineGenerator, services);

        assert!(install(&mut session, &[package], &["a"]).is_success());
        assert_eq!(
            fs::read(fx.target.join(".downloads/a/data.7z")).unwrap(),
            b"archive"
        );
        assert!(!fx.target.join("a").exists());
        let layout = read_layout(&fx.target.join("maintenancetool-offline")).unwrap();
        assert_eq!(layout.role, Role::Installer);
    }

    #[test]
    fn test_keep_rule() {
        let tree = ComponentTree::default();
        let op = |component: &str| {
            let mut op = Operation::new(OperationKind::MinimumProgress, Vec::new());
            op.set_value(keys::COMPONENT, component);
            op
        };
        let reinstall: HashSet<String> = HashSet::new();

        assert!(keep_operation(&tree, &op(""), &reinstall));
        assert!(keep_operation(&tree, &op("unknown"), &reinstall));

        let mut uninstall_only = op("unknown");
        uninstall_only.set_flag(keys::UNINSTALL_ONLY, true);
        assert!(keep_operation(&tree, &uninstall_only, &reinstall));
    }
}
