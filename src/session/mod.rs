// src/session/mod.rs

//! Installer session
//!
//! A `Session` ties everything together for one run against one target
//! directory: it holds the directory lock, loads the installed registry,
//! merges a catalog into the component tree, resolves what to install and
//! remove, and executes the result for its `Role`.
//!
//! # Example
//!
//! ```ignore
//! let config = SessionConfig::load(Path::new("installer.toml"))?;
//! let mut session = Session::open(config, Role::Installer)?;
//! session.fetch(&catalog.packages)?;
//! session.select("org.app.docs")?;
//!
//! let plan = session.calculate_components_to_install()?;
//! let removal = session.calculate_components_to_uninstall();
//! match session.run(&plan.ordered, &removal) {
//!     RunOutcome::Success => println!("done"),
//!     RunOutcome::Failure(msg) => eprintln!("{}", msg),
//!     RunOutcome::Canceled => eprintln!("canceled"),
//! }
//! ```

mod lock;
mod run;

pub use lock::SessionLock;

use crate::catalog::{AcceptAll, FetchOutcome, Package, PackageFilter, fetch_components};
use crate::components::{Component, ComponentTree};
use crate::config::SessionConfig;
use crate::elevation::{Elevator, ProcessElevator};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::fetch::{ArchiveFetcher, LocalDirFetcher, NoFetcher};
use crate::hook::{ComponentHook, NoopHook};
use crate::installed::InstalledRegistry;
use crate::maintenance::read_layout;
use crate::operation::{
    KeyValueStore, MemoryKeyStore, Operation, OperationContext, ProcessRunner,
    SystemProcessRunner,
};
use crate::progress::{ProgressCoordinator, ProgressTracker, SilentProgress};
use crate::resolver::{
    InstallPlan, InstallReason, components_marked_for_installation,
    components_marked_for_uninstallation, resolve_install, resolve_uninstall,
};
use crate::role::Role;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure(String),
    Canceled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }
}

/// External collaborators of a session
pub struct SessionServices {
    pub store: Arc<dyn KeyValueStore>,
    pub runner: Arc<dyn ProcessRunner>,
    pub hook: Arc<dyn ComponentHook>,
    pub elevator: Arc<dyn Elevator>,
    pub fetcher: Arc<dyn ArchiveFetcher>,
    pub progress: Arc<dyn ProgressTracker>,
    pub filter: Arc<dyn PackageFilter + Send + Sync>,
}

impl Default for SessionServices {
    fn default() -> Self {
        Self {
            store: Arc::new(MemoryKeyStore::new()),
            runner: Arc::new(SystemProcessRunner),
            hook: Arc::new(NoopHook),
            elevator: Arc::new(ProcessElevator),
            fetcher: Arc::new(NoFetcher),
            progress: Arc::new(SilentProgress::new()),
            filter: Arc::new(AcceptAll),
        }
    }
}

impl SessionServices {
    /// Defaults, fetching from `repository_dir` when the config names one
    pub fn for_config(config: &SessionConfig) -> Self {
        let mut services = Self::default();
        if let Some(root) = &config.repository_dir {
            services.fetcher = Arc::new(LocalDirFetcher::new(root));
        }
        services
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn ComponentHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_elevator(mut self, elevator: Arc<dyn Elevator>) -> Self {
        self.elevator = elevator;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn PackageFilter + Send + Sync>) -> Self {
        self.filter = filter;
        self
    }
}

/// What the executor needs, kept apart from the mutable session state
struct Engine {
    services: SessionServices,
    progress: ProgressCoordinator,
    backup_dir: PathBuf,
    process_timeout: Duration,
    cancel: Arc<AtomicBool>,
}

impl Engine {
    fn executor(&self) -> Executor<'_> {
        let ctx = OperationContext {
            store: &*self.services.store,
            runner: &*self.services.runner,
            hook: &*self.services.hook,
            backup_dir: &self.backup_dir,
            process_timeout: self.process_timeout,
            rights: None,
        };
        Executor::new(
            ctx,
            &*self.services.elevator,
            &self.progress,
            Arc::clone(&self.cancel),
        )
    }
}

pub struct Session {
    config: SessionConfig,
    role: Role,
    engine: Engine,
    registry: InstalledRegistry,
    /// Operations recorded by earlier sessions, by sequence number
    old_operations: Vec<Operation>,
    /// Operations performed by this session, in perform order
    performed: Vec<Operation>,
    tree: ComponentTree,
    outcome: FetchOutcome,
    updates: Vec<String>,
    plan: Option<InstallPlan>,
    /// Download directory created by this session, removed when a run ends
    created_download_dir: Option<PathBuf>,
    _lock: SessionLock,
}

impl Session {
    /// Open a session with default collaborators
    pub fn open(config: SessionConfig, role: Role) -> Result<Self> {
        let services = SessionServices::for_config(&config);
        Self::open_with(config, role, services)
    }

    pub fn open_with(config: SessionConfig, role: Role, services: SessionServices) -> Result<Self> {
        config.validate()?;
        let lock = SessionLock::acquire(&config.lock_path(), config.lock_timeout())?;
        let registry = load_registry(&config)?;

        let old_operations = registry.all_operations();
        info!(
            "Opened {} session on {} ({} packages, {} recorded operations)",
            role,
            config.target_dir.display(),
            registry.packages().len(),
            old_operations.len()
        );

        let engine = Engine {
            progress: ProgressCoordinator::new(Arc::clone(&services.progress)),
            services,
            backup_dir: std::env::temp_dir().join(format!("installkit-backup-{}", Uuid::new_v4())),
            process_timeout: config.process_timeout(),
            cancel: Arc::new(AtomicBool::new(false)),
        };

        Ok(Self {
            config,
            role,
            engine,
            registry,
            old_operations,
            performed: Vec::new(),
            tree: ComponentTree::default(),
            outcome: FetchOutcome::Ready,
            updates: Vec::new(),
            plan: None,
            created_download_dir: None,
            _lock: lock,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &InstalledRegistry {
        &self.registry
    }

    pub fn tree(&self) -> &ComponentTree {
        &self.tree
    }

    pub fn component(&self, key: &str) -> Option<&Component> {
        self.tree.get(key)
    }

    /// Operations recorded by earlier sessions
    pub fn old_operations(&self) -> &[Operation] {
        &self.old_operations
    }

    /// Operations performed so far by this session
    pub fn performed_operations(&self) -> &[Operation] {
        &self.performed
    }

    /// Outcome of the essential update gate for the last fetch
    pub fn fetch_outcome(&self) -> &FetchOutcome {
        &self.outcome
    }

    /// Merge `packages` with the installed registry and build the tree
    pub fn fetch(&mut self, packages: &[Package]) -> Result<FetchOutcome> {
        let fetched = fetch_components(
            self.role,
            packages,
            self.registry.packages(),
            &*self.engine.services.filter,
        )?;

        let mut tree = ComponentTree::build(fetched.set, self.role)?;
        if fetched.found_essential_update {
            info!("Essential update found, other updates are disabled");
            tree.restrict_to_essential_updates(&fetched.updates);
        }

        self.tree = tree;
        self.outcome = fetched.outcome.clone();
        self.updates = fetched.updates;
        self.plan = None;
        Ok(fetched.outcome)
    }

    /// Keys of the components that are pending updates (update roles only)
    pub fn updates(&self) -> &[String] {
        &self.updates
    }

    pub fn select(&mut self, key: &str) -> Result<()> {
        self.tree.select(key, self.role)?;
        self.plan = None;
        Ok(())
    }

    pub fn deselect(&mut self, key: &str) -> Result<()> {
        self.tree.deselect(key, self.role)?;
        self.plan = None;
        Ok(())
    }

    /// Why `key` is part of the last calculated install set
    pub fn install_reason(&self, key: &str) -> Option<InstallReason> {
        self.plan.as_ref().and_then(|p| p.reason(key).cloned())
    }

    /// Resolve the ordered install set for the current selection
    ///
    /// Refuses with `Error::ForceUpdate` while an essential update is
    /// pending. Unresolvable requirements do not fail the call; they are
    /// reported in `InstallPlan::error`.
    pub fn calculate_components_to_install(&mut self) -> Result<InstallPlan> {
        if let FetchOutcome::ForceUpdate(message) = &self.outcome {
            return Err(Error::ForceUpdate(message.clone()));
        }

        let set = self.tree.components();
        let inputs = components_marked_for_installation(set, self.role);
        let plan = resolve_install(set, &inputs)?;
        if let Some(error) = &plan.error {
            warn!("Install resolution incomplete:\n{}", error);
        }
        debug!("Components to install: {:?}", plan.ordered);

        self.plan = Some(plan.clone());
        Ok(plan)
    }

    /// Resolve the ordered uninstall set for the current selection
    ///
    /// Never fails. Components the install set still needs are left alone.
    pub fn calculate_components_to_uninstall(&mut self) -> Vec<String> {
        let install: HashSet<String> = match &self.plan {
            Some(plan) => plan.ordered.iter().cloned().collect(),
            None => {
                let set = self.tree.components();
                let inputs = components_marked_for_installation(set, self.role);
                match resolve_install(set, &inputs) {
                    Ok(plan) => plan.ordered.into_iter().collect(),
                    Err(e) => {
                        warn!("Cannot resolve install set for removal check: {}", e);
                        HashSet::new()
                    }
                }
            }
        };

        let set = self.tree.components();
        let requested = components_marked_for_uninstallation(set);
        let removal = resolve_uninstall(set, self.role, &requested, &install);
        debug!("Components to uninstall: {:?}", removal);
        removal
    }

    /// Request cancellation; the run stops before its next operation
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.engine.cancel.store(true, Ordering::SeqCst);
    }

    /// Shared flag for cancelling from another thread while `run` is busy
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.engine.cancel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.engine.cancel.load(Ordering::SeqCst)
    }
}

/// Load the registry, falling back to a maintenance tool's embedded copy
fn load_registry(config: &SessionConfig) -> Result<InstalledRegistry> {
    let registry_path = config.registry_path();
    let tool = config.target_dir.join(&config.maintenance_tool_name);

    if !registry_path.exists() && tool.is_file() {
        match read_layout(&tool) {
            Ok(layout) => {
                info!(
                    "Rebuilding registry from maintenance tool {}",
                    tool.display()
                );
                return Ok(layout.into_registry(registry_path));
            }
            Err(e) => warn!("Ignoring maintenance tool {}: {}", tool.display(), e),
        }
    }
    InstalledRegistry::open(registry_path)
}
