// src/lib.rs

//! Installkit
//!
//! Installer core with component resolution, transactional operations and
//! self-describing maintenance tools.
//!
//! # Architecture
//!
//! - Catalog merge: remote packages and the installed registry become one
//!   component tree per role (installer, package manager, updater, ...)
//! - Resolution: selections expand into a dependency-ordered install set and
//!   a protected uninstall set
//! - Operations: every filesystem, registry or process change is an
//!   `Operation` with a perform and an undo, logged as it happens
//! - Maintenance tool: the installer rewrites itself into the target with
//!   the operation log appended, so later runs can undo exactly what was done

pub mod catalog;
pub mod components;
pub mod config;
pub mod elevation;
mod error;
pub mod executor;
pub mod fetch;
pub mod hook;
pub mod installed;
pub mod maintenance;
pub mod operation;
pub mod progress;
pub mod resolver;
pub mod role;
pub mod session;
pub mod version;

pub use catalog::{Catalog, FetchOutcome, Package};
pub use components::{Component, ComponentTree, InstallAction};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use installed::{InstalledRegistry, LocalPackage};
pub use maintenance::{BinaryLayout, read_layout};
pub use operation::{Operation, OperationKind};
pub use progress::{
    CallbackProgress, LogProgress, ProgressEvent, ProgressTracker, SilentProgress,
};
pub use resolver::{InstallPlan, InstallReason};
pub use role::Role;
pub use session::{RunOutcome, Session, SessionServices};
pub use version::ComponentVersion;
