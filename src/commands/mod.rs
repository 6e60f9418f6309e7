// src/commands/mod.rs
//! Command handlers for the installkit CLI

mod inspect;
mod install;
pub mod progress;
mod uninstall;

pub use inspect::cmd_inspect;
pub use install::{cmd_install, cmd_plan};
pub use uninstall::cmd_uninstall;

use anyhow::{Context, Result};
use installkit::operation::FileKeyStore;
use installkit::{Role, SessionConfig, SessionServices, read_layout};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Role recorded in the running binary, if it is a maintenance tool
pub fn embedded_role() -> Option<Role> {
    let exe = std::env::current_exe().ok()?;
    match read_layout(&exe) {
        Ok(layout) => Some(layout.role),
        Err(e) => {
            debug!("No layout in {}: {}", exe.display(), e);
            None
        }
    }
}

fn load_config(path: &Path) -> Result<SessionConfig> {
    SessionConfig::load(path).with_context(|| format!("Invalid configuration {}", path.display()))
}

/// Default collaborators for `config`, with an optional file-backed key store
fn services(config: &SessionConfig, key_store: Option<&Path>) -> Result<SessionServices> {
    let mut services = SessionServices::for_config(config);
    if let Some(path) = key_store {
        let store = FileKeyStore::open(path)
            .with_context(|| format!("Cannot open key store {}", path.display()))?;
        services = services.with_store(Arc::new(store));
    }
    Ok(services)
}
