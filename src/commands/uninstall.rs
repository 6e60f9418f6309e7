// src/commands/uninstall.rs
//! Full uninstall of a target directory

use super::progress::CliProgress;
use super::{load_config, services};
use anyhow::{Result, bail};
use installkit::{Role, RunOutcome, Session};
use std::path::Path;
use std::sync::Arc;

pub fn cmd_uninstall(config: &Path, key_store: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let target = config.target_dir.clone();
    let services = services(&config, key_store)?
        .with_progress(Arc::new(CliProgress::new("Uninstalling")));

    let mut session = Session::open_with(config, Role::Uninstaller, services)?;
    if session.registry().packages().is_empty() && session.old_operations().is_empty() {
        println!("Nothing is installed in {}", target.display());
        return Ok(());
    }

    match session.run(&[], &[]) {
        RunOutcome::Success => {
            println!("Removed installation in {}", target.display());
            Ok(())
        }
        RunOutcome::Failure(message) => bail!("Uninstall failed: {}", message),
        RunOutcome::Canceled => bail!("Uninstall canceled"),
    }
}
