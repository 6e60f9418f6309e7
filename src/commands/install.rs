// src/commands/install.rs
//! Planning and installing a selection

use super::progress::CliProgress;
use super::{embedded_role, load_config, services};
use crate::cli::SessionArgs;
use anyhow::{Context, Result, bail};
use installkit::{Catalog, FetchOutcome, InstallPlan, Role, RunOutcome, Session};
use std::sync::Arc;
use tracing::info;

/// Open a session, merge the catalog and apply the requested selection
fn prepare(args: &SessionArgs, with_progress: bool) -> Result<Session> {
    let config = load_config(&args.config)?;
    let catalog = Catalog::load(&args.catalog)
        .with_context(|| format!("Cannot load catalog {}", args.catalog.display()))?;
    let role = args.role.or_else(embedded_role).unwrap_or(Role::Installer);

    let mut services = services(&config, args.key_store.as_deref())?;
    if with_progress {
        services = services.with_progress(Arc::new(CliProgress::new(&role.to_string())));
    }

    let mut session = Session::open_with(config, role, services)?;
    if let FetchOutcome::ForceUpdate(message) = session.fetch(&catalog.packages)? {
        println!("{}", message);
    }

    for key in &args.select {
        session
            .select(key)
            .with_context(|| format!("Cannot select {}", key))?;
    }
    for key in &args.deselect {
        session
            .deselect(key)
            .with_context(|| format!("Cannot deselect {}", key))?;
    }
    Ok(session)
}

fn print_plan(session: &Session, plan: &InstallPlan, removal: &[String]) {
    println!("Components to install ({}):", plan.ordered.len());
    for key in &plan.ordered {
        let Some(component) = session.component(key) else {
            continue;
        };
        let reason = plan
            .reason(key)
            .map(|r| r.to_string())
            .unwrap_or_default();
        let state = if component.installed && !component.update_requested {
            " [installed]"
        } else {
            ""
        };
        println!("  {} {} ({}){}", key, component.version, reason, state);
    }

    if !removal.is_empty() {
        println!("Components to uninstall ({}):", removal.len());
        for key in removal {
            println!("  {}", key);
        }
    }

    if let Some(error) = &plan.error {
        println!("Unresolved requirements:");
        for line in error.lines() {
            println!("  {}", line);
        }
    }
}

pub fn cmd_plan(args: &SessionArgs) -> Result<()> {
    let mut session = prepare(args, false)?;
    let plan = session.calculate_components_to_install()?;
    let removal = session.calculate_components_to_uninstall();
    print_plan(&session, &plan, &removal);
    Ok(())
}

pub fn cmd_install(args: &SessionArgs) -> Result<()> {
    let mut session = prepare(args, true)?;
    let plan = session.calculate_components_to_install()?;
    if let Some(error) = &plan.error {
        bail!("Selection cannot be installed:\n{}", error);
    }
    let removal = session.calculate_components_to_uninstall();
    info!(
        "Running {} with {} components to install and {} to uninstall",
        session.role(),
        plan.ordered.len(),
        removal.len()
    );

    match session.run(&plan.ordered, &removal) {
        RunOutcome::Success => {
            println!(
                "Installed into {}",
                session.config().target_dir.display()
            );
            Ok(())
        }
        RunOutcome::Failure(message) => bail!("Installation failed: {}", message),
        RunOutcome::Canceled => bail!("Installation canceled"),
    }
}
