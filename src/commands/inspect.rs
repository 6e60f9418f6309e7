// src/commands/inspect.rs
//! Maintenance tool inspection

use anyhow::{Context, Result};
use installkit::read_layout;
use std::path::Path;

pub fn cmd_inspect(binary: &Path) -> Result<()> {
    let layout = read_layout(binary)
        .with_context(|| format!("{} is not a maintenance tool", binary.display()))?;

    println!("Maintenance tool: {}", binary.display());
    println!("  Role: {}", layout.role);
    println!("  Executable size: {} bytes", layout.exe_len);
    println!("  Written: {}", layout.metadata.created);
    println!("  Generator: {}", layout.metadata.generator);
    println!("  Operations: {}", layout.operations.len());

    println!("Packages ({}):", layout.metadata.packages.len());
    for (name, package) in &layout.metadata.packages {
        let ops = layout
            .operations
            .iter()
            .filter(|op| op.component() == name)
            .count();
        println!("  {} {} ({} operations)", name, package.version, ops);
    }

    let detached = layout
        .operations
        .iter()
        .filter(|op| op.component().is_empty())
        .count();
    if detached > 0 {
        println!("Session operations: {}", detached);
    }
    Ok(())
}
