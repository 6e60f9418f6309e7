// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Logs go to stderr so plans and reports stay pipeable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Plan { session }) => commands::cmd_plan(&session),
        Some(Commands::Install { session }) => commands::cmd_install(&session),
        Some(Commands::Uninstall { config, key_store }) => {
            commands::cmd_uninstall(&config, key_store.as_deref())
        }
        Some(Commands::Inspect { binary }) => commands::cmd_inspect(&binary),
        None => {
            println!("installkit v{}", env!("CARGO_PKG_VERSION"));
            if let Some(role) = commands::embedded_role() {
                println!("This binary is a maintenance tool ({})", role);
            }
            println!("Run 'installkit --help' for usage information");
            Ok(())
        }
    }
}
