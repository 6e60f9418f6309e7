// src/cli.rs
//! CLI definitions for installkit
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.

use clap::{Args, Parser, Subcommand};
use installkit::Role;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "installkit")]
#[command(author = "Installkit Contributors")]
#[command(version)]
#[command(about = "Install, maintain and remove component-based products", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show what a selection would install and remove
    Plan {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Install, update or change the selected components
    Install {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Remove everything installed in the target directory
    Uninstall {
        /// Session configuration file (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// File-backed key store used by registry operations
        #[arg(long)]
        key_store: Option<PathBuf>,
    },

    /// Show the role and embedded registry of a maintenance tool
    Inspect {
        /// Path to the maintenance tool
        binary: PathBuf,
    },
}

/// Arguments shared by commands that resolve a selection
#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Session configuration file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Catalog of available packages (JSON)
    #[arg(long)]
    pub catalog: PathBuf,

    /// Component key to select (repeatable)
    #[arg(short, long = "select", value_name = "KEY")]
    pub select: Vec<String>,

    /// Component key to deselect (repeatable)
    #[arg(long = "deselect", value_name = "KEY")]
    pub deselect: Vec<String>,

    /// Role to run as (default: taken from this binary, else installer)
    #[arg(long)]
    pub role: Option<Role>,

    /// File-backed key store used by registry operations
    #[arg(long)]
    pub key_store: Option<PathBuf>,
}
