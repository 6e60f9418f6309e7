// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: session configuration file
fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("PATH")
        .required(true)
        .help("Session configuration file (TOML)")
}

/// Common argument: key store used by registry operations
fn key_store_arg() -> Arg {
    Arg::new("key_store")
        .long("key-store")
        .value_name("PATH")
        .help("File-backed key store used by registry operations")
}

/// Arguments shared by commands that resolve a selection
fn selection_args(cmd: Command) -> Command {
    cmd.arg(config_arg())
        .arg(
            Arg::new("catalog")
                .long("catalog")
                .value_name("PATH")
                .required(true)
                .help("Catalog of available packages (JSON)"),
        )
        .arg(
            Arg::new("select")
                .short('s')
                .long("select")
                .value_name("KEY")
                .action(clap::ArgAction::Append)
                .help("Component key to select (repeatable)"),
        )
        .arg(
            Arg::new("deselect")
                .long("deselect")
                .value_name("KEY")
                .action(clap::ArgAction::Append)
                .help("Component key to deselect (repeatable)"),
        )
        .arg(
            Arg::new("role")
                .long("role")
                .value_parser([
                    "installer",
                    "package-manager",
                    "updater",
                    "uninstaller",
                    "reinstaller",
                    "offline-generator",
                ])
                .help("Role to run as (default: taken from this binary, else installer)"),
        )
        .arg(key_store_arg())
}

fn build_cli() -> Command {
    Command::new("installkit")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Installkit Contributors")
        .about("Install, maintain and remove component-based products")
        .subcommand_required(false)
        .subcommand(selection_args(
            Command::new("plan").about("Show what a selection would install and remove"),
        ))
        .subcommand(selection_args(
            Command::new("install").about("Install, update or change the selected components"),
        ))
        .subcommand(
            Command::new("uninstall")
                .about("Remove everything installed in the target directory")
                .arg(config_arg())
                .arg(key_store_arg()),
        )
        .subcommand(
            Command::new("inspect")
                .about("Show the role and embedded registry of a maintenance tool")
                .arg(Arg::new("binary").required(true).help("Path to the maintenance tool")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("installkit.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
        return;
    }

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
