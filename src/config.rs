// src/config.rs

//! Session configuration
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! target_dir = "/opt/example"
//! maintenance_tool_name = "maintenancetool"
//! repository_dir = "/srv/example/repo"
//!
//! [variables]
//! ProductName = "Example"
//! ```
//!
//! Everything except `target_dir` has a default.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Installation directory
    pub target_dir: PathBuf,

    /// File name of the maintenance tool written into the target directory
    #[serde(default = "default_maintenance_tool_name")]
    pub maintenance_tool_name: String,

    /// File name of the installed registry inside the target directory
    #[serde(default = "default_registry_file")]
    pub registry_file: String,

    /// Record the target directory creation so a full uninstall removes it
    #[serde(default = "default_true")]
    pub remove_target_dir: bool,

    #[serde(default = "default_true")]
    pub write_maintenance_tool: bool,

    /// Executable the maintenance tool is built from (defaults to the running binary)
    #[serde(default)]
    pub base_binary: Option<PathBuf>,

    /// Where downloaded archives are kept (defaults to `<target>/.downloads`)
    #[serde(default)]
    pub download_dir: Option<PathBuf>,

    /// Local repository root for archive fetching
    #[serde(default)]
    pub repository_dir: Option<PathBuf>,

    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,

    /// Timeout for each Execute operation
    #[serde(default = "default_process_timeout")]
    pub process_timeout_secs: u64,

    /// Values for `@Name@` placeholders in operations
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

fn default_maintenance_tool_name() -> String {
    "maintenancetool".to_string()
}

fn default_registry_file() -> String {
    "components.json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_lock_timeout() -> u64 {
    5
}

fn default_process_timeout() -> u64 {
    300
}

impl SessionConfig {
    /// Configuration with defaults for everything but the target directory
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            maintenance_tool_name: default_maintenance_tool_name(),
            registry_file: default_registry_file(),
            remove_target_dir: true,
            write_maintenance_tool: true,
            base_binary: None,
            download_dir: None,
            repository_dir: None,
            lock_timeout_secs: default_lock_timeout(),
            process_timeout_secs: default_process_timeout(),
            variables: BTreeMap::new(),
        }
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        debug!("Loaded session config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_dir.as_os_str().is_empty() {
            return Err(Error::ConfigError("target_dir must not be empty".into()));
        }
        for (field, value) in [
            ("maintenance_tool_name", &self.maintenance_tool_name),
            ("registry_file", &self.registry_file),
        ] {
            if value.is_empty() || value.contains(['/', '\\']) || value == "." || value == ".." {
                return Err(Error::ConfigError(format!(
                    "{} must be a plain file name, got '{}'",
                    field, value
                )));
            }
        }
        if self.maintenance_tool_name == self.registry_file {
            return Err(Error::ConfigError(
                "maintenance_tool_name and registry_file must differ".into(),
            ));
        }
        if self.lock_timeout_secs == 0 || self.process_timeout_secs == 0 {
            return Err(Error::ConfigError("Timeouts must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn registry_path(&self) -> PathBuf {
        self.target_dir.join(&self.registry_file)
    }

    /// Lock file guarding the target directory
    ///
    /// Lives in the system temp directory so that locking never creates
    /// anything inside the target.
    pub fn lock_path(&self) -> PathBuf {
        let id = crc32fast::hash(self.target_dir.to_string_lossy().as_bytes());
        std::env::temp_dir().join(format!("installkit-{:08x}.lock", id))
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| self.target_dir.join(".downloads"))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }

    /// Substitution variables, including the built-in `TargetDir`
    pub fn substitution_variables(&self) -> BTreeMap<String, String> {
        let mut vars = self.variables.clone();
        vars.entry("TargetDir".to_string())
            .or_insert_with(|| self.target_dir.display().to_string());
        vars.entry("MaintenanceToolName".to_string())
            .or_insert_with(|| self.maintenance_tool_name.clone());
        vars
    }
}
