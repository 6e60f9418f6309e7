// src/operation/mod.rs

//! Reversible operations
//!
//! Every mutation an installer makes is modeled as an `Operation`: a kind tag,
//! positional arguments and a key-ordered parameter bag. The lifecycle is
//! `backup` -> `perform`, and later `undo`. Undo only uses what was captured
//! in the parameter bag at perform time, so an operation restored from the
//! installed registry or from a maintenance tool can be undone in a later
//! process.
//!
//! | Kind | Arguments | Undo |
//! |------|-----------|------|
//! | `mkdir` | path | removes what was created |
//! | `copy` | src dst | deletes dst, restores backup |
//! | `move` | src dst | moves back, restores backup |
//! | `delete` | path | restores backup |
//! | `registry-write` | key value | restores previous value |
//! | `execute` | program args.. [UNDOEXECUTE program args..] | runs undo command |
//! | `hook-call` | event | calls hook with `undo-<event>` |
//! | `minimum-progress` | | nothing |

mod fs;
mod keystore;
mod process;

pub use fs::uninstall_path_operations;
pub use keystore::{FileKeyStore, KeyValueStore, MemoryKeyStore};
pub use process::{
    DEFAULT_PROCESS_TIMEOUT, ProcessOutput, ProcessRequest, ProcessRunner, SystemProcessRunner,
};

use crate::elevation::AdminRights;
use crate::error::{Error, Result};
use crate::hook::{ComponentHook, HookEvent, HookVerdict};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Well-known parameter names
pub mod keys {
    /// Owning component; empty for session-owned operations
    pub const COMPONENT: &str = "component";
    pub const ADMIN: &str = "admin";
    /// Kept across updates, only undone by a full uninstall or a rollback
    pub const UNINSTALL_ONLY: &str = "uninstall-only";
    pub const FORCE_REMOVAL: &str = "forceremoval";
    pub const WEIGHT: &str = "weight";
    pub const CREATED_DIR: &str = "createddir";
    pub const BACKUP: &str = "backup";
    pub const PREVIOUS_VALUE: &str = "previous-value";
    pub const HAD_VALUE: &str = "had-value";
}

/// Separator between the perform and undo command of an `Execute` operation
pub const UNDO_EXECUTE: &str = "UNDOEXECUTE";

static VARIABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z_][A-Za-z0-9_]*)@").unwrap());

/// Replace `@Name@` placeholders with values from `variables`
///
/// Unknown names are left untouched.
pub fn replace_variables(text: &str, variables: &BTreeMap<String, String>) -> String {
    VARIABLE_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            variables
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Sum of operation weights, saturating at `u64::MAX`
pub fn total_weight<'o>(operations: impl IntoIterator<Item = &'o Operation>) -> u64 {
    operations
        .into_iter()
        .fold(0u64, |sum, op| sum.saturating_add(op.weight()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Mkdir,
    Copy,
    Move,
    Delete,
    RegistryWrite,
    Execute,
    HookCall,
    MinimumProgress,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Mkdir => "mkdir",
            OperationKind::Copy => "copy",
            OperationKind::Move => "move",
            OperationKind::Delete => "delete",
            OperationKind::RegistryWrite => "registry-write",
            OperationKind::Execute => "execute",
            OperationKind::HookCall => "hook-call",
            OperationKind::MinimumProgress => "minimum-progress",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collaborators an operation may touch while performing or undoing
#[derive(Clone, Copy)]
pub struct OperationContext<'a> {
    pub store: &'a dyn KeyValueStore,
    pub runner: &'a dyn ProcessRunner,
    pub hook: &'a dyn ComponentHook,
    /// Where overwritten and deleted files are kept until the run ends
    pub backup_dir: &'a Path,
    pub process_timeout: Duration,
    /// Present while the executor holds an admin guard
    pub rights: Option<&'a AdminRights>,
}

impl fmt::Debug for OperationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("backup_dir", &self.backup_dir)
            .field("process_timeout", &self.process_timeout)
            .field("elevated", &self.rights.is_some())
            .finish()
    }
}

/// One reversible mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    /// Position in the session log, assigned when performed
    #[serde(default)]
    pub sequence: u64,
}

impl Operation {
    pub fn new(kind: OperationKind, arguments: Vec<String>) -> Self {
        Self {
            kind,
            arguments,
            values: BTreeMap::new(),
            sequence: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn set_value(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set_flag(&mut self, key: &str, on: bool) {
        self.set_value(key, if on { "true" } else { "false" });
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.value(key), Some("true") | Some("1"))
    }

    /// Owning component key, empty for session-owned operations
    pub fn component(&self) -> &str {
        self.value(keys::COMPONENT).unwrap_or("")
    }

    pub fn is_admin(&self) -> bool {
        self.flag(keys::ADMIN)
    }

    pub fn is_uninstall_only(&self) -> bool {
        self.flag(keys::UNINSTALL_ONLY)
    }

    /// Whether `backup` or a partial `perform` captured something to undo
    pub fn has_undo_state(&self) -> bool {
        [keys::BACKUP, keys::CREATED_DIR, keys::HAD_VALUE]
            .iter()
            .any(|key| self.values.contains_key(*key))
    }

    /// Progress weight, 1 unless declared
    pub fn weight(&self) -> u64 {
        self.value(keys::WEIGHT)
            .and_then(|w| w.trim().parse().ok())
            .unwrap_or(1)
    }

    /// Short human readable form for logs and progress messages
    pub fn describe(&self) -> String {
        if self.arguments.is_empty() {
            self.name().to_string()
        } else {
            format!("{} {}", self.name(), self.arguments.join(" "))
        }
    }

    /// Expand `@Name@` placeholders in arguments and values
    pub fn substitute_variables(&mut self, variables: &BTreeMap<String, String>) {
        for arg in &mut self.arguments {
            *arg = replace_variables(arg, variables);
        }
        for value in self.values.values_mut() {
            *value = replace_variables(value, variables);
        }
    }

    /// Capture what `undo` needs before anything changes
    ///
    /// Running it twice keeps the first capture.
    pub fn backup(&mut self, ctx: &OperationContext<'_>) -> Result<()> {
        match self.kind {
            OperationKind::Copy | OperationKind::Move => {
                let dst = PathBuf::from(self.arg(1)?);
                if self.value(keys::BACKUP).is_none() && dst.is_file() {
                    let backup = fs::backup_file(&dst, ctx.backup_dir)?;
                    self.set_value(keys::BACKUP, backup.to_string_lossy());
                }
            }
            OperationKind::Delete => {
                let path = PathBuf::from(self.arg(0)?);
                if self.value(keys::BACKUP).is_none() && path.is_file() {
                    let backup = fs::backup_file(&path, ctx.backup_dir)?;
                    self.set_value(keys::BACKUP, backup.to_string_lossy());
                }
            }
            OperationKind::RegistryWrite => {
                if self.value(keys::HAD_VALUE).is_none() {
                    let key = self.arg(0)?.to_string();
                    match ctx.store.get(&key)? {
                        Some(previous) => {
                            self.set_flag(keys::HAD_VALUE, true);
                            self.set_value(keys::PREVIOUS_VALUE, previous);
                        }
                        None => self.set_flag(keys::HAD_VALUE, false),
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Apply the mutation
    pub fn perform(&mut self, ctx: &OperationContext<'_>) -> Result<()> {
        debug!("Performing {}", self.describe());
        match self.kind {
            OperationKind::Mkdir => {
                self.expect_args(1)?;
                let path = PathBuf::from(self.arg(0)?);
                // Recorded first: a partial create_dir_all must still be undoable
                if let Some(top) = fs::top_missing_ancestor(&path) {
                    if self.value(keys::CREATED_DIR).is_none() {
                        self.set_value(keys::CREATED_DIR, top.to_string_lossy());
                    }
                    std::fs::create_dir_all(&path)
                        .map_err(|e| self.io_failure("create directory", &path, e))?;
                }
                Ok(())
            }
            OperationKind::Copy => {
                self.expect_args(2)?;
                let src = PathBuf::from(self.arg(0)?);
                let dst = PathBuf::from(self.arg(1)?);
                fs::copy_file(&src, &dst).map_err(|e| self.io_failure("copy", &src, e))
            }
            OperationKind::Move => {
                self.expect_args(2)?;
                let src = PathBuf::from(self.arg(0)?);
                let dst = PathBuf::from(self.arg(1)?);
                // Already moved by an earlier attempt
                if !src.exists() && dst.exists() {
                    return Ok(());
                }
                fs::move_file(&src, &dst).map_err(|e| self.io_failure("move", &src, e))
            }
            OperationKind::Delete => {
                self.expect_args(1)?;
                let path = PathBuf::from(self.arg(0)?);
                match std::fs::remove_file(&path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(self.io_failure("delete", &path, e)),
                }
            }
            OperationKind::RegistryWrite => {
                self.expect_args(2)?;
                ctx.store.set(self.arg(0)?, self.arg(1)?)
            }
            OperationKind::Execute => {
                let (perform, _) = self.split_execute();
                run_command(self, ctx, perform)
            }
            OperationKind::HookCall => {
                self.expect_args(1)?;
                let event = HookEvent::Call(self.arg(0)?.to_string());
                self.call_hook(ctx, &event)
            }
            OperationKind::MinimumProgress => Ok(()),
        }
    }

    /// Reverse a performed mutation
    pub fn undo(&self, ctx: &OperationContext<'_>) -> Result<()> {
        debug!("Undoing {}", self.describe());
        match self.kind {
            OperationKind::Mkdir => {
                let Some(created) = self.value(keys::CREATED_DIR) else {
                    return Ok(());
                };
                let created = PathBuf::from(created);
                if !created.exists() {
                    return Ok(());
                }
                if self.flag(keys::FORCE_REMOVAL) {
                    std::fs::remove_dir_all(&created)
                        .map_err(|e| self.io_failure("remove directory", &created, e))
                } else {
                    let leaf = PathBuf::from(self.arg(0)?);
                    fs::remove_empty_dirs(&leaf, &created);
                    Ok(())
                }
            }
            OperationKind::Copy => {
                let dst = PathBuf::from(self.arg(1)?);
                self.remove_and_restore(&dst)
            }
            OperationKind::Move => {
                let src = PathBuf::from(self.arg(0)?);
                let dst = PathBuf::from(self.arg(1)?);
                if dst.exists() && !src.exists() {
                    fs::move_file(&dst, &src).map_err(|e| self.io_failure("move back", &dst, e))?;
                }
                self.restore_backup(&dst)
            }
            OperationKind::Delete => {
                let path = PathBuf::from(self.arg(0)?);
                self.restore_backup(&path)
            }
            OperationKind::RegistryWrite => {
                let key = self.arg(0)?;
                match (self.flag(keys::HAD_VALUE), self.value(keys::PREVIOUS_VALUE)) {
                    (true, Some(previous)) => ctx.store.set(key, previous),
                    _ => ctx.store.delete(key),
                }
            }
            OperationKind::Execute => match self.split_execute() {
                (_, Some(undo)) => run_command(self, ctx, undo),
                (_, None) => Ok(()),
            },
            OperationKind::HookCall => {
                let event = HookEvent::UndoCall(self.arg(0)?.to_string());
                self.call_hook(ctx, &event)
            }
            OperationKind::MinimumProgress => Ok(()),
        }
    }

    fn arg(&self, index: usize) -> Result<&str> {
        self.arguments.get(index).map(String::as_str).ok_or_else(|| {
            Error::operation(
                self.name(),
                format!("Missing argument {} in {:?}", index + 1, self.arguments),
            )
        })
    }

    fn expect_args(&self, count: usize) -> Result<()> {
        if self.arguments.len() != count {
            return Err(Error::operation(
                self.name(),
                format!(
                    "Invalid arguments: {} given, exactly {} expected",
                    self.arguments.len(),
                    count
                ),
            ));
        }
        Ok(())
    }

    fn io_failure(&self, action: &str, path: &Path, err: io::Error) -> Error {
        Error::operation(
            self.name(),
            format!("Cannot {} {}: {}", action, path.display(), err),
        )
    }

    fn remove_and_restore(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(self.io_failure("remove", path, e)),
        }
        self.restore_backup(path)
    }

    fn restore_backup(&self, path: &Path) -> Result<()> {
        let Some(backup) = self.value(keys::BACKUP) else {
            return Ok(());
        };
        let backup = Path::new(backup);
        if !backup.exists() {
            warn!(
                "Backup {} for {} is gone, cannot restore",
                backup.display(),
                path.display()
            );
            return Ok(());
        }
        if path.is_file() {
            std::fs::remove_file(path).map_err(|e| self.io_failure("replace", path, e))?;
        }
        fs::move_file(backup, path).map_err(|e| self.io_failure("restore", path, e))
    }

    /// Perform and undo halves of an `Execute` argument list
    fn split_execute(&self) -> (&[String], Option<&[String]>) {
        match self.arguments.iter().position(|a| a == UNDO_EXECUTE) {
            Some(at) => {
                let undo = &self.arguments[at + 1..];
                (
                    &self.arguments[..at],
                    if undo.is_empty() { None } else { Some(undo) },
                )
            }
            None => (&self.arguments[..], None),
        }
    }

    fn call_hook(&self, ctx: &OperationContext<'_>, event: &HookEvent) -> Result<()> {
        match ctx.hook.on_event(self.component(), event, &self.values) {
            HookVerdict::Allow | HookVerdict::Modify(_) => Ok(()),
            HookVerdict::Deny(reason) => Err(Error::operation(
                self.name(),
                format!("Hook refused {}: {}", event, reason),
            )),
        }
    }
}

fn run_command(op: &Operation, ctx: &OperationContext<'_>, command: &[String]) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        return Err(Error::operation(op.name(), "No program given"));
    };
    let output = ctx.runner.run(&ProcessRequest {
        program,
        args,
        timeout: ctx.process_timeout,
        elevated: ctx.rights.is_some(),
    })?;
    if !output.success() {
        return Err(Error::operation(
            op.name(),
            format!("{} exited with code {}", program, output.code),
        ));
    }
    Ok(())
}
