// src/maintenance/writer.rs

//! Writing maintenance tools to the target directory

use super::layout::{encode_payload, executable_len};
use crate::error::{Error, Result};
use crate::installed::InstalledRegistry;
use crate::role::Role;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

fn persistence(context: &str, path: &Path, err: impl std::fmt::Display) -> Error {
    Error::PersistenceFailed(format!("{} {}: {}", context, path.display(), err))
}

/// Writes `<target_dir>/<name>` from a base executable and a registry
#[derive(Debug, Clone)]
pub struct MaintenanceToolWriter {
    base_binary: PathBuf,
    target_dir: PathBuf,
    name: String,
}

impl MaintenanceToolWriter {
    pub fn new(
        base_binary: impl Into<PathBuf>,
        target_dir: impl Into<PathBuf>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            base_binary: base_binary.into(),
            target_dir: target_dir.into(),
            name: name.into(),
        }
    }

    /// Final path of the maintenance tool
    pub fn path(&self) -> PathBuf {
        self.target_dir.join(&self.name)
    }

    /// Write the tool for `role` carrying `registry`
    ///
    /// The file is completed under a temporary name, persisted as
    /// `<name>.new` and then renamed over `<name>`.
    pub fn write(&self, role: Role, registry: &InstalledRegistry) -> Result<PathBuf> {
        let base = fs::read(&self.base_binary)
            .map_err(|e| persistence("Failed to read base binary", &self.base_binary, e))?;
        let exe_len = executable_len(&base);
        if exe_len != base.len() as u64 {
            debug!(
                "Base binary {} already carries a layout, reusing its first {} bytes",
                self.base_binary.display(),
                exe_len
            );
        }
        // exe_len never exceeds base.len()
        let exe = &base[..exe_len as usize];
        let payload = encode_payload(role, registry, exe_len)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.target_dir)
            .map_err(|e| persistence("Failed to create temp file in", &self.target_dir, e))?;
        let tmp_path = tmp.path().to_path_buf();
        tmp.write_all(exe)
            .and_then(|_| tmp.write_all(&payload))
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| persistence("Failed to write", &tmp_path, e))?;

        // Executable before it is visible under its final name
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o755))
                .map_err(|e| persistence("Failed to set permissions on", &tmp_path, e))?;
        }

        let staged = self.target_dir.join(format!("{}.new", self.name));
        tmp.persist(&staged)
            .map_err(|e| persistence("Failed to persist", &staged, e))?;

        let path = self.path();
        if let Err(e) = fs::rename(&staged, &path) {
            let _ = fs::remove_file(&staged);
            return Err(persistence("Failed to rename to", &path, e));
        }

        info!(
            "Wrote {} maintenance tool {} ({} bytes)",
            role,
            path.display(),
            exe.len() + payload.len()
        );
        Ok(path)
    }
}

/// Delete a maintenance tool and any leftover staged copy
pub fn remove_maintenance_tool(target_dir: &Path, name: &str) -> Result<()> {
    for path in [
        target_dir.join(name),
        target_dir.join(format!("{}.new", name)),
    ] {
        match fs::remove_file(&path) {
            Ok(()) => info!("Removed maintenance tool {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installed::{LocalPackage, RegistryDocument};
    use crate::maintenance::read_layout;
    use tempfile::TempDir;

    fn registry(dir: &Path) -> InstalledRegistry {
        let mut doc = RegistryDocument::default();
        doc.packages
            .insert("app".into(), LocalPackage::new("app", "2.0"));
        InstalledRegistry::from_document(dir.join("components.json"), doc)
    }

    #[test]
    fn test_write_and_read_back() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("base");
        fs::write(&base, b"#!/bin/true\n").unwrap();

        let writer = MaintenanceToolWriter::new(&base, temp.path(), "maintenancetool");
        let path = writer.write(Role::Uninstaller, &registry(temp.path())).unwrap();

        assert_eq!(path, temp.path().join("maintenancetool"));
        assert!(!temp.path().join("maintenancetool.new").exists());
        let layout = read_layout(&path).unwrap();
        assert_eq!(layout.role, Role::Uninstaller);
        assert_eq!(layout.exe_len, 12);
        assert!(layout.metadata.packages.contains_key("app"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_rewrite_keeps_original_executable() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("base");
        fs::write(&base, b"executable").unwrap();

        let first = MaintenanceToolWriter::new(&base, temp.path(), "tool")
            .write(Role::Installer, &registry(temp.path()))
            .unwrap();
        // Rewrite using the tool itself as base
        let second = MaintenanceToolWriter::new(&first, temp.path(), "tool")
            .write(Role::PackageManager, &registry(temp.path()))
            .unwrap();

        let layout = read_layout(&second).unwrap();
        assert_eq!(layout.role, Role::PackageManager);
        assert_eq!(layout.exe_len, 10);
        assert!(fs::read(&second).unwrap().starts_with(b"executable"));
    }

    #[test]
    fn test_failed_rename_leaves_no_tool() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("base");
        fs::write(&base, b"executable").unwrap();
        // A non-empty directory in the way of the final name
        fs::create_dir_all(temp.path().join("tool/keep")).unwrap();

        let err = MaintenanceToolWriter::new(&base, temp.path(), "tool")
            .write(Role::PackageManager, &registry(temp.path()))
            .unwrap_err();
        assert!(matches!(err, Error::PersistenceFailed(_)));
        assert!(!temp.path().join("tool.new").exists());
        assert!(temp.path().join("tool/keep").is_dir());
    }

    #[test]
    fn test_missing_base_is_persistence_failure() {
        let temp = TempDir::new().unwrap();
        let writer = MaintenanceToolWriter::new(temp.path().join("nope"), temp.path(), "tool");
        let err = writer.write(Role::Installer, &registry(temp.path())).unwrap_err();
        assert!(matches!(err, Error::PersistenceFailed(_)));
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("tool"), b"x").unwrap();
        remove_maintenance_tool(temp.path(), "tool").unwrap();
        assert!(!temp.path().join("tool").exists());
        // Removing again is fine
        remove_maintenance_tool(temp.path(), "tool").unwrap();
    }
}
