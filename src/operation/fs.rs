// src/operation/fs.rs

//! Filesystem helpers shared by the file operations

use super::{Operation, OperationKind, keys, replace_variables};
use crate::catalog::UninstallPath;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Move a file, falling back to copy+sync+delete across filesystems.
///
/// `rename` fails with EXDEV when source and destination live on different
/// mounts (backup dir on /tmp, target on /opt).
pub(crate) fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            debug!(
                "Cross-filesystem move ({} -> {}), using copy fallback",
                src.display(),
                dst.display()
            );

            fs::copy(src, dst)?;
            let file = File::open(dst)?;
            file.sync_all()?;
            drop(file);

            if let Some(parent) = dst.parent()
                && let Ok(dir) = File::open(parent)
            {
                // Not every filesystem supports fsync on directories
                let _ = dir.sync_all();
            }

            fs::remove_file(src)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Copy `src` over `dst` through a temp file in `dst`'s directory
///
/// `dst` is only replaced once the full content is on disk, so a failed copy
/// leaves an existing destination untouched. Permissions follow `src`.
pub(crate) fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    let mut source = File::open(src)?;
    let permissions = source.metadata()?.permissions();
    let dir = dst
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    io::copy(&mut source, &mut staged)?;
    staged.as_file().set_permissions(permissions)?;
    staged.persist(dst).map_err(|e| e.error)?;
    Ok(())
}

/// Copy `path` into `backup_dir` under a unique name
pub(crate) fn backup_file(path: &Path, backup_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(backup_dir).map_err(|e| {
        Error::IoError(format!(
            "Failed to create backup directory {}: {}",
            backup_dir.display(),
            e
        ))
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let backup = backup_dir.join(format!("{}-{}", Uuid::new_v4(), file_name));

    fs::copy(path, &backup).map_err(|e| {
        Error::IoError(format!(
            "Failed to back up {} to {}: {}",
            path.display(),
            backup.display(),
            e
        ))
    })?;
    debug!("Backed up {} to {}", path.display(), backup.display());
    Ok(backup)
}

/// Top-most ancestor of `path` (inclusive) that does not exist yet
pub(crate) fn top_missing_ancestor(path: &Path) -> Option<PathBuf> {
    let mut top = None;
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() || ancestor.exists() {
            break;
        }
        top = Some(ancestor.to_path_buf());
    }
    top
}

/// Remove empty directories from `leaf` up to and including `top`
///
/// Stops at the first directory that is not empty and leaves it in place.
pub(crate) fn remove_empty_dirs(leaf: &Path, top: &Path) {
    for dir in leaf.ancestors() {
        if !dir.starts_with(top) {
            break;
        }
        if dir.exists() {
            if let Err(e) = fs::remove_dir(dir) {
                warn!("Leaving directory {} in place: {}", dir.display(), e);
                break;
            }
        }
        if dir == top {
            break;
        }
    }
}

/// Build undo-only records for a component's extra uninstall paths
///
/// Directories become `Mkdir` records whose undo removes them, files become
/// `Copy` records whose undo deletes the file. Unless `wipe` is set, a
/// directory is walked so its entries are removed one by one before the
/// directory itself.
pub fn uninstall_path_operations(
    component: &str,
    paths: &[UninstallPath],
    variables: &BTreeMap<String, String>,
) -> Vec<Operation> {
    let mut operations = Vec::new();

    for entry in paths {
        let path = PathBuf::from(replace_variables(&entry.path, variables));
        if path.is_dir() {
            let mut op = path_operation(component, &path, true);
            op.set_flag(keys::FORCE_REMOVAL, entry.wipe);
            operations.push(op);

            if !entry.wipe {
                for item in WalkDir::new(&path).min_depth(1).into_iter().flatten() {
                    operations.push(path_operation(
                        component,
                        item.path(),
                        item.file_type().is_dir(),
                    ));
                }
            }
        } else {
            operations.push(path_operation(component, &path, false));
        }
    }

    debug!(
        "Registered {} uninstall records for {}",
        operations.len(),
        component
    );
    operations
}

fn path_operation(component: &str, path: &Path, is_dir: bool) -> Operation {
    let target = path.to_string_lossy().into_owned();
    let mut op = if is_dir {
        let mut op = Operation::new(OperationKind::Mkdir, vec![target.clone()]);
        op.set_value(keys::CREATED_DIR, &target);
        op
    } else {
        Operation::new(OperationKind::Copy, vec![String::new(), target])
    };
    op.set_value(keys::COMPONENT, component);
    op
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_move_file_same_fs() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.txt");
        let dst = temp.path().join("b.txt");
        fs::write(&src, "content").unwrap();

        move_file(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "content");
    }

    #[test]
    fn test_top_missing_ancestor() {
        let temp = TempDir::new().unwrap();
        let deep = temp.path().join("x/y/z");
        assert_eq!(top_missing_ancestor(&deep), Some(temp.path().join("x")));
        assert_eq!(top_missing_ancestor(temp.path()), None);
    }

    #[test]
    fn test_remove_empty_dirs_stops_at_content() {
        let temp = TempDir::new().unwrap();
        let top = temp.path().join("a");
        let leaf = top.join("b/c");
        fs::create_dir_all(&leaf).unwrap();
        fs::write(top.join("keep.txt"), "user data").unwrap();

        remove_empty_dirs(&leaf, &top);
        assert!(!top.join("b").exists());
        assert!(top.exists());
    }

    #[test]
    fn test_uninstall_paths_walk_directory() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("cache");
        fs::create_dir_all(cache.join("sub")).unwrap();
        fs::write(cache.join("sub/data.bin"), "x").unwrap();

        let mut vars = BTreeMap::new();
        vars.insert("TargetDir".to_string(), temp.path().to_string_lossy().into_owned());
        let paths = vec![UninstallPath {
            path: "@TargetDir@/cache".to_string(),
            wipe: false,
        }];

        let ops = uninstall_path_operations("org.app", &paths, &vars);
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].kind, OperationKind::Mkdir);
        assert!(!ops[0].flag(keys::FORCE_REMOVAL));
        assert!(ops.iter().all(|op| op.component() == "org.app"));
        assert_eq!(ops[2].kind, OperationKind::Copy);
    }

    #[test]
    fn test_uninstall_paths_wipe_skips_walk() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("cache");
        fs::create_dir_all(cache.join("sub")).unwrap();

        let paths = vec![UninstallPath {
            path: cache.to_string_lossy().into_owned(),
            wipe: true,
        }];
        let ops = uninstall_path_operations("org.app", &paths, &BTreeMap::new());
        assert_eq!(ops.len(), 1);
        assert!(ops[0].flag(keys::FORCE_REMOVAL));
    }
}
