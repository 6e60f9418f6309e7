// src/fetch.rs

//! Archive transport
//!
//! Before installation every component's archives are fetched into the
//! session download directory. Transport is pluggable: a fetcher only has to
//! return the archive bytes or fail.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub trait ArchiveFetcher: Send + Sync {
    /// Fetch archive `archive` of `component`
    fn fetch(&self, component: &str, archive: &str) -> Result<Vec<u8>>;
}

/// Reads archives from a local repository layout `<root>/<component>/<archive>`
#[derive(Debug, Clone)]
pub struct LocalDirFetcher {
    root: PathBuf,
}

impl LocalDirFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArchiveFetcher for LocalDirFetcher {
    fn fetch(&self, component: &str, archive: &str) -> Result<Vec<u8>> {
        if archive.contains("..") || Path::new(archive).is_absolute() {
            return Err(Error::NotFound(format!(
                "Refusing archive path outside repository: {}",
                archive
            )));
        }
        let path = self.root.join(component).join(archive);
        debug!("Fetching {}", path.display());
        fs::read(&path).map_err(|e| {
            Error::NotFound(format!("Archive {} for {}: {}", archive, component, e))
        })
    }
}

/// Fetcher for catalogs without archives
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFetcher;

impl ArchiveFetcher for NoFetcher {
    fn fetch(&self, component: &str, archive: &str) -> Result<Vec<u8>> {
        Err(Error::NotFound(format!(
            "No repository configured to fetch {} for {}",
            archive, component
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_fetch() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("org.app")).unwrap();
        fs::write(temp.path().join("org.app/app.bin"), b"payload").unwrap();

        let fetcher = LocalDirFetcher::new(temp.path());
        assert_eq!(fetcher.fetch("org.app", "app.bin").unwrap(), b"payload");
        assert!(matches!(
            fetcher.fetch("org.app", "missing.bin"),
            Err(Error::NotFound(_))
        ));
        assert!(fetcher.fetch("org.app", "../escape").is_err());
    }

    #[test]
    fn test_no_fetcher_fails() {
        assert!(NoFetcher.fetch("a", "b").is_err());
    }
}
