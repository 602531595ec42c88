//! On-disk staging layout.
//!
//! ```text
//! <root>/downloads/<hash>.zip.part   in-progress download
//! <root>/downloads/<hash>.zip        verified archive
//! <root>/extracted/                  unpacked catalog files
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::archive::CatalogArchiveRef;

#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.root.join("extracted")
    }

    pub fn partial_path(&self, archive: &CatalogArchiveRef) -> PathBuf {
        self.downloads_dir()
            .join(format!("{}.zip.part", archive.file_stem()))
    }

    pub fn archive_path(&self, archive: &CatalogArchiveRef) -> PathBuf {
        self.downloads_dir()
            .join(format!("{}.zip", archive.file_stem()))
    }

    /// Removes the extracted catalog files.
    pub fn discard_extracted(&self) -> io::Result<()> {
        remove_dir_if_exists(&self.extracted_dir())
    }

    /// Removes downloaded archives except the partial download for `keep`.
    pub fn discard_downloads_except_partial(&self, keep: &CatalogArchiveRef) -> io::Result<()> {
        let downloads = self.downloads_dir();
        if !downloads.exists() {
            return Ok(());
        }
        let keep = self.partial_path(keep);
        for entry in std::fs::read_dir(&downloads)? {
            let path = entry?.path();
            if path != keep {
                remove_path(&path)?;
            }
        }
        Ok(())
    }

    /// Removes everything under the staging root.
    pub fn clear(&self) -> io::Result<()> {
        remove_dir_if_exists(&self.downloads_dir())?;
        remove_dir_if_exists(&self.extracted_dir())
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths_are_keyed_by_hash() {
        let staging = StagingArea::new("/tmp/setlist");
        let archive = CatalogArchiveRef::new("u", "ABC123");
        assert_eq!(
            staging.partial_path(&archive),
            PathBuf::from("/tmp/setlist/downloads/abc123.zip.part")
        );
        assert_eq!(
            staging.archive_path(&archive),
            PathBuf::from("/tmp/setlist/downloads/abc123.zip")
        );
    }

    #[test]
    fn test_discard_keeps_only_matching_partial() {
        let dir = TempDir::new().unwrap();
        let staging = StagingArea::new(dir.path());
        let archive = CatalogArchiveRef::new("u", "aa");
        let other = CatalogArchiveRef::new("u", "bb");
        std::fs::create_dir_all(staging.downloads_dir()).unwrap();
        std::fs::write(staging.partial_path(&archive), b"x").unwrap();
        std::fs::write(staging.partial_path(&other), b"y").unwrap();
        std::fs::write(staging.archive_path(&archive), b"z").unwrap();

        staging.discard_downloads_except_partial(&archive).unwrap();
        assert!(staging.partial_path(&archive).exists());
        assert!(!staging.partial_path(&other).exists());
        assert!(!staging.archive_path(&archive).exists());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let staging = StagingArea::new(dir.path().join("staging"));
        staging.clear().unwrap();
        std::fs::create_dir_all(staging.extracted_dir().join("nested")).unwrap();
        staging.clear().unwrap();
        assert!(!staging.extracted_dir().exists());
    }
}
