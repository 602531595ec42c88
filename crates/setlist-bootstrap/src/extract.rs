//! Unpacks a verified archive into staging.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::{BootstrapError, BootstrapResult};
use crate::progress::SubProgress;
use crate::staging::StagingArea;

const SHOWS_PREFIX: &str = "shows";
const RECORDINGS_PREFIX: &str = "recordings";
const CATALOG_EXTENSION: &str = "jsonl";

/// The catalog files found after extraction, each list in name order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedCatalog {
    pub root: PathBuf,
    pub show_files: Vec<PathBuf>,
    pub recording_files: Vec<PathBuf>,
}

impl StagedCatalog {
    /// Locates show and recording files under `root`.
    ///
    /// # Errors
    /// Returns [`BootstrapError::CorruptArchive`] when either kind is missing.
    pub fn discover(root: impl Into<PathBuf>) -> BootstrapResult<Self> {
        let root = root.into();
        let mut show_files = Vec::new();
        let mut recording_files = Vec::new();

        for entry in WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CATALOG_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with(SHOWS_PREFIX) {
                show_files.push(path.to_path_buf());
            } else if name.starts_with(RECORDINGS_PREFIX) {
                recording_files.push(path.to_path_buf());
            }
        }

        if show_files.is_empty() {
            return Err(BootstrapError::CorruptArchive(
                "archive contains no show catalog".to_string(),
            ));
        }
        if recording_files.is_empty() {
            return Err(BootstrapError::CorruptArchive(
                "archive contains no recording catalog".to_string(),
            ));
        }
        show_files.sort();
        recording_files.sort();

        Ok(Self {
            root,
            show_files,
            recording_files,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Extractor {
    staging: StagingArea,
    max_staging_bytes: Option<u64>,
}

impl Extractor {
    pub const fn new(staging: StagingArea, max_staging_bytes: Option<u64>) -> Self {
        Self {
            staging,
            max_staging_bytes,
        }
    }

    /// Unpacks `archive_path` into a freshly wiped extraction directory.
    ///
    /// Blocking; run it off the async executor.
    pub fn extract(
        &self,
        archive_path: &Path,
        progress: &SubProgress,
        cancel: &CancellationToken,
    ) -> BootstrapResult<StagedCatalog> {
        let out_dir = self.staging.extracted_dir();
        self.staging.discard_extracted()?;
        std::fs::create_dir_all(&out_dir)?;

        let file = File::open(archive_path)?;
        let mut buffer = vec![0_u8; rawzip::RECOMMENDED_BUFFER_SIZE];
        let archive = rawzip::ZipArchive::from_file(file, &mut buffer)
            .map_err(|e| BootstrapError::CorruptArchive(format!("invalid zip archive: {e:?}")))?;

        let total = archive.entries_hint().max(1);
        let mut budget = Budget::new(self.max_staging_bytes);
        let mut entries = archive.entries(&mut buffer);
        let mut index = 0_u64;

        while let Some(entry) = entries
            .next_entry()
            .map_err(|e| BootstrapError::CorruptArchive(format!("zip entry error: {e:?}")))?
        {
            if cancel.is_cancelled() {
                return Err(BootstrapError::Cancelled);
            }
            index += 1;
            let filename = entry
                .file_path()
                .try_normalize()
                .map_err(|e| BootstrapError::CorruptArchive(format!("bad entry path: {e:?}")))?
                .as_ref()
                .to_string();

            let path = Path::new(&filename);
            if path.is_absolute() || path.components().any(|c| matches!(c, Component::ParentDir)) {
                return Err(BootstrapError::CorruptArchive(format!(
                    "unsafe path in archive: {filename}"
                )));
            }

            let out_path = out_dir.join(&filename);
            if entry.is_dir() {
                std::fs::create_dir_all(&out_path)?;
                continue;
            }
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let method = entry.compression_method();
            let zip_entry = archive
                .get_entry(entry.wayfinder())
                .map_err(|e| BootstrapError::CorruptArchive(format!("{filename}: {e:?}")))?;
            let mut out = File::create(&out_path)?;
            match method {
                rawzip::CompressionMethod::Store => {
                    let mut reader = zip_entry.verifying_reader(zip_entry.reader());
                    copy_entry(&filename, &mut reader, &mut out, &mut budget)?;
                }
                rawzip::CompressionMethod::Deflate => {
                    let decoder = flate2::read::DeflateDecoder::new(zip_entry.reader());
                    let mut reader = zip_entry.verifying_reader(decoder);
                    copy_entry(&filename, &mut reader, &mut out, &mut budget)?;
                }
                method => {
                    return Err(BootstrapError::CorruptArchive(format!(
                        "{filename}: unsupported compression method {method:?}"
                    )));
                }
            }
            out.flush()?;

            #[allow(clippy::cast_precision_loss)]
            progress.fraction(index as f64 / total as f64, Some(filename));
        }

        log::info!(
            "Extracted {} bytes into {}",
            budget.written,
            out_dir.display()
        );
        StagedCatalog::discover(out_dir)
    }
}

/// Tracks bytes written against the optional staging limit.
#[derive(Debug)]
struct Budget {
    limit: Option<u64>,
    written: u64,
}

impl Budget {
    const fn new(limit: Option<u64>) -> Self {
        Self { limit, written: 0 }
    }

    fn charge(&mut self, bytes: usize) -> BootstrapResult<()> {
        self.written += bytes as u64;
        match self.limit {
            Some(limit) if self.written > limit => Err(BootstrapError::DiskSpace(format!(
                "extracted catalog exceeds staging budget of {limit} bytes"
            ))),
            _ => Ok(()),
        }
    }
}

/// Copies one entry, attributing read failures (including CRC and size
/// mismatches) to the archive and write failures to staging storage.
fn copy_entry(
    name: &str,
    reader: &mut impl Read,
    out: &mut File,
    budget: &mut Budget,
) -> BootstrapResult<()> {
    let mut buf = vec![0_u8; 64 * 1024];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(BootstrapError::CorruptArchive(format!(
                    "{name}: unreadable entry data: {e}"
                )))
            }
        };
        budget.charge(n)?;
        out.write_all(&buf[..n])?;
    }
}
