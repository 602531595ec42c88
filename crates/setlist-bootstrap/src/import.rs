//! Transactional import of parsed records into local storage.

use setlist_core::model::{Recording, Show};
use setlist_core::schema::{CatalogMarker, Database, RecordingUpsert};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::error::{BootstrapError, BootstrapResult};

/// Rows written between cancellation checks and progress callbacks.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Outcome of a recordings import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingImport {
    pub imported: usize,
    /// Recordings skipped because their show is not stored.
    pub orphans: usize,
}

/// Writes record sequences into the catalog database, one transaction per
/// sequence.
///
/// Every method is blocking and opens its own connection.
#[derive(Debug, Clone)]
pub struct Importer {
    db_path: PathBuf,
    content_hash: String,
    batch_size: usize,
}

impl Importer {
    pub fn new(db_path: impl Into<PathBuf>, content_hash: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            content_hash: content_hash.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Imports every show or none of them.
    ///
    /// The same transaction drops shows left over from other archives and
    /// clears the completion marker, so once it commits the database no
    /// longer claims to hold any complete catalog until [`Self::write_marker`]
    /// runs. `on_batch` receives the running count after each batch.
    pub fn import_shows<I>(
        &self,
        shows: I,
        cancel: &CancellationToken,
        mut on_batch: impl FnMut(usize),
    ) -> BootstrapResult<usize>
    where
        I: IntoIterator<Item = BootstrapResult<Show>>,
    {
        let mut db = Database::open(&self.db_path)?;
        let writer = db.begin_import()?;
        let mut count = 0;

        for show in shows {
            writer.upsert_show(&show?, &self.content_hash)?;
            count += 1;
            if count % self.batch_size == 0 {
                check_cancel(cancel)?;
                on_batch(count);
            }
        }

        check_cancel(cancel)?;
        let pruned = writer.prune_shows(&self.content_hash)?;
        writer.clear_marker()?;
        writer.commit()?;
        on_batch(count);
        if pruned > 0 {
            log::info!("Removed {pruned} shows not present in this archive");
        }
        log::info!("Imported {count} shows");
        Ok(count)
    }

    /// Imports every recording whose show is stored, or none of them.
    ///
    /// Recordings from other archives are dropped in the same transaction.
    pub fn import_recordings<I>(
        &self,
        recordings: I,
        cancel: &CancellationToken,
        mut on_batch: impl FnMut(usize),
    ) -> BootstrapResult<RecordingImport>
    where
        I: IntoIterator<Item = BootstrapResult<Recording>>,
    {
        let mut db = Database::open(&self.db_path)?;
        let writer = db.begin_import()?;
        let mut report = RecordingImport::default();
        let mut seen = 0;

        for recording in recordings {
            let recording = recording?;
            match writer.upsert_recording(&recording, &self.content_hash)? {
                RecordingUpsert::Written => report.imported += 1,
                RecordingUpsert::MissingShow => {
                    log::debug!(
                        "Skipping recording {} for unknown show {}",
                        recording.key,
                        recording.show_key
                    );
                    report.orphans += 1;
                }
            }
            seen += 1;
            if seen % self.batch_size == 0 {
                check_cancel(cancel)?;
                on_batch(seen);
            }
        }

        check_cancel(cancel)?;
        let pruned = writer.prune_recordings(&self.content_hash)?;
        writer.commit()?;
        on_batch(seen);
        if pruned > 0 {
            log::info!("Removed {pruned} recordings not present in this archive");
        }
        if report.orphans > 0 {
            log::warn!("Skipped {} recordings with no matching show", report.orphans);
        }
        log::info!("Imported {} recordings", report.imported);
        Ok(report)
    }

    /// Records that the catalog is complete for `schema_version`.
    pub fn write_marker(&self, schema_version: u32) -> BootstrapResult<CatalogMarker> {
        let mut db = Database::open(&self.db_path)?;
        let writer = db.begin_import()?;
        let marker = writer.write_marker(schema_version, &self.content_hash)?;
        writer.commit()?;
        log::info!(
            "Catalog marked complete: {} shows, {} recordings, {} venues",
            marker.show_count,
            marker.recording_count,
            marker.venue_count
        );
        Ok(marker)
    }
}

fn check_cancel(cancel: &CancellationToken) -> BootstrapResult<()> {
    if cancel.is_cancelled() {
        Err(BootstrapError::Cancelled)
    } else {
        Ok(())
    }
}
