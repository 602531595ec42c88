//! Drives a bootstrap run through its phases.

use setlist_core::schema::{CatalogMarker, Database, RunLock, CATALOG_SCHEMA_VERSION};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregate::Aggregator;
use crate::archive::CatalogArchiveRef;
use crate::config::Config;
use crate::error::{BootstrapError, BootstrapResult, PhaseError};
use crate::extract::Extractor;
use crate::fetch::{FetchOptions, Fetcher};
use crate::import::{Importer, DEFAULT_BATCH_SIZE};
use crate::parse::CatalogParser;
use crate::phase::{BootstrapPhase, BootstrapSummary, PhaseKind};
use crate::progress::{self, ProgressSender, ProgressStream};
use crate::remote::RemoteSource;
use crate::staging::StagingArea;

/// Settings for a [`Bootstrapper`].
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub database_path: PathBuf,
    pub staging_dir: PathBuf,
    pub parse_tolerance: usize,
    pub fetch: FetchOptions,
    pub progress_buffer: usize,
    pub import_batch_size: usize,
    /// Skip the local validity check and always re-import.
    pub force: bool,
}

impl BootstrapOptions {
    pub fn new(database_path: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            staging_dir: staging_dir.into(),
            parse_tolerance: 100,
            fetch: FetchOptions::default(),
            progress_buffer: 64,
            import_batch_size: DEFAULT_BATCH_SIZE,
            force: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            parse_tolerance: config.parse_tolerance,
            fetch: FetchOptions {
                max_retries: config.max_retries,
                retry_min_delay: Duration::from_millis(config.retry_min_delay_ms),
                max_staging_bytes: config.max_staging_bytes,
            },
            progress_buffer: config.progress_buffer,
            ..Self::new(&config.database_path, &config.staging_dir)
        }
    }

    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub const fn with_parse_tolerance(mut self, tolerance: usize) -> Self {
        self.parse_tolerance = tolerance;
        self
    }

    #[must_use]
    pub const fn with_import_batch_size(mut self, batch_size: usize) -> Self {
        self.import_batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_fetch_options(mut self, fetch: FetchOptions) -> Self {
        self.fetch = fetch;
        self
    }
}

/// Processes currently bootstrapping, keyed by database path.
static ACTIVE_RUNS: LazyLock<Mutex<HashSet<PathBuf>>> = LazyLock::new(Mutex::default);

/// Exclusive claim on a database path for the lifetime of a run.
///
/// The in-process registry rejects overlap between tasks; the [`RunLock`]
/// rejects overlap with other processes.
#[derive(Debug)]
struct RunGuard {
    key: PathBuf,
    lock: Option<RunLock>,
}

impl RunGuard {
    fn acquire(db_path: &Path) -> BootstrapResult<Self> {
        let key = std::path::absolute(db_path).unwrap_or_else(|_| db_path.to_path_buf());
        {
            let mut active = ACTIVE_RUNS.lock().unwrap_or_else(PoisonError::into_inner);
            if !active.insert(key.clone()) {
                return Err(BootstrapError::AlreadyRunning(db_path.display().to_string()));
            }
        }
        let mut guard = Self { key, lock: None };

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        guard.lock = Some(RunLock::try_acquire(db_path).map_err(|e| {
            if e.is_busy() {
                BootstrapError::AlreadyRunning(db_path.display().to_string())
            } else {
                BootstrapError::Storage(e)
            }
        })?);
        Ok(guard)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        ACTIVE_RUNS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Composes the pipeline components and runs them in phase order.
#[derive(Debug, Clone)]
pub struct Bootstrapper {
    options: BootstrapOptions,
    source: Arc<dyn RemoteSource>,
}

impl Bootstrapper {
    pub fn new(options: BootstrapOptions, source: Arc<dyn RemoteSource>) -> Self {
        Self { options, source }
    }

    pub const fn options(&self) -> &BootstrapOptions {
        &self.options
    }

    /// Starts a run on a background task.
    ///
    /// # Errors
    /// Returns [`BootstrapError::AlreadyRunning`] when another run holds the
    /// same database.
    pub fn start(&self, archive: CatalogArchiveRef) -> BootstrapResult<BootstrapRun> {
        let guard = RunGuard::acquire(&self.options.database_path)?;
        let (sender, progress) = progress::channel(self.options.progress_buffer);
        let cancel = CancellationToken::new();
        let id = Uuid::new_v4();

        let this = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            this.drive(id, &archive, sender, &token).await
        });

        Ok(BootstrapRun {
            id,
            progress,
            cancel,
            handle,
        })
    }

    /// Runs to completion on the current task, reporting to `progress`.
    ///
    /// Exactly one terminal event is sent, including when the run is
    /// rejected because another run holds the database.
    pub async fn run(
        &self,
        archive: &CatalogArchiveRef,
        mut progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<BootstrapSummary, PhaseError> {
        let _guard = match RunGuard::acquire(&self.options.database_path) {
            Ok(guard) => guard,
            Err(err) => {
                let outcome = Err(PhaseError::new(PhaseKind::Idle, err));
                if progress.enter(BootstrapPhase::Idle).await.is_ok() {
                    progress.finish(&outcome).await;
                }
                return outcome;
            }
        };
        self.drive(Uuid::new_v4(), archive, progress, &cancel).await
    }

    async fn drive(
        &self,
        id: Uuid,
        archive: &CatalogArchiveRef,
        mut progress: ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<BootstrapSummary, PhaseError> {
        log::info!("Bootstrap {id} starting for {}", archive.url);
        let outcome = self.execute(archive, &mut progress, cancel).await;

        let staging = StagingArea::new(&self.options.staging_dir);
        match &outcome {
            Ok(summary) => {
                log::info!(
                    "Bootstrap {id} completed ({} shows, {} recordings, {} venues)",
                    summary.shows_imported,
                    summary.recordings_imported,
                    summary.venues_computed
                );
                if !summary.used_local {
                    if let Err(e) = staging.clear() {
                        log::warn!("Failed to clear staging: {e}");
                    }
                }
            }
            Err(err) => {
                log::error!("Bootstrap {id} failed: {err}");
                discard_failed_staging(&staging, archive, err);
            }
        }

        progress.finish(&outcome).await;
        outcome
    }

    async fn execute(
        &self,
        archive: &CatalogArchiveRef,
        progress: &mut ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<BootstrapSummary, PhaseError> {
        let opts = &self.options;
        let content_hash = archive.content_hash();
        let staging = StagingArea::new(&opts.staging_dir);

        enter(progress, BootstrapPhase::Idle).await?;
        enter(progress, BootstrapPhase::Checking).await?;
        let at = |phase: PhaseKind| move |e: BootstrapError| PhaseError::new(phase, e);

        check_cancel(cancel).map_err(at(PhaseKind::Checking))?;
        if opts.force {
            log::info!("Forced refresh; skipping local catalog check");
        } else if let Some(marker) = self
            .valid_local_marker(&content_hash)
            .await
            .map_err(at(PhaseKind::Checking))?
        {
            log::info!("Local catalog is current (hash {})", marker.content_hash);
            let summary = BootstrapSummary {
                used_local: true,
                content_hash: marker.content_hash.clone(),
                ..BootstrapSummary::default()
            };
            enter(progress, BootstrapPhase::UsingLocal { marker }).await?;
            return Ok(summary);
        }

        enter(progress, BootstrapPhase::Downloading).await?;
        let fetcher = Fetcher::new(Arc::clone(&self.source), staging.clone(), opts.fetch.clone());
        let sub = progress.sub_progress(BootstrapPhase::Downloading);
        let archive_path = fetcher
            .fetch(archive, &sub, cancel)
            .await
            .map_err(at(PhaseKind::Downloading))?;
        check_cancel(cancel).map_err(at(PhaseKind::Downloading))?;

        enter(progress, BootstrapPhase::Extracting).await?;
        let extractor = Extractor::new(staging, opts.fetch.max_staging_bytes);
        let sub = progress.sub_progress(BootstrapPhase::Extracting);
        let token = cancel.clone();
        let staged = blocking(move || extractor.extract(&archive_path, &sub, &token))
            .await
            .map_err(at(PhaseKind::Extracting))?;
        check_cancel(cancel).map_err(at(PhaseKind::Extracting))?;

        let parser = CatalogParser::new(staged, opts.parse_tolerance);
        let importer = Importer::new(&opts.database_path, content_hash.clone())
            .with_batch_size(opts.import_batch_size);

        enter(progress, BootstrapPhase::ImportingShows).await?;
        let sub = progress.sub_progress(BootstrapPhase::ImportingShows);
        let (shows_imported, shows_skipped) = {
            let parser = parser.clone();
            let importer = importer.clone();
            let token = cancel.clone();
            blocking(move || {
                let shows = parser.shows()?;
                let stats = shows.stats();
                let count = importer.import_shows(shows, &token, |n| {
                    if let Some(fraction) = stats.fraction() {
                        sub.fraction(fraction, Some(format!("{n} shows")));
                    }
                })?;
                Ok((count, stats.skipped()))
            })
            .await
            .map_err(at(PhaseKind::ImportingShows))?
        };
        check_cancel(cancel).map_err(at(PhaseKind::ImportingShows))?;

        enter(progress, BootstrapPhase::ComputingVenues).await?;
        let aggregator = Aggregator::new(&opts.database_path);
        let venues_computed = blocking(move || aggregator.compute_venues())
            .await
            .map_err(at(PhaseKind::ComputingVenues))?;
        check_cancel(cancel).map_err(at(PhaseKind::ComputingVenues))?;

        enter(progress, BootstrapPhase::ImportingRecordings).await?;
        let sub = progress.sub_progress(BootstrapPhase::ImportingRecordings);
        let token = cancel.clone();
        let (recordings, recordings_skipped, marker) = blocking(move || {
            let recordings = parser.recordings()?;
            let stats = recordings.stats();
            let report = importer.import_recordings(recordings, &token, |n| {
                if let Some(fraction) = stats.fraction() {
                    sub.fraction(fraction, Some(format!("{n} recordings")));
                }
            })?;
            let marker = importer.write_marker(CATALOG_SCHEMA_VERSION)?;
            Ok((report, stats.skipped(), marker))
        })
        .await
        .map_err(at(PhaseKind::ImportingRecordings))?;

        Ok(BootstrapSummary {
            used_local: false,
            content_hash: marker.content_hash,
            shows_imported,
            recordings_imported: recordings.imported,
            venues_computed,
            records_skipped: shows_skipped + recordings_skipped,
            orphan_recordings: recordings.orphans,
        })
    }

    /// The stored marker, if it describes a complete catalog for this
    /// schema version and archive.
    async fn valid_local_marker(&self, content_hash: &str) -> BootstrapResult<Option<CatalogMarker>> {
        let db_path = self.options.database_path.clone();
        let content_hash = content_hash.to_string();
        blocking(move || {
            let db = Database::open(&db_path)?;
            let marker = db.catalog_marker()?;
            match &marker {
                Some(m) if m.schema_version != CATALOG_SCHEMA_VERSION => log::info!(
                    "Local catalog schema {} differs from {CATALOG_SCHEMA_VERSION}; refreshing",
                    m.schema_version
                ),
                Some(m) if !m.matches(CATALOG_SCHEMA_VERSION, Some(&content_hash)) => {
                    log::info!("Local catalog hash {} is out of date; refreshing", m.content_hash);
                }
                Some(_) => {}
                None => log::info!("No complete local catalog found"),
            }
            Ok(marker.filter(|m| m.matches(CATALOG_SCHEMA_VERSION, Some(&content_hash))))
        })
        .await
    }
}

/// A run started with [`Bootstrapper::start`].
#[derive(Debug)]
pub struct BootstrapRun {
    id: Uuid,
    progress: ProgressStream,
    cancel: CancellationToken,
    handle: JoinHandle<Result<BootstrapSummary, PhaseError>>,
}

impl BootstrapRun {
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Requests cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn progress(&mut self) -> &mut ProgressStream {
        &mut self.progress
    }

    /// Waits for the run to finish. Remaining progress events are dropped.
    pub async fn wait(self) -> Result<BootstrapSummary, PhaseError> {
        drop(self.progress);
        join(self.handle).await
    }

    /// Splits the run into its progress stream and a completion future.
    pub fn into_parts(
        self,
    ) -> (
        ProgressStream,
        CancellationToken,
        impl std::future::Future<Output = Result<BootstrapSummary, PhaseError>>,
    ) {
        (self.progress, self.cancel, join(self.handle))
    }
}

async fn join(
    handle: JoinHandle<Result<BootstrapSummary, PhaseError>>,
) -> Result<BootstrapSummary, PhaseError> {
    handle.await.unwrap_or_else(|e| {
        Err(PhaseError::new(
            PhaseKind::Error,
            BootstrapError::Internal(format!("bootstrap task failed: {e}")),
        ))
    })
}

async fn enter(progress: &mut ProgressSender, phase: BootstrapPhase) -> Result<(), PhaseError> {
    let from = progress.current().unwrap_or(PhaseKind::Idle);
    progress
        .enter(phase)
        .await
        .map_err(|e| PhaseError::new(from, e))
}

fn check_cancel(cancel: &CancellationToken) -> BootstrapResult<()> {
    if cancel.is_cancelled() {
        Err(BootstrapError::Cancelled)
    } else {
        Ok(())
    }
}

/// Runs blocking pipeline work off the async executor.
async fn blocking<T, F>(f: F) -> BootstrapResult<T>
where
    F: FnOnce() -> BootstrapResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BootstrapError::Internal(format!("blocking task failed: {e}")))?
}

/// Keeps a resumable partial download after transfer failures and
/// cancellation during download; removes everything else.
fn discard_failed_staging(staging: &StagingArea, archive: &CatalogArchiveRef, err: &PhaseError) {
    let keep_partial = err.phase == PhaseKind::Downloading
        && matches!(
            err.error,
            BootstrapError::Transfer { .. } | BootstrapError::Cancelled
        );
    let result = if keep_partial {
        log::info!("Keeping partial download for resume");
        staging
            .discard_extracted()
            .and_then(|()| staging.discard_downloads_except_partial(archive))
    } else {
        staging.clear()
    };
    if let Err(e) = result {
        log::warn!("Failed to clean staging after error: {e}");
    }
}
