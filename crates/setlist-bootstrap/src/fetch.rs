//! Downloads and verifies the catalog archive.

use backon::{ExponentialBuilder, Retryable};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::archive::CatalogArchiveRef;
use crate::error::{BootstrapError, BootstrapResult};
use crate::progress::SubProgress;
use crate::remote::{RemoteBody, RemoteSource};
use crate::staging::StagingArea;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Retries after the first attempt for transient transfer errors.
    pub max_retries: usize,
    pub retry_min_delay: Duration,
    /// Upper bound on bytes written to staging.
    pub max_staging_bytes: Option<u64>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_min_delay: Duration::from_millis(500),
            max_staging_bytes: None,
        }
    }
}

/// Streams the archive into staging and checks it against its reference.
#[derive(Debug, Clone)]
pub struct Fetcher {
    source: Arc<dyn RemoteSource>,
    staging: StagingArea,
    options: FetchOptions,
}

impl Fetcher {
    pub fn new(source: Arc<dyn RemoteSource>, staging: StagingArea, options: FetchOptions) -> Self {
        Self {
            source,
            staging,
            options,
        }
    }

    /// Returns the path of a verified archive in staging.
    ///
    /// A verified archive left by an earlier run is reused. Otherwise the
    /// archive is downloaded, resuming a partial download when possible.
    /// Transient transfer errors are retried with exponential backoff.
    pub async fn fetch(
        &self,
        archive: &CatalogArchiveRef,
        progress: &SubProgress,
        cancel: &CancellationToken,
    ) -> BootstrapResult<PathBuf> {
        let target = self.staging.archive_path(archive);
        if target.exists() {
            if self.verify_existing(&target, archive).await? {
                log::info!("Reusing verified archive {}", target.display());
                progress.fraction(1.0, Some("reused staged archive".to_string()));
                return Ok(target);
            }
            log::warn!("Discarding staged archive that failed verification");
            tokio::fs::remove_file(&target).await?;
        }
        tokio::fs::create_dir_all(self.staging.downloads_dir()).await?;

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.options.retry_min_delay)
            .with_max_times(self.options.max_retries)
            .with_jitter();

        let path = (|| self.attempt(archive, progress, cancel))
            .retry(backoff)
            .when(|e: &BootstrapError| e.is_transient() && !cancel.is_cancelled())
            .notify(|err: &BootstrapError, delay: Duration| {
                log::warn!("Download failed ({err}); retrying in {delay:?}");
            })
            .await?;

        log::info!("Archive verified at {}", path.display());
        Ok(path)
    }

    async fn verify_existing(&self, path: &Path, archive: &CatalogArchiveRef) -> BootstrapResult<bool> {
        let (hasher, len) = hash_file(path.to_path_buf()).await?;
        let size_ok = archive.expected_size.map_or(true, |expected| expected == len);
        Ok(size_ok && format!("{:x}", hasher.finalize()) == archive.content_hash())
    }

    async fn attempt(
        &self,
        archive: &CatalogArchiveRef,
        progress: &SubProgress,
        cancel: &CancellationToken,
    ) -> BootstrapResult<PathBuf> {
        if cancel.is_cancelled() {
            return Err(BootstrapError::Cancelled);
        }

        let part = self.staging.partial_path(archive);
        let mut existing = match tokio::fs::metadata(&part).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        if archive.expected_size.is_some_and(|expected| existing >= expected) {
            log::info!("Partial download is not shorter than the archive; restarting");
            existing = 0;
        }

        let mut body = self.source.open(archive, existing).await?;
        if !body.honours(existing) && body.offset != 0 {
            body = self.source.open(archive, 0).await?;
        }

        let (mut file, hasher, written) = if existing > 0 && body.honours(existing) {
            log::info!("Resuming download at byte {existing}");
            let (hasher, len) = hash_file(part.clone()).await?;
            let file = OpenOptions::new().append(true).open(&part).await?;
            (file, hasher, len)
        } else {
            if existing > 0 {
                log::info!("Source ignored resume offset {existing}; restarting from zero");
            }
            (File::create(&part).await?, Sha256::new(), 0)
        };

        let streamed = self
            .stream_into(&mut file, body, hasher, written, archive, progress, cancel)
            .await;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        let (hasher, written) = match streamed {
            Ok(done) => done,
            Err(err) => {
                if matches!(err, BootstrapError::Integrity { .. }) {
                    remove_quietly(&part).await;
                }
                return Err(err);
            }
        };

        if let Some(expected) = archive.expected_size {
            if written != expected {
                remove_quietly(&part).await;
                return Err(BootstrapError::Integrity {
                    check: "size",
                    expected: expected.to_string(),
                    actual: written.to_string(),
                });
            }
        }
        let actual = format!("{:x}", hasher.finalize());
        let expected = archive.content_hash();
        if actual != expected {
            remove_quietly(&part).await;
            return Err(BootstrapError::Integrity {
                check: "sha256",
                expected,
                actual,
            });
        }

        let target = self.staging.archive_path(archive);
        tokio::fs::rename(&part, &target).await?;
        Ok(target)
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_into(
        &self,
        file: &mut File,
        body: RemoteBody,
        mut hasher: Sha256,
        mut written: u64,
        archive: &CatalogArchiveRef,
        progress: &SubProgress,
        cancel: &CancellationToken,
    ) -> BootstrapResult<(Sha256, u64)> {
        let total = archive.expected_size.or(body.total_len);
        let mut chunks = body.chunks;
        progress.bytes(written, total);

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(BootstrapError::Cancelled),
                next = chunks.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            written += chunk.len() as u64;
            if let Some(expected) = archive.expected_size {
                if written > expected {
                    return Err(BootstrapError::Integrity {
                        check: "size",
                        expected: expected.to_string(),
                        actual: format!("more than {expected}"),
                    });
                }
            }
            if let Some(limit) = self.options.max_staging_bytes {
                if written > limit {
                    return Err(BootstrapError::DiskSpace(format!(
                        "download exceeds staging budget of {limit} bytes"
                    )));
                }
            }

            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            progress.bytes(written, total);
        }

        Ok((hasher, written))
    }
}

/// Hashes a file on a blocking thread, returning the hasher and byte count.
async fn hash_file(path: PathBuf) -> BootstrapResult<(Sha256, u64)> {
    tokio::task::spawn_blocking(move || -> BootstrapResult<(Sha256, u64)> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let len = std::io::copy(&mut file, &mut hasher)?;
        Ok((hasher, len))
    })
    .await
    .map_err(|e| BootstrapError::Internal(format!("hashing task failed: {e}")))?
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        log::debug!("Could not remove {}: {e}", path.display());
    }
}
