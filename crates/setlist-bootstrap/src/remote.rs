//! Remote catalog sources.
//!
//! A [`RemoteSource`] turns a [`CatalogArchiveRef`] plus a byte offset into
//! a stream of chunks. Sources may ignore the offset; the returned
//! [`RemoteBody::offset`] says where the stream actually starts.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use std::fmt;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncSeekExt;
use tokio_util::io::ReaderStream;

use crate::archive::CatalogArchiveRef;
use crate::error::{BootstrapError, BootstrapResult};

/// A chunk stream returned by a [`RemoteSource`].
pub struct RemoteBody {
    /// Byte offset of the first chunk. Equals the requested offset only when
    /// the source honoured it.
    pub offset: u64,
    /// Total archive length as reported by the source.
    pub total_len: Option<u64>,
    pub chunks: BoxStream<'static, BootstrapResult<Vec<u8>>>,
}

impl RemoteBody {
    pub const fn honours(&self, requested: u64) -> bool {
        self.offset == requested
    }
}

impl fmt::Debug for RemoteBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBody")
            .field("offset", &self.offset)
            .field("total_len", &self.total_len)
            .finish_non_exhaustive()
    }
}

/// Fetches archive bytes starting at an offset.
#[async_trait]
pub trait RemoteSource: Send + Sync + fmt::Debug {
    async fn open(&self, archive: &CatalogArchiveRef, offset: u64) -> BootstrapResult<RemoteBody>;
}

/// Picks a source for `url`: local files for `file://` URLs and bare paths,
/// HTTP otherwise.
pub fn source_for_url(url: &str) -> BootstrapResult<Arc<dyn RemoteSource>> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(Arc::new(HttpSource::new()?))
    } else {
        Ok(Arc::new(LocalFileSource))
    }
}

/// HTTP(S) source with `Range` resume support.
#[derive(Debug, Clone)]
pub struct HttpSource {
    http: Client,
}

impl HttpSource {
    /// Create a new HTTP source.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> BootstrapResult<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(Duration::from_secs(60))
            .user_agent(concat!(
                "setlist/",
                env!("CARGO_PKG_VERSION"),
                " (https://github.com/setlist-app/setlist)"
            ))
            .build()
            .map_err(|e| BootstrapError::transfer_fatal(format!("HTTP client: {e}")))?;

        Ok(Self { http })
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn open(&self, archive: &CatalogArchiveRef, offset: u64) -> BootstrapResult<RemoteBody> {
        let mut request = self.http.get(&archive.url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
            log::info!("Server rejected range starting at {offset}; restarting from zero");
            return self.open(archive, 0).await;
        }
        if !status.is_success() {
            let message = format!("GET {} returned {status}", archive.url);
            let retryable = status.is_server_error()
                || status == StatusCode::TOO_MANY_REQUESTS
                || status == StatusCode::REQUEST_TIMEOUT;
            return Err(BootstrapError::Transfer { message, retryable });
        }

        let (start, total_len) = if status == StatusCode::PARTIAL_CONTENT {
            let range = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range);
            match range {
                Some(range) => range,
                None if offset > 0 => {
                    log::warn!("Partial response without usable Content-Range; restarting");
                    return self.open(archive, 0).await;
                }
                None => (0, None),
            }
        } else {
            (0, response.content_length())
        };

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(Vec::from).map_err(BootstrapError::from))
            .boxed();

        Ok(RemoteBody {
            offset: start,
            total_len,
            chunks,
        })
    }
}

/// Parses `bytes START-END/TOTAL` into the start offset and total length.
fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let content = value.trim().strip_prefix("bytes ")?;
    let (range, total) = content.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((start, total))
}

/// Reads archives from the local filesystem (`file://` URLs or plain paths).
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSource;

impl LocalFileSource {
    fn path_for(url: &str) -> PathBuf {
        PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
    }
}

#[async_trait]
impl RemoteSource for LocalFileSource {
    async fn open(&self, archive: &CatalogArchiveRef, offset: u64) -> BootstrapResult<RemoteBody> {
        let path = Self::path_for(&archive.url);
        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
            BootstrapError::transfer_fatal(format!("cannot open {}: {e}", path.display()))
        })?;
        let total_len = file.metadata().await?.len();
        let offset = if offset <= total_len { offset } else { 0 };
        file.seek(SeekFrom::Start(offset)).await?;

        let chunks = ReaderStream::new(file)
            .map(|chunk| chunk.map(Vec::from).map_err(BootstrapError::from))
            .boxed();

        Ok(RemoteBody {
            offset,
            total_len: Some(total_len),
            chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range("bytes 100-199/200"), Some((100, Some(200))));
        assert_eq!(parse_content_range("bytes 5-9/*"), Some((5, None)));
        assert_eq!(parse_content_range("items 0-1/2"), None);
        assert_eq!(parse_content_range("bytes x-1/2"), None);
    }

    #[test]
    fn test_http_source_creation() {
        assert!(HttpSource::new().is_ok());
    }

    #[test]
    fn test_source_for_url_accepts_paths() {
        assert!(source_for_url("/tmp/catalog.zip").is_ok());
        assert!(source_for_url("https://example.org/catalog.zip").is_ok());
    }

    #[tokio::test]
    async fn test_local_file_source_honours_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.zip");
        std::fs::write(&path, b"0123456789").unwrap();
        let archive = CatalogArchiveRef::new(format!("file://{}", path.display()), "00");

        let body = LocalFileSource.open(&archive, 4).await.unwrap();
        assert!(body.honours(4));
        assert_eq!(body.total_len, Some(10));
        let chunks: Vec<Vec<u8>> = body.chunks.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"456789");

        let body = LocalFileSource.open(&archive, 50).await.unwrap();
        assert!(!body.honours(50));
        assert_eq!(body.offset, 0);
    }

    #[tokio::test]
    async fn test_local_file_source_missing_file_is_fatal() {
        let archive = CatalogArchiveRef::new("/nonexistent/setlist/catalog.zip", "00");
        let err = LocalFileSource.open(&archive, 0).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Transfer { retryable: false, .. }));
    }
}
