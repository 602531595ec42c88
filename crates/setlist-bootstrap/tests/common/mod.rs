//! Shared fixtures for the bootstrap integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, TimeDelta};
use futures::stream::{self, StreamExt};
use setlist_bootstrap::fetch::FetchOptions;
use setlist_bootstrap::{
    BootstrapError, BootstrapOptions, BootstrapProgress, BootstrapResult, BootstrapSummary,
    Bootstrapper, CatalogArchiveRef, PhaseError, PhaseKind, RemoteBody, RemoteSource, StagingArea,
};
use setlist_core::schema::Database;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const VENUES: [(&str, &str, &str); 3] = [
    ("Barton Hall", "Ithaca", "NY"),
    ("Winterland Arena", "San Francisco", "CA"),
    ("Fillmore East", "New York", "NY"),
];

/// Generated catalog content, one JSON document per line.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub shows: Vec<String>,
    pub recordings: Vec<String>,
}

impl Catalog {
    /// `shows` shows spread over three venues, each with
    /// `recordings_per_show` recordings.
    pub fn generate(shows: usize, recordings_per_show: usize) -> Self {
        let mut catalog = Self::default();
        for i in 0..shows {
            catalog.shows.push(show_line(i));
            for r in 0..recordings_per_show {
                catalog.recordings.push(recording_line(&format!("rec{i:05}-{r}"), &show_key(i)));
            }
        }
        catalog
    }

    /// Replaces `count` evenly spaced show lines with malformed ones.
    pub fn with_malformed_shows(mut self, count: usize) -> Self {
        let step = self.shows.len() / (count + 1);
        for n in 1..=count {
            let line = match n % 3 {
                0 => "{not json".to_string(),
                1 => r#"{"identifier":"bad","date":"1977-02-30","venue":"Nowhere"}"#.to_string(),
                _ => r#"{"identifier":"","date":"1977-05-08","venue":"Nowhere"}"#.to_string(),
            };
            self.shows[n * step] = line;
        }
        self
    }

    pub fn with_recording(mut self, key: &str, show: &str) -> Self {
        self.recordings.push(recording_line(key, show));
        self
    }

    /// Zip archive bytes: shows deflated, recordings stored.
    pub fn archive(&self) -> Vec<u8> {
        build_archive(&[
            ("catalog/shows.jsonl", self.shows.join("\n"), true),
            ("catalog/recordings.jsonl", self.recordings.join("\n"), false),
        ])
    }
}

pub fn show_key(i: usize) -> String {
    format!("gd{i:05}")
}

pub fn show_line(i: usize) -> String {
    let (venue, city, region) = VENUES[i % VENUES.len()];
    let venue = if i % 2 == 0 {
        venue.to_string()
    } else {
        venue.to_uppercase()
    };
    let base = NaiveDate::from_ymd_opt(1965, 12, 4).unwrap_or_default();
    let date = base + TimeDelta::days(i64::try_from(i).unwrap_or_default());
    serde_json::json!({
        "identifier": show_key(i),
        "date": date.format("%Y-%m-%d").to_string(),
        "venue": venue,
        "city": city,
        "region": region,
        "setlist": ["Bertha", "Me and My Uncle", "Playing in the Band"],
    })
    .to_string()
}

pub fn recording_line(key: &str, show: &str) -> String {
    serde_json::json!({
        "identifier": key,
        "show": show,
        "source": "SBD",
        "lineage": "SBD > Cassette > DAT > FLAC",
        "track_count": 12,
        "duration_secs": 5400.0,
    })
    .to_string()
}

/// Writes a zip archive with the given `(name, content, deflate)` entries.
pub fn build_archive(files: &[(&str, String, bool)]) -> Vec<u8> {
    let mut archive = rawzip::ZipArchiveWriter::new(Vec::new());
    for (name, content, deflate) in files {
        if *deflate {
            let (mut entry, config) = archive
                .new_file(name)
                .compression_method(rawzip::CompressionMethod::Deflate)
                .start()
                .unwrap();
            let encoder =
                flate2::write::DeflateEncoder::new(&mut entry, flate2::Compression::default());
            let mut writer = config.wrap(encoder);
            writer.write_all(content.as_bytes()).unwrap();
            let (encoder, output) = writer.finish().unwrap();
            encoder.finish().unwrap();
            entry.finish(output).unwrap();
        } else {
            let (mut entry, config) = archive.new_file(name).start().unwrap();
            let mut writer = config.wrap(&mut entry);
            writer.write_all(content.as_bytes()).unwrap();
            let (_, output) = writer.finish().unwrap();
            entry.finish(output).unwrap();
        }
    }
    archive.finish().unwrap()
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

pub fn archive_ref(data: &[u8]) -> CatalogArchiveRef {
    CatalogArchiveRef::new("mem://catalog.zip", sha256_hex(data)).with_expected_size(data.len() as u64)
}

/// In-memory remote that honours ranges and can break off mid-transfer.
#[derive(Debug)]
pub struct MemorySource {
    data: Vec<u8>,
    chunk_size: usize,
    /// Absolute byte position after which the transfer fails.
    fail_at: Option<usize>,
    opens: AtomicUsize,
    offsets: Mutex<Vec<u64>>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data,
            chunk_size: 4096,
            fail_at: None,
            opens: AtomicUsize::new(0),
            offsets: Mutex::new(Vec::new()),
        })
    }

    pub fn failing_at(data: Vec<u8>, position: usize) -> Arc<Self> {
        Arc::new(Self {
            data,
            chunk_size: 64,
            fail_at: Some(position),
            opens: AtomicUsize::new(0),
            offsets: Mutex::new(Vec::new()),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn requested_offsets(&self) -> Vec<u64> {
        self.offsets.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteSource for MemorySource {
    async fn open(&self, _: &CatalogArchiveRef, offset: u64) -> BootstrapResult<RemoteBody> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.offsets.lock().unwrap().push(offset);

        let start = usize::try_from(offset).unwrap().min(self.data.len());
        let end = self.fail_at.unwrap_or(self.data.len()).max(start);
        let mut chunks: Vec<BootstrapResult<Vec<u8>>> = self.data[start..end]
            .chunks(self.chunk_size)
            .map(|c| Ok(c.to_vec()))
            .collect();
        if self.fail_at.is_some() {
            chunks.push(Err(BootstrapError::transfer("connection reset by peer")));
        }

        Ok(RemoteBody {
            offset: start as u64,
            total_len: Some(self.data.len() as u64),
            chunks: stream::iter(chunks).boxed(),
        })
    }
}

/// A temp directory holding one database and its staging area.
#[derive(Debug)]
pub struct Harness {
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("data").join("catalog.db")
    }

    pub fn staging(&self) -> StagingArea {
        StagingArea::new(self.dir.path().join("staging"))
    }

    pub fn options(&self) -> BootstrapOptions {
        BootstrapOptions::new(self.db_path(), self.staging().root()).with_fetch_options(
            FetchOptions {
                max_retries: 0,
                retry_min_delay: Duration::from_millis(1),
                max_staging_bytes: None,
            },
        )
    }

    pub fn bootstrapper(&self, source: Arc<dyn RemoteSource>) -> Bootstrapper {
        Bootstrapper::new(self.options(), source)
    }

    pub fn db(&self) -> Database {
        Database::open(self.db_path()).unwrap()
    }
}

pub type Outcome = Result<BootstrapSummary, PhaseError>;

/// Starts a run and collects every progress event until it finishes.
pub async fn run_to_end(
    bootstrapper: &Bootstrapper,
    archive: CatalogArchiveRef,
) -> (Vec<BootstrapProgress>, Outcome) {
    let run = bootstrapper.start(archive).unwrap();
    let (progress, _cancel, done) = run.into_parts();
    let events = progress.collect_all().await;
    (events, done.await)
}

/// Phase kinds in order, with sub-progress repeats collapsed.
pub fn phases(events: &[BootstrapProgress]) -> Vec<PhaseKind> {
    let mut kinds: Vec<PhaseKind> = events.iter().map(BootstrapProgress::kind).collect();
    kinds.dedup();
    kinds
}

pub fn terminal_count(events: &[BootstrapProgress]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}
