//! Streaming parser over the extracted catalog files.
//!
//! Each call to [`CatalogParser::shows`] or [`CatalogParser::recordings`]
//! starts a fresh pass over the staged files. Records are read one line at a
//! time; malformed lines are logged, counted and skipped until the stream's
//! tolerance is exceeded, at which point it yields
//! [`BootstrapError::CatalogFormat`] and ends.

use chrono::NaiveDate;
use serde::Deserialize;
use setlist_core::model::{Recording, Show, ShowKey, SourceType};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{BootstrapError, BootstrapResult};
use crate::extract::StagedCatalog;

/// Produces record sequences from a [`StagedCatalog`].
#[derive(Debug, Clone)]
pub struct CatalogParser {
    staged: StagedCatalog,
    tolerance: usize,
}

impl CatalogParser {
    pub const fn new(staged: StagedCatalog, tolerance: usize) -> Self {
        Self { staged, tolerance }
    }

    pub fn shows(&self) -> BootstrapResult<RecordStream<Show>> {
        RecordStream::open(&self.staged.show_files, self.tolerance, parse_show)
    }

    pub fn recordings(&self) -> BootstrapResult<RecordStream<Recording>> {
        RecordStream::open(&self.staged.recording_files, self.tolerance, parse_recording)
    }
}

/// Counters shared between a [`RecordStream`] and its observers.
#[derive(Debug, Default)]
pub struct ParseStats {
    total_bytes: u64,
    bytes_read: AtomicU64,
    parsed: AtomicUsize,
    skipped: AtomicUsize,
}

impl ParseStats {
    pub fn parsed(&self) -> usize {
        self.parsed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Fraction of the input consumed so far.
    pub fn fraction(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        Some(self.bytes_read.load(Ordering::Relaxed) as f64 / self.total_bytes as f64)
    }
}

type LineParser<T> = fn(&str) -> Result<T, String>;

/// Longest record line accepted; longer lines are skipped as malformed
/// without being buffered.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// One non-blank line, or the reason it cannot be parsed at all.
#[derive(Debug)]
enum Line {
    Text(String),
    Unreadable(String),
}

/// A lazy, finite sequence of parsed records.
pub struct RecordStream<T> {
    pending: VecDeque<PathBuf>,
    current: Option<OpenFile>,
    parse: LineParser<T>,
    tolerance: usize,
    stats: Arc<ParseStats>,
    finished: bool,
}

#[derive(Debug)]
struct OpenFile {
    path: PathBuf,
    reader: BufReader<File>,
    line: usize,
}

impl<T> std::fmt::Debug for RecordStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("pending", &self.pending)
            .field("current", &self.current.as_ref().map(|c| &c.path))
            .field("tolerance", &self.tolerance)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<T> RecordStream<T> {
    fn open(files: &[PathBuf], tolerance: usize, parse: LineParser<T>) -> BootstrapResult<Self> {
        let mut total_bytes = 0;
        for file in files {
            total_bytes += std::fs::metadata(file)?.len();
        }
        Ok(Self {
            pending: files.iter().cloned().collect(),
            current: None,
            parse,
            tolerance,
            stats: Arc::new(ParseStats {
                total_bytes,
                ..ParseStats::default()
            }),
            finished: false,
        })
    }

    pub fn stats(&self) -> Arc<ParseStats> {
        Arc::clone(&self.stats)
    }

    /// Reads the next non-blank line, moving across files as needed.
    fn next_line(&mut self) -> BootstrapResult<Option<(Line, usize, String)>> {
        let mut buf = Vec::new();
        loop {
            if self.current.is_none() {
                let Some(path) = self.pending.pop_front() else {
                    return Ok(None);
                };
                let reader = BufReader::new(File::open(&path)?);
                self.current = Some(OpenFile {
                    path,
                    reader,
                    line: 0,
                });
            }
            let Some(file) = self.current.as_mut() else {
                continue;
            };

            buf.clear();
            let limit = MAX_LINE_BYTES as u64 + 1;
            let n = (&mut file.reader).take(limit).read_until(b'\n', &mut buf)?;
            if n == 0 {
                self.current = None;
                continue;
            }
            file.line += 1;
            let mut consumed = n;
            let too_long = buf.len() > MAX_LINE_BYTES && buf.last() != Some(&b'\n');
            if too_long {
                consumed += file.reader.skip_until(b'\n')?;
            }
            self.stats
                .bytes_read
                .fetch_add(consumed as u64, Ordering::Relaxed);

            let origin = file.path.display().to_string();
            let line = file.line;
            if too_long {
                let problem = format!("line exceeds {MAX_LINE_BYTES} bytes");
                return Ok(Some((Line::Unreadable(problem), line, origin)));
            }
            match std::str::from_utf8(&buf) {
                Ok(text) if text.trim().is_empty() => {}
                Ok(text) => return Ok(Some((Line::Text(text.trim().to_string()), line, origin))),
                Err(e) => {
                    let problem = format!("line is not valid UTF-8: {e}");
                    return Ok(Some((Line::Unreadable(problem), line, origin)));
                }
            }
        }
    }

    fn skip(&mut self, origin: &str, line: usize, problem: &str) -> Option<BootstrapError> {
        let skipped = self.stats.skipped.fetch_add(1, Ordering::Relaxed) + 1;
        log::warn!("Skipping malformed record at {origin}:{line}: {problem}");
        (skipped > self.tolerance).then(|| BootstrapError::CatalogFormat {
            skipped,
            tolerance: self.tolerance,
            last_problem: format!("{origin}:{line}: {problem}"),
        })
    }
}

impl<T> Iterator for RecordStream<T> {
    type Item = BootstrapResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let (found, line, origin) = match self.next_line() {
                Ok(Some(found)) => found,
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            };

            let parsed = match found {
                Line::Text(text) => (self.parse)(&text),
                Line::Unreadable(problem) => Err(problem),
            };
            match parsed {
                Ok(record) => {
                    self.stats.parsed.fetch_add(1, Ordering::Relaxed);
                    return Some(Ok(record));
                }
                Err(problem) => {
                    if let Some(err) = self.skip(&origin, line, &problem) {
                        self.finished = true;
                        return Some(Err(err));
                    }
                }
            }
        }
        None
    }
}

#[derive(Debug, Deserialize)]
struct RawShow {
    identifier: String,
    date: String,
    venue: String,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    setlist: Option<Vec<String>>,
    #[serde(default)]
    set_summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRecording {
    identifier: String,
    show: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    lineage: Option<String>,
    #[serde(default)]
    taper: Option<String>,
    #[serde(default)]
    transferer: Option<String>,
    #[serde(default)]
    track_count: Option<u32>,
    #[serde(default)]
    duration_secs: Option<f64>,
}

fn required(field: &str, value: &str) -> Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        Err(format!("missing {field}"))
    } else {
        Ok(value.to_string())
    }
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl TryFrom<RawShow> for Show {
    type Error = String;

    fn try_from(raw: RawShow) -> Result<Self, Self::Error> {
        let key = required("identifier", &raw.identifier)?;
        let venue = required("venue", &raw.venue)?;
        let date = NaiveDate::parse_from_str(raw.date.trim(), "%Y-%m-%d")
            .map_err(|e| format!("invalid date {:?}: {e}", raw.date))?;

        let mut show = Self::new(key, date, venue)
            .with_location(optional(raw.city), optional(raw.region));
        if let Some(songs) = raw.setlist {
            show = show.with_set_list(songs);
        } else if let Some(summary) = optional(raw.set_summary) {
            show = show.with_set_summary(summary);
        }
        Ok(show)
    }
}

impl TryFrom<RawRecording> for Recording {
    type Error = String;

    fn try_from(raw: RawRecording) -> Result<Self, Self::Error> {
        let key = required("identifier", &raw.identifier)?;
        let show = required("show", &raw.show)?;
        let source = raw
            .source
            .as_deref()
            .map_or(SourceType::Unknown, SourceType::from_label);

        let mut recording = Self::new(key, ShowKey::new(show), source);
        if let Some(lineage) = optional(raw.lineage) {
            recording = recording.with_lineage(lineage);
        }
        if let Some(taper) = optional(raw.taper) {
            recording = recording.with_taper(taper);
        }
        if let Some(transferer) = optional(raw.transferer) {
            recording = recording.with_transferer(transferer);
        }
        if let Some(count) = raw.track_count {
            recording = recording.with_track_count(count);
        }
        if let Some(secs) = raw.duration_secs {
            if !secs.is_finite() || secs < 0.0 {
                return Err(format!("invalid duration {secs}"));
            }
            recording = recording.with_duration_secs(secs);
        }
        Ok(recording)
    }
}

fn parse_show(line: &str) -> Result<Show, String> {
    let raw: RawShow = serde_json::from_str(line).map_err(|e| e.to_string())?;
    Show::try_from(raw)
}

fn parse_recording(line: &str) -> Result<Recording, String> {
    let raw: RawRecording = serde_json::from_str(line).map_err(|e| e.to_string())?;
    Recording::try_from(raw)
}
