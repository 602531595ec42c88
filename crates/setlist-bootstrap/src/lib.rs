//! Catalog bootstrap pipeline for setlist.
//!
//! Populates local storage from a remote catalog archive on first run or on
//! a forced refresh. A run moves through the phases of [`BootstrapPhase`]:
//! the local catalog is checked, and when it is missing or stale the archive
//! is downloaded, extracted, parsed and imported (shows, derived venues,
//! then recordings) before a completion marker is written.
//!
//! Progress is pushed to a single subscriber through a bounded channel, see
//! [`progress`].

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod aggregate;
pub mod archive;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod import;
pub mod orchestrator;
pub mod parse;
pub mod phase;
pub mod progress;
pub mod remote;
pub mod staging;

pub use aggregate::Aggregator;
pub use archive::CatalogArchiveRef;
pub use config::Config;
pub use error::{BootstrapError, BootstrapResult, ErrorKind, PhaseError};
pub use extract::{Extractor, StagedCatalog};
pub use fetch::{FetchOptions, Fetcher};
pub use import::{Importer, RecordingImport};
pub use orchestrator::{BootstrapOptions, BootstrapRun, Bootstrapper};
pub use parse::{CatalogParser, ParseStats, RecordStream};
pub use phase::{BootstrapFailure, BootstrapPhase, BootstrapSummary, PhaseKind};
pub use progress::{BootstrapProgress, ProgressSender, ProgressStream, SubProgress};
pub use remote::{source_for_url, HttpSource, LocalFileSource, RemoteBody, RemoteSource};
pub use staging::StagingArea;
