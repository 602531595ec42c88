//! The bootstrap phase state machine.

use serde::{Deserialize, Serialize};
use setlist_core::schema::CatalogMarker;
use std::fmt;

use crate::error::{ErrorKind, PhaseError};

/// Payload-free label for a phase, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Idle,
    Checking,
    UsingLocal,
    Downloading,
    Extracting,
    ImportingShows,
    ComputingVenues,
    ImportingRecordings,
    Completed,
    Error,
}

impl PhaseKind {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::UsingLocal => "using_local",
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::ImportingShows => "importing_shows",
            Self::ComputingVenues => "computing_venues",
            Self::ImportingRecordings => "importing_recordings",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Whether `next` may directly follow `self`.
    ///
    /// Forward edges follow the pipeline; `Error` is reachable from every
    /// non-terminal phase; terminal phases have no successors.
    pub const fn can_advance_to(self, next: Self) -> bool {
        use PhaseKind::{
            Checking, Completed, ComputingVenues, Downloading, Error, Extracting, Idle,
            ImportingRecordings, ImportingShows, UsingLocal,
        };
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Error)
                | (Idle, Checking)
                | (Checking, UsingLocal | Downloading)
                | (UsingLocal, Completed)
                | (Downloading, Extracting)
                | (Extracting, ImportingShows)
                | (ImportingShows, ComputingVenues)
                | (ComputingVenues, ImportingRecordings)
                | (ImportingRecordings, Completed)
        )
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The active phase together with its phase-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum BootstrapPhase {
    Idle,
    Checking,
    /// The local catalog is valid and will be used as-is.
    UsingLocal { marker: CatalogMarker },
    Downloading,
    Extracting,
    ImportingShows,
    ComputingVenues,
    ImportingRecordings,
    Completed(BootstrapSummary),
    Error(BootstrapFailure),
}

impl BootstrapPhase {
    pub const fn kind(&self) -> PhaseKind {
        match self {
            Self::Idle => PhaseKind::Idle,
            Self::Checking => PhaseKind::Checking,
            Self::UsingLocal { .. } => PhaseKind::UsingLocal,
            Self::Downloading => PhaseKind::Downloading,
            Self::Extracting => PhaseKind::Extracting,
            Self::ImportingShows => PhaseKind::ImportingShows,
            Self::ComputingVenues => PhaseKind::ComputingVenues,
            Self::ImportingRecordings => PhaseKind::ImportingRecordings,
            Self::Completed(_) => PhaseKind::Completed,
            Self::Error(_) => PhaseKind::Error,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }
}

/// What a completed run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSummary {
    /// The existing local catalog was kept; nothing was imported.
    pub used_local: bool,
    pub content_hash: String,
    pub shows_imported: usize,
    pub recordings_imported: usize,
    pub venues_computed: usize,
    /// Records dropped by the parser for failing validation.
    pub records_skipped: usize,
    /// Recordings dropped because their show was not in the catalog.
    pub orphan_recordings: usize,
}

/// Why a run ended in the `Error` phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapFailure {
    /// The phase that was active when the failure occurred.
    pub phase: PhaseKind,
    pub kind: ErrorKind,
    pub detail: String,
}

impl From<&PhaseError> for BootstrapFailure {
    fn from(err: &PhaseError) -> Self {
        Self {
            phase: err.phase,
            kind: err.kind(),
            detail: err.error.to_string(),
        }
    }
}
