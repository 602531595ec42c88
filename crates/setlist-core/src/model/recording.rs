use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::ids::{RecordingKey, ShowKey};

/// How a recording was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    /// Soundboard feed.
    Soundboard,
    /// Audience microphones.
    Audience,
    /// Matrix of soundboard and audience sources.
    Matrix,
    /// FM or other broadcast.
    Broadcast,
    Unknown,
}

impl SourceType {
    /// Parse the catalog's short source label (`SBD`, `AUD`, ...).
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "SBD" | "SOUNDBOARD" => Self::Soundboard,
            "AUD" | "AUDIENCE" => Self::Audience,
            "MTX" | "MATRIX" => Self::Matrix,
            "FM" | "PRE-FM" | "BROADCAST" => Self::Broadcast,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Soundboard => "SBD",
            Self::Audience => "AUD",
            Self::Matrix => "MTX",
            Self::Broadcast => "FM",
            Self::Unknown => "UNK",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A recording (tape source) of a show.
///
/// Every recording belongs to exactly one show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub key: RecordingKey,
    pub show_key: ShowKey,
    pub source_type: SourceType,

    /// Free-form lineage chain (e.g. "SBD > Reel > DAT > FLAC").
    pub lineage: Option<String>,
    pub taper: Option<String>,
    pub transferer: Option<String>,
    pub track_count: Option<u32>,
    pub duration_secs: Option<f64>,
}

impl Recording {
    #[must_use]
    pub fn new(key: impl Into<String>, show_key: ShowKey, source_type: SourceType) -> Self {
        Self {
            key: RecordingKey::new(key),
            show_key,
            source_type,
            lineage: None,
            taper: None,
            transferer: None,
            track_count: None,
            duration_secs: None,
        }
    }

    #[must_use]
    pub fn with_lineage(mut self, lineage: impl Into<String>) -> Self {
        self.lineage = Some(lineage.into());
        self
    }

    #[must_use]
    pub fn with_taper(mut self, taper: impl Into<String>) -> Self {
        self.taper = Some(taper.into());
        self
    }

    #[must_use]
    pub fn with_transferer(mut self, transferer: impl Into<String>) -> Self {
        self.transferer = Some(transferer.into());
        self
    }

    #[must_use]
    pub fn with_track_count(mut self, count: u32) -> Self {
        self.track_count = Some(count);
        self
    }

    #[must_use]
    pub fn with_duration_secs(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }
}
