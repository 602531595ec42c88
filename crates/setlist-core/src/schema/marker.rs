use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Written when a bootstrap run completes.
///
/// The marker is the only thing that makes a local catalog "valid": it
/// records the schema version the data was imported under and the content
/// hash of the archive it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMarker {
    pub schema_version: u32,
    pub content_hash: String,
    pub show_count: u64,
    pub recording_count: u64,
    pub venue_count: u64,
    pub completed_at: DateTime<Utc>,
}

impl CatalogMarker {
    #[must_use]
    pub fn new(schema_version: u32, content_hash: impl Into<String>) -> Self {
        Self {
            schema_version,
            content_hash: content_hash.into(),
            show_count: 0,
            recording_count: 0,
            venue_count: 0,
            completed_at: Utc::now(),
        }
    }

    /// Whether this marker describes a catalog usable under `schema_version`.
    ///
    /// When `content_hash` is given it must match as well (case-insensitive
    /// hex comparison).
    #[must_use]
    pub fn matches(&self, schema_version: u32, content_hash: Option<&str>) -> bool {
        self.schema_version == schema_version
            && content_hash.map_or(true, |h| self.content_hash.eq_ignore_ascii_case(h))
    }
}

/// Snapshot of what the local catalog currently holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStatus {
    pub marker: Option<CatalogMarker>,
    pub shows: u64,
    pub recordings: u64,
    pub venues: u64,
}
