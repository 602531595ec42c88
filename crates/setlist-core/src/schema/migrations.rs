/// A schema migration.
#[derive(Debug)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Schema version recorded in the completion marker.
///
/// Must equal the version of the last entry in [`MIGRATIONS`]; a marker
/// written under any other version marks the local catalog as stale.
pub const CATALOG_SCHEMA_VERSION: u32 = 1;

const MIGRATION_001: &str = r#"
-- Shows (natural key is the catalog identifier)
CREATE TABLE IF NOT EXISTS shows (
    key TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    venue_key TEXT NOT NULL,
    venue_name TEXT NOT NULL,
    city TEXT,
    region TEXT,
    set_summary TEXT,
    song_count INTEGER NOT NULL DEFAULT 0,
    catalog_hash TEXT NOT NULL,
    imported_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_shows_date ON shows(date);
CREATE INDEX IF NOT EXISTS idx_shows_venue_key ON shows(venue_key);

-- Recordings (many-to-one with shows)
CREATE TABLE IF NOT EXISTS recordings (
    key TEXT PRIMARY KEY,
    show_key TEXT NOT NULL REFERENCES shows(key) ON DELETE CASCADE,
    source_type TEXT NOT NULL,
    lineage TEXT,
    taper TEXT,
    transferer TEXT,
    track_count INTEGER,
    duration_secs REAL,
    catalog_hash TEXT NOT NULL,
    imported_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_recordings_show_key ON recordings(show_key);

-- Venues (derived, replaced wholesale by each aggregation pass)
CREATE TABLE IF NOT EXISTS venues (
    key TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    city TEXT,
    region TEXT,
    show_count INTEGER NOT NULL,
    first_show TEXT NOT NULL,
    last_show TEXT NOT NULL
);

-- Completion marker (at most one row)
CREATE TABLE IF NOT EXISTS catalog_marker (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    show_count INTEGER NOT NULL,
    recording_count INTEGER NOT NULL,
    venue_count INTEGER NOT NULL,
    completed_at TEXT NOT NULL
);
"#;

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_catalog_schema",
    sql: MIGRATION_001,
}];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_version_matches_last_migration() {
        let last = MIGRATIONS.last().map(|m| m.version);
        assert_eq!(last, Some(CATALOG_SCHEMA_VERSION));
    }

    #[test]
    fn test_migration_versions_are_increasing() {
        assert!(MIGRATIONS.windows(2).all(|w| w[0].version < w[1].version));
    }
}
