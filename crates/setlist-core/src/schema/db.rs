use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::model::{Recording, RecordingKey, Show, ShowKey, SourceType, Venue, VenueKey};

use super::marker::{CatalogMarker, CatalogStatus};
use super::migrations::MIGRATIONS;

const SHOW_COLUMNS: &str =
    "key, date, venue_key, venue_name, city, region, set_summary, song_count";

const RECORDING_COLUMNS: &str =
    "key, show_key, source_type, lineage, taper, transferer, track_count, duration_secs";

const VENUE_COLUMNS: &str = "key, name, city, region, show_count, first_show, last_show";

/// A database connection holding the local catalog.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database at the given path and apply migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let db = Self { conn };
        db.apply_migrations()?;
        Ok(db)
    }

    /// Get a reference to the underlying connection (for advanced queries).
    #[must_use]
    pub const fn conn(&self) -> &Connection {
        &self.conn
    }

    fn apply_migrations(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        let mut stmt = self
            .conn
            .prepare("SELECT version FROM schema_migrations ORDER BY version")?;
        let applied: Vec<u32> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for migration in MIGRATIONS {
            if !applied.contains(&migration.version) {
                log::info!(
                    "Applying migration {} ({})",
                    migration.version,
                    migration.name
                );
                self.conn.execute_batch(migration.sql)?;
                self.conn.execute(
                    "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
                    params![migration.version, migration.name],
                )?;
            }
        }

        Ok(())
    }

    /// Start a write transaction.
    ///
    /// The write lock is taken immediately. Nothing written through the
    /// returned [`CatalogWriter`] is visible to other connections until
    /// [`CatalogWriter::commit`]; dropping the writer rolls back.
    pub fn begin_import(&mut self) -> Result<CatalogWriter<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(CatalogWriter { tx })
    }
}

// Queries
impl Database {
    /// List all shows ordered by date, then key.
    pub fn list_shows(&self) -> Result<Vec<Show>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SHOW_COLUMNS} FROM shows ORDER BY date, key"
        ))?;
        let shows = stmt
            .query_map([], row_to_show)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(shows)
    }

    /// Get a show by key.
    pub fn get_show(&self, key: &ShowKey) -> Result<Option<Show>> {
        let show = self
            .conn
            .query_row(
                &format!("SELECT {SHOW_COLUMNS} FROM shows WHERE key = ?1"),
                [key.as_str()],
                row_to_show,
            )
            .optional()?;
        Ok(show)
    }

    /// List all recordings ordered by key.
    pub fn list_recordings(&self) -> Result<Vec<Recording>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORDING_COLUMNS} FROM recordings ORDER BY key"
        ))?;
        let recordings = stmt
            .query_map([], row_to_recording)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(recordings)
    }

    /// List the recordings of one show.
    pub fn list_recordings_for_show(&self, show: &ShowKey) -> Result<Vec<Recording>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORDING_COLUMNS} FROM recordings WHERE show_key = ?1 ORDER BY key"
        ))?;
        let recordings = stmt
            .query_map([show.as_str()], row_to_recording)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(recordings)
    }

    /// List all venues ordered by key.
    pub fn list_venues(&self) -> Result<Vec<Venue>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {VENUE_COLUMNS} FROM venues ORDER BY key"
        ))?;
        let venues = stmt
            .query_map([], row_to_venue)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(venues)
    }

    /// List the busiest venues first.
    pub fn top_venues(&self, limit: usize) -> Result<Vec<Venue>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {VENUE_COLUMNS} FROM venues ORDER BY show_count DESC, key LIMIT ?1"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let venues = stmt
            .query_map([limit], row_to_venue)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(venues)
    }

    pub fn count_shows(&self) -> Result<u64> {
        count(&self.conn, "shows")
    }

    pub fn count_recordings(&self) -> Result<u64> {
        count(&self.conn, "recordings")
    }

    pub fn count_venues(&self) -> Result<u64> {
        count(&self.conn, "venues")
    }

    /// Read the completion marker, if a bootstrap has ever completed.
    pub fn catalog_marker(&self) -> Result<Option<CatalogMarker>> {
        let marker = self
            .conn
            .query_row(
                "SELECT schema_version, content_hash, show_count, recording_count,
                        venue_count, completed_at
                 FROM catalog_marker WHERE id = 1",
                [],
                |row| {
                    Ok(CatalogMarker {
                        schema_version: row.get(0)?,
                        content_hash: row.get(1)?,
                        show_count: row.get(2)?,
                        recording_count: row.get(3)?,
                        venue_count: row.get(4)?,
                        completed_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(marker)
    }

    /// Whether the local catalog is complete for `schema_version` (and for
    /// `content_hash`, when one is given).
    pub fn is_catalog_valid(&self, schema_version: u32, content_hash: Option<&str>) -> Result<bool> {
        Ok(self
            .catalog_marker()?
            .is_some_and(|m| m.matches(schema_version, content_hash)))
    }

    /// Marker plus live row counts.
    pub fn catalog_status(&self) -> Result<CatalogStatus> {
        Ok(CatalogStatus {
            marker: self.catalog_marker()?,
            shows: self.count_shows()?,
            recordings: self.count_recordings()?,
            venues: self.count_venues()?,
        })
    }
}

/// Outcome of writing one recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingUpsert {
    Written,
    /// The owning show is not in storage; nothing was written.
    MissingShow,
}

/// An open import transaction.
///
/// All writes made through a writer become visible together on
/// [`commit`](Self::commit). Dropping the writer without committing rolls
/// every write back.
#[derive(Debug)]
pub struct CatalogWriter<'conn> {
    tx: Transaction<'conn>,
}

impl CatalogWriter<'_> {
    /// Insert a show, or replace the existing row with the same key.
    ///
    /// `catalog_hash` tags the row with the archive it was imported from.
    pub fn upsert_show(&self, show: &Show, catalog_hash: &str) -> Result<()> {
        let mut stmt = self.tx.prepare_cached(
            "INSERT INTO shows (
                key, date, venue_key, venue_name, city, region, set_summary,
                song_count, catalog_hash, imported_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(key) DO UPDATE SET
                date = excluded.date,
                venue_key = excluded.venue_key,
                venue_name = excluded.venue_name,
                city = excluded.city,
                region = excluded.region,
                set_summary = excluded.set_summary,
                song_count = excluded.song_count,
                catalog_hash = excluded.catalog_hash,
                imported_at = excluded.imported_at",
        )?;
        stmt.execute(params![
            show.key.as_str(),
            show.date,
            show.venue_key.as_str(),
            show.venue_name,
            show.city,
            show.region,
            show.set_summary,
            show.song_count,
            catalog_hash,
            Utc::now(),
        ])?;
        Ok(())
    }

    /// Insert or replace a recording whose show is already stored.
    pub fn upsert_recording(
        &self,
        recording: &Recording,
        catalog_hash: &str,
    ) -> Result<RecordingUpsert> {
        let show_exists = self
            .tx
            .prepare_cached("SELECT 1 FROM shows WHERE key = ?1")?
            .exists([recording.show_key.as_str()])?;
        if !show_exists {
            return Ok(RecordingUpsert::MissingShow);
        }

        let mut stmt = self.tx.prepare_cached(
            "INSERT INTO recordings (
                key, show_key, source_type, lineage, taper, transferer,
                track_count, duration_secs, catalog_hash, imported_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(key) DO UPDATE SET
                show_key = excluded.show_key,
                source_type = excluded.source_type,
                lineage = excluded.lineage,
                taper = excluded.taper,
                transferer = excluded.transferer,
                track_count = excluded.track_count,
                duration_secs = excluded.duration_secs,
                catalog_hash = excluded.catalog_hash,
                imported_at = excluded.imported_at",
        )?;
        stmt.execute(params![
            recording.key.as_str(),
            recording.show_key.as_str(),
            recording.source_type.label(),
            recording.lineage,
            recording.taper,
            recording.transferer,
            recording.track_count,
            recording.duration_secs,
            catalog_hash,
            Utc::now(),
        ])?;
        Ok(RecordingUpsert::Written)
    }

    /// Replace the whole venue set.
    pub fn replace_venues(&self, venues: &[Venue]) -> Result<()> {
        self.tx.execute("DELETE FROM venues", [])?;
        let mut stmt = self.tx.prepare_cached(
            "INSERT INTO venues (key, name, city, region, show_count, first_show, last_show)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for venue in venues {
            stmt.execute(params![
                venue.key.as_str(),
                venue.name,
                venue.city,
                venue.region,
                venue.show_count,
                venue.first_show,
                venue.last_show,
            ])?;
        }
        Ok(())
    }

    /// Read every show visible inside this transaction.
    pub fn shows(&self) -> Result<Vec<Show>> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {SHOW_COLUMNS} FROM shows ORDER BY date, key"
        ))?;
        let shows = stmt
            .query_map([], row_to_show)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(shows)
    }

    /// Delete shows imported from any other archive. Their recordings go
    /// with them through the foreign key cascade.
    pub fn prune_shows(&self, catalog_hash: &str) -> Result<usize> {
        let removed = self
            .tx
            .execute("DELETE FROM shows WHERE catalog_hash <> ?1", [catalog_hash])?;
        Ok(removed)
    }

    /// Delete recordings imported from any other archive.
    pub fn prune_recordings(&self, catalog_hash: &str) -> Result<usize> {
        let removed = self
            .tx
            .execute("DELETE FROM recordings WHERE catalog_hash <> ?1", [catalog_hash])?;
        Ok(removed)
    }

    /// Remove the completion marker. Once catalog rows change, the old
    /// marker no longer describes them.
    pub fn clear_marker(&self) -> Result<()> {
        self.tx.execute("DELETE FROM catalog_marker", [])?;
        Ok(())
    }

    /// Write the completion marker, filling in the row counts this
    /// transaction can see.
    pub fn write_marker(&self, schema_version: u32, content_hash: &str) -> Result<CatalogMarker> {
        let mut marker = CatalogMarker::new(schema_version, content_hash);
        marker.show_count = count(&self.tx, "shows")?;
        marker.recording_count = count(&self.tx, "recordings")?;
        marker.venue_count = count(&self.tx, "venues")?;

        self.tx.execute(
            "INSERT OR REPLACE INTO catalog_marker (
                id, schema_version, content_hash, show_count, recording_count,
                venue_count, completed_at
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                marker.schema_version,
                marker.content_hash,
                marker.show_count,
                marker.recording_count,
                marker.venue_count,
                marker.completed_at,
            ],
        )?;
        Ok(marker)
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

}

fn count(conn: &Connection, table: &str) -> Result<u64> {
    let n: u64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    Ok(n)
}

fn row_to_show(row: &Row) -> rusqlite::Result<Show> {
    Ok(Show {
        key: ShowKey::new(row.get::<_, String>(0)?),
        date: row.get(1)?,
        venue_key: VenueKey::new(row.get::<_, String>(2)?),
        venue_name: row.get(3)?,
        city: row.get(4)?,
        region: row.get(5)?,
        set_summary: row.get(6)?,
        song_count: row.get(7)?,
    })
}

fn row_to_recording(row: &Row) -> rusqlite::Result<Recording> {
    let source_label: String = row.get(2)?;
    Ok(Recording {
        key: RecordingKey::new(row.get::<_, String>(0)?),
        show_key: ShowKey::new(row.get::<_, String>(1)?),
        source_type: SourceType::from_label(&source_label),
        lineage: row.get(3)?,
        taper: row.get(4)?,
        transferer: row.get(5)?,
        track_count: row.get(6)?,
        duration_secs: row.get(7)?,
    })
}

fn row_to_venue(row: &Row) -> rusqlite::Result<Venue> {
    Ok(Venue {
        key: VenueKey::new(row.get::<_, String>(0)?),
        name: row.get(1)?,
        city: row.get(2)?,
        region: row.get(3)?,
        show_count: row.get(4)?,
        first_show: row.get(5)?,
        last_show: row.get(6)?,
    })
}
