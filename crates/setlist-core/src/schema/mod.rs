//! SQLite storage for the local catalog.

mod db;
mod lock;
mod marker;
mod migrations;

pub use db::{CatalogWriter, Database, RecordingUpsert};
pub use lock::RunLock;
pub use marker::{CatalogMarker, CatalogStatus};
pub use migrations::{Migration, CATALOG_SCHEMA_VERSION, MIGRATIONS};
