use anyhow::Result;
use setlist_core::schema::{Database, CATALOG_SCHEMA_VERSION};
use std::path::Path;

pub fn show_status(db_path: &Path) -> Result<()> {
    println!("\n📊 Setlist Status\n");
    println!("  Database: {}", db_path.display());

    if !db_path.exists() {
        println!("  Catalog: not bootstrapped");
        println!("\n  Run `setlist bootstrap` to populate the catalog");
        return Ok(());
    }

    let db = Database::open(db_path)?;
    let status = db.catalog_status()?;

    println!("  Shows: {}", status.shows);
    println!("  Recordings: {}", status.recordings);
    println!("  Venues: {}", status.venues);

    match &status.marker {
        Some(marker) if marker.schema_version == CATALOG_SCHEMA_VERSION => {
            println!("\n  Catalog: complete");
            println!("  Archive: {}", marker.content_hash);
            println!("  Imported: {}", marker.completed_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        Some(marker) => {
            println!(
                "\n  Catalog: schema version {} is outdated (current {})",
                marker.schema_version, CATALOG_SCHEMA_VERSION
            );
            println!("\n  Run `setlist bootstrap` to refresh it");
        }
        None => {
            println!("\n  Catalog: incomplete");
            println!("\n  Run `setlist bootstrap` to finish the import");
        }
    }

    Ok(())
}
