use anyhow::{Context, Result};
use setlist_core::schema::Database;
use std::path::Path;

pub fn list_venues(db_path: &Path, limit: usize) -> Result<()> {
    let db = Database::open(db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let venues = db.top_venues(limit)?;

    if venues.is_empty() {
        println!("No venues yet. Run `setlist bootstrap` first.");
        return Ok(());
    }

    for venue in venues {
        let location = match (&venue.city, &venue.region) {
            (Some(city), Some(region)) => format!("{city}, {region}"),
            (Some(city), None) => city.clone(),
            (None, Some(region)) => region.clone(),
            (None, None) => String::new(),
        };
        println!(
            "{:>5}  {}  {} - {}  {}",
            venue.show_count, venue.name, venue.first_show, venue.last_show, location
        );
    }

    Ok(())
}
