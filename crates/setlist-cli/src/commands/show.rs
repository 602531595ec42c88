use anyhow::{Context, Result};
use setlist_core::model::{Recording, ShowKey};
use setlist_core::schema::Database;
use std::path::Path;

/// Print one show and its recordings.
pub fn show_show(db_path: &Path, key: &str) -> Result<()> {
    let db = Database::open(db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let key = ShowKey::new(key);
    let Some(show) = db.get_show(&key)? else {
        anyhow::bail!("No show {key} in the catalog");
    };
    let recordings = db.list_recordings_for_show(&key)?;

    println!("\n🎫 {} {}\n", show.date.format("%Y-%m-%d"), show.venue_name);
    let location = [show.city.as_deref(), show.region.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ");
    if !location.is_empty() {
        println!("  Location: {location}");
    }
    println!("  Show: {}", show.key);
    if show.song_count > 0 {
        println!("  Songs: {}", show.song_count);
    }
    if let Some(summary) = &show.set_summary {
        println!("  Set: {summary}");
    }

    println!("\n  Recordings ({}):", recordings.len());
    for recording in &recordings {
        println!("    {}", describe_recording(recording));
    }

    Ok(())
}

fn describe_recording(recording: &Recording) -> String {
    let mut parts = vec![format!("{} [{}]", recording.key, recording.source_type.label())];
    if let Some(tracks) = recording.track_count {
        parts.push(format!("{tracks} tracks"));
    }
    if let Some(secs) = recording.duration_secs {
        parts.push(format!("{:.0} min", (secs / 60.0).round()));
    }
    if let Some(lineage) = &recording.lineage {
        parts.push(format!(" {lineage}"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use setlist_core::model::SourceType;

    #[test]
    fn test_describe_recording() {
        let recording = Recording::new(
            "gd77-05-08.sbd",
            ShowKey::new("gd77-05-08"),
            SourceType::Soundboard,
        )
        .with_track_count(12)
        .with_duration_secs(5400.0)
        .with_lineage("SBD > DAT");
        assert_eq!(
            describe_recording(&recording),
            format!(
                "gd77-05-08.sbd [{}] 12 tracks 90 min  SBD > DAT",
                SourceType::Soundboard.label()
            )
        );
    }

    #[test]
    fn test_unknown_show_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("catalog.db");
        Database::open(&db_path).unwrap();
        assert!(show_show(&db_path, "gd00000").is_err());
    }
}
