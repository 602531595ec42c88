//! Derives the venue set from committed shows.

use chrono::NaiveDate;
use setlist_core::model::{Show, Venue, VenueKey};
use setlist_core::schema::Database;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::BootstrapResult;

#[derive(Debug, Clone)]
pub struct Aggregator {
    db_path: PathBuf,
}

impl Aggregator {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// Recomputes every venue from the stored shows and replaces the venue
    /// set in one transaction. Blocking.
    pub fn compute_venues(&self) -> BootstrapResult<usize> {
        let mut db = Database::open(&self.db_path)?;
        let writer = db.begin_import()?;
        let venues = group_venues(&writer.shows()?);
        writer.replace_venues(&venues)?;
        writer.commit()?;
        log::info!("Computed {} venues", venues.len());
        Ok(venues.len())
    }
}

#[derive(Debug)]
struct VenueGroup<'a> {
    names: BTreeMap<&'a str, u32>,
    cities: BTreeMap<&'a str, u32>,
    regions: BTreeMap<&'a str, u32>,
    show_count: u32,
    first_show: NaiveDate,
    last_show: NaiveDate,
}

impl<'a> VenueGroup<'a> {
    const fn new(date: NaiveDate) -> Self {
        Self {
            names: BTreeMap::new(),
            cities: BTreeMap::new(),
            regions: BTreeMap::new(),
            show_count: 0,
            first_show: date,
            last_show: date,
        }
    }

    fn add(&mut self, show: &'a Show) {
        *self.names.entry(show.venue_name.as_str()).or_default() += 1;
        if let Some(city) = show.city.as_deref() {
            *self.cities.entry(city).or_default() += 1;
        }
        if let Some(region) = show.region.as_deref() {
            *self.regions.entry(region).or_default() += 1;
        }
        self.show_count += 1;
        self.first_show = self.first_show.min(show.date);
        self.last_show = self.last_show.max(show.date);
    }

    fn into_venue(self, key: VenueKey) -> Venue {
        Venue {
            key,
            name: most_common(&self.names).unwrap_or_default(),
            city: most_common(&self.cities),
            region: most_common(&self.regions),
            show_count: self.show_count,
            first_show: self.first_show,
            last_show: self.last_show,
        }
    }
}

/// Most frequent spelling; ties go to the lexicographically smallest.
fn most_common(counts: &BTreeMap<&str, u32>) -> Option<String> {
    counts
        .iter()
        .max_by(|(a_name, a_n), (b_name, b_n)| a_n.cmp(b_n).then_with(|| b_name.cmp(a_name)))
        .map(|(name, _)| (*name).to_string())
}

/// Groups shows by venue key. Output is ordered by key and independent of
/// input order.
pub fn group_venues(shows: &[Show]) -> Vec<Venue> {
    let mut groups: BTreeMap<&VenueKey, VenueGroup<'_>> = BTreeMap::new();
    for show in shows {
        groups
            .entry(&show.venue_key)
            .or_insert_with(|| VenueGroup::new(show.date))
            .add(show);
    }
    groups
        .into_iter()
        .map(|(key, group)| group.into_venue(key.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use setlist_core::schema::Database;
    use tempfile::TempDir;

    fn show(key: &str, date: (i32, u32, u32), venue: &str, city: &str) -> Show {
        let date = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
        Show::new(key, date, venue).with_location(Some(city.to_string()), None)
    }

    fn sample() -> Vec<Show> {
        vec![
            show("a", (1977, 5, 8), "Barton Hall", "Ithaca"),
            show("b", (1980, 5, 7), "BARTON  HALL", "ithaca"),
            show("c", (1978, 1, 1), "Barton Hall", "Ithaca"),
            show("d", (1972, 8, 27), "Old Renaissance Faire Grounds", "Veneta"),
        ]
    }

    #[test]
    fn test_group_venues_merges_spellings() {
        let venues = group_venues(&sample());
        assert_eq!(venues.len(), 2);

        let barton = &venues[0];
        assert_eq!(barton.key.as_str(), "barton hall|ithaca");
        assert_eq!(barton.name, "Barton Hall");
        assert_eq!(barton.city.as_deref(), Some("Ithaca"));
        assert_eq!(barton.show_count, 3);
        assert_eq!(barton.first_show, NaiveDate::from_ymd_opt(1977, 5, 8).unwrap());
        assert_eq!(barton.last_show, NaiveDate::from_ymd_opt(1980, 5, 7).unwrap());
    }

    #[test]
    fn test_group_venues_is_order_independent() {
        let mut reversed = sample();
        reversed.reverse();
        assert_eq!(group_venues(&sample()), group_venues(&reversed));
    }

    #[test]
    fn test_most_common_breaks_ties_lexicographically() {
        let counts = BTreeMap::from([("Winterland", 2), ("Winterland Arena", 2), ("W", 1)]);
        assert_eq!(most_common(&counts).as_deref(), Some("Winterland"));
        assert_eq!(most_common(&BTreeMap::new()), None);
    }

    #[test]
    fn test_compute_venues_replaces_and_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.db");
        {
            let mut db = Database::open(&path).unwrap();
            let writer = db.begin_import().unwrap();
            for show in sample() {
                writer.upsert_show(&show, "abc").unwrap();
            }
            writer.commit().unwrap();
        }

        let aggregator = Aggregator::new(&path);
        assert_eq!(aggregator.compute_venues().unwrap(), 2);
        let first = Database::open(&path).unwrap().list_venues().unwrap();
        assert_eq!(aggregator.compute_venues().unwrap(), 2);
        let second = Database::open(&path).unwrap().list_venues().unwrap();
        assert_eq!(first, second);
    }
}
