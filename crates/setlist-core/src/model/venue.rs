use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::ids::VenueKey;

/// A venue derived by grouping shows on their normalized venue key.
///
/// Venues never appear in the raw catalog. The whole set is recomputed
/// and replaced after every show import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub key: VenueKey,

    /// Display name: the most common spelling among the grouped shows.
    pub name: String,
    pub city: Option<String>,
    pub region: Option<String>,
    pub show_count: u32,
    pub first_show: NaiveDate,
    pub last_show: NaiveDate,
}

/// Build the grouping key for a venue.
///
/// Each component is lowercased and has its internal whitespace collapsed,
/// so `"Barton  Hall"` and `"barton hall"` group together. Missing location
/// parts are omitted rather than rendered as empty segments.
#[must_use]
pub fn normalize_venue_key(name: &str, city: Option<&str>, region: Option<&str>) -> VenueKey {
    let parts: Vec<String> = std::iter::once(Some(name))
        .chain([city, region])
        .flatten()
        .map(normalize_component)
        .filter(|part| !part.is_empty())
        .collect();
    VenueKey::new(parts.join("|"))
}

fn normalize_component(value: &str) -> String {
    value
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_is_case_and_whitespace_insensitive() {
        let a = normalize_venue_key("Barton Hall", Some("Ithaca"), Some("NY"));
        let b = normalize_venue_key("  barton   HALL ", Some("ithaca "), Some("ny"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "barton hall|ithaca|ny");
    }

    #[test]
    fn test_normalize_skips_missing_parts() {
        assert_eq!(
            normalize_venue_key("Fillmore West", None, Some("CA")).as_str(),
            "fillmore west|ca"
        );
        assert_eq!(
            normalize_venue_key("Winterland", Some("  "), None).as_str(),
            "winterland"
        );
    }

    #[test]
    fn test_different_cities_do_not_group() {
        let a = normalize_venue_key("Civic Center", Some("Providence"), None);
        let b = normalize_venue_key("Civic Center", Some("Hartford"), None);
        assert_ne!(a, b);
    }
}
