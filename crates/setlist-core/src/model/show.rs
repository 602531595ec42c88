use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::ids::{ShowKey, VenueKey};
use crate::model::venue::normalize_venue_key;

/// A single concert, the root entity of the catalog.
///
/// Shows are immutable once imported; a later catalog refresh replaces
/// them by key rather than patching individual fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Show {
    pub key: ShowKey,
    pub date: NaiveDate,

    /// Reference to the derived venue this show rolls up into.
    pub venue_key: VenueKey,

    /// Venue name as spelled in the catalog.
    pub venue_name: String,
    pub city: Option<String>,

    /// State, province or country.
    pub region: Option<String>,

    /// Short set list summary (song titles joined with " / ").
    pub set_summary: Option<String>,
    pub song_count: u32,
}

impl Show {
    #[must_use]
    pub fn new(key: impl Into<ShowKey>, date: NaiveDate, venue_name: impl Into<String>) -> Self {
        let venue_name = venue_name.into();
        Self {
            key: key.into(),
            date,
            venue_key: normalize_venue_key(&venue_name, None, None),
            venue_name,
            city: None,
            region: None,
            set_summary: None,
            song_count: 0,
        }
    }

    /// Set the location, recomputing the venue reference.
    #[must_use]
    pub fn with_location(mut self, city: Option<String>, region: Option<String>) -> Self {
        self.venue_key = normalize_venue_key(&self.venue_name, city.as_deref(), region.as_deref());
        self.city = city;
        self.region = region;
        self
    }

    #[must_use]
    pub fn with_set_list<I, S>(mut self, songs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let titles: Vec<String> = songs
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self.song_count = u32::try_from(titles.len()).unwrap_or(u32::MAX);
        self.set_summary = if titles.is_empty() {
            None
        } else {
            Some(titles.join(" / "))
        };
        self
    }

    #[must_use]
    pub fn with_set_summary(mut self, summary: impl Into<String>) -> Self {
        self.set_summary = Some(summary.into());
        self
    }
}
