pub mod ids;
pub mod recording;
pub mod show;
pub mod venue;

pub use ids::{RecordingKey, ShowKey, VenueKey};
pub use recording::{Recording, SourceType};
pub use show::Show;
pub use venue::{normalize_venue_key, Venue};
