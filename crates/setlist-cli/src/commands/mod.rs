pub mod bootstrap;
pub mod config;
pub mod show;
pub mod status;
pub mod venues;

pub use bootstrap::{run_bootstrap, BootstrapArgs};
pub use show::show_show;
pub use status::show_status;
pub use venues::list_venues;
