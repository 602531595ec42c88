//! Core domain model for the setlist catalog.
//!
//! This crate defines the catalog entities (Show, Recording, and the
//! derived Venue), the SQLite schema with its completion marker, and the
//! transactional writer used by the bootstrap importer.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod error;
pub mod model;
pub mod schema;

pub use error::{Error, Result};
