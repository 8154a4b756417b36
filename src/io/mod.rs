//! File collaborators around the scoring core

pub mod csv;
pub mod geo;

pub use self::csv::{read_table, write_results, write_table};
pub use self::geo::GeoLookup;
