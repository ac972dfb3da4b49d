//! Utility helpers: textual timestamp handling shared by persisted documents.
pub mod serialization;

pub use serialization::{format_timestamp, parse_timestamp, TIMESTAMP_FORMAT};
