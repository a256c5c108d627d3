//! Utility functions for identifiers, digests, names and timestamps.

mod ids;
mod names;
pub mod timestamps;

pub use ids::{generate_run_id, generate_uuid, hash_parameters, sha256_hex};
pub use names::is_valid_identifier;
pub use timestamps::{elapsed_ms, iso_timestamp, now_utc, Timestamp};
