//! Timestamp helpers.

use chrono::{DateTime, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns the current UTC time as an RFC 3339 string with microseconds.
///
/// # Examples
///
/// ```
/// use modelcar::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Milliseconds between two timestamps, clamped at zero.
#[must_use]
pub fn elapsed_ms(start: Timestamp, end: Timestamp) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_elapsed_ms() {
        let start = now_utc();
        let end = start + Duration::milliseconds(1500);
        assert_eq!(elapsed_ms(start, end), 1500);
        assert_eq!(elapsed_ms(end, start), 0);
    }
}
