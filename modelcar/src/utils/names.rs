//! Name validation for stages, parameters and outputs.

use regex::Regex;
use std::sync::OnceLock;

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Returns true if `name` is a valid stage, parameter or output name.
///
/// Names are lowercase, start with a letter or digit and may contain
/// `_` and `-`. Dots are reserved as the stage/output separator.
#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(is_valid_identifier("download"));
        assert!(is_valid_identifier("model_name"));
        assert!(is_valid_identifier("upload-s3"));
        assert!(is_valid_identifier("stage2"));
        assert!(is_valid_identifier("2bit-quantize"));
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("_stage"));
        assert!(!is_valid_identifier("download.model_dir"));
        assert!(!is_valid_identifier("Upload"));
        assert!(!is_valid_identifier("with space"));
    }
}
