//! Maximum depth rule
//!
//! Only numbers followed by a depth unit count; a bare number is never
//! guessed to be a depth. Feet are converted to meters.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{char_before, parse_decimal, round_to, select, Candidate, Keywords};
use crate::types::ConfidenceTag;

pub const FEET_TO_METERS: f64 = 0.3048;

static DEPTH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([0-9]{1,4}(?:[.,][0-9]{1,2})?)\s?(meters|metres|meter|metre|feet|foot|ft|m)\b")
        .expect("depth pattern is valid")
});

const KEYWORDS: Keywords = Keywords {
    primary: &["max", "deepest"],
    field: &["depth"],
};

/// Depth in meters and its confidence
pub fn extract(text: &str) -> Option<(f64, ConfidenceTag)> {
    select(candidates(text))
}

fn candidates(text: &str) -> Vec<Candidate<f64>> {
    DEPTH_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            // Tail of a longer number ("12345 m", "1.25 m" matched from "25")
            // or of a time ("2:15m")
            if matches!(
                char_before(text, whole.start()),
                Some(c) if c.is_ascii_digit() || c == '.' || c == ',' || c == ':'
            ) {
                return None;
            }

            let value = parse_decimal(&caps[1])?;
            let meters = if is_feet(&caps[2]) {
                round_to(value * FEET_TO_METERS, 2)
            } else {
                value
            };

            Some(Candidate {
                value: meters,
                keyword: KEYWORDS.score(text, whole.start()),
                certainty: ConfidenceTag::High,
            })
        })
        .collect()
}

fn is_feet(unit: &str) -> bool {
    matches!(unit.to_ascii_lowercase().as_str(), "ft" | "foot" | "feet")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_units() {
        assert_eq!(extract("45.2m"), Some((45.2, ConfidenceTag::High)));
        assert_eq!(extract("45,2 m"), Some((45.2, ConfidenceTag::High)));
        assert_eq!(extract("30 meters"), Some((30.0, ConfidenceTag::High)));
        assert_eq!(extract("30 Metres"), Some((30.0, ConfidenceTag::High)));
    }

    #[test]
    fn test_feet_converted_and_rounded() {
        assert_eq!(extract("328 ft"), Some((99.97, ConfidenceTag::High)));
        assert_eq!(extract("100 FEET"), Some((30.48, ConfidenceTag::High)));
        assert_eq!(extract("1 foot"), Some((0.3, ConfidenceTag::High)));
    }

    #[test]
    fn test_bare_number_not_guessed() {
        assert_eq!(extract("Depth: 45.2"), None);
        assert_eq!(extract("45 min"), None);
        assert_eq!(extract(""), None);
    }

    #[test]
    fn test_negative_sign_ignored() {
        assert_eq!(extract("-32.5m"), Some((32.5, ConfidenceTag::High)));
    }

    #[test]
    fn test_max_keyword_beats_depth_keyword() {
        let text = "Avg depth 18.3m\nMax depth 42.0m\nSurface 2m";
        assert_eq!(extract(text), Some((42.0, ConfidenceTag::High)));
    }

    #[test]
    fn test_unique_field_keyword_is_high() {
        let text = "Deco 3m  Depth: 27m";
        assert_eq!(extract(text), Some((27.0, ConfidenceTag::High)));
    }

    #[test]
    fn test_several_without_keyword_is_medium() {
        assert_eq!(extract("12m 15m 9m"), Some((12.0, ConfidenceTag::Medium)));
    }

    #[test]
    fn test_time_followed_by_unit_is_not_depth() {
        assert_eq!(extract("2:15m"), None);
        assert_eq!(extract("Dive 2:15min  Max 18 m"), Some((18.0, ConfidenceTag::High)));
    }

    #[test]
    fn test_tied_keywords_take_first_as_medium() {
        let text = "Max 40m\nMax 38m";
        assert_eq!(extract(text), Some((40.0, ConfidenceTag::Medium)));
    }
}
