//! Water temperature rule
//!
//! A number counts as a temperature only with a degree marker (`°`, `deg`,
//! `degrees`) or a full unit word (`celsius`, `fahrenheit`). A bare "C" or "F"
//! after a number is too ambiguous on dive computer screens.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{char_before, parse_decimal, round_to, select, Candidate, Keywords};
use crate::types::ConfidenceTag;

static TEMPERATURE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(-?[0-9]{1,3}(?:[.,][0-9]{1,2})?)\s?(?P<marker>[°º˚]\s?|deg(?:rees)?\s?)?(?P<unit>celsius|fahrenheit|c|f)\b",
    )
    .expect("temperature pattern is valid")
});

const KEYWORDS: Keywords = Keywords {
    primary: &["water"],
    field: &["temp"],
};

/// Water temperature in degrees Celsius (rounded to 0.1) and its confidence
pub fn extract(text: &str) -> Option<(f64, ConfidenceTag)> {
    select(candidates(text))
}

pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

fn candidates(text: &str) -> Vec<Candidate<f64>> {
    TEMPERATURE_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            if matches!(char_before(text, whole.start()), Some(c) if c.is_alphanumeric() || c == '.' || c == ',')
            {
                return None;
            }

            let unit = caps.name("unit")?.as_str().to_ascii_lowercase();
            if unit.len() == 1 && caps.name("marker").is_none() {
                return None;
            }

            let value = parse_decimal(&caps[1])?;
            let celsius = if unit.starts_with('f') {
                fahrenheit_to_celsius(value)
            } else {
                value
            };

            Some(Candidate {
                value: round_to(celsius, 1),
                keyword: KEYWORDS.score(text, whole.start()),
                certainty: ConfidenceTag::High,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_celsius_forms() {
        assert_eq!(extract("27°C"), Some((27.0, ConfidenceTag::High)));
        assert_eq!(extract("27 °C"), Some((27.0, ConfidenceTag::High)));
        assert_eq!(extract("26,5 ºc"), Some((26.5, ConfidenceTag::High)));
        assert_eq!(extract("18 degrees celsius"), Some((18.0, ConfidenceTag::High)));
        assert_eq!(extract("18 Celsius"), Some((18.0, ConfidenceTag::High)));
    }

    #[test]
    fn test_fahrenheit_converted() {
        assert_eq!(extract("80°F"), Some((26.7, ConfidenceTag::High)));
        assert_eq!(extract("32 fahrenheit"), Some((0.0, ConfidenceTag::High)));
        assert_eq!(extract("79 deg F"), Some((26.1, ConfidenceTag::High)));
    }

    #[test]
    fn test_negative_temperature() {
        assert_eq!(extract("-1.5°C"), Some((-1.5, ConfidenceTag::High)));
    }

    #[test]
    fn test_bare_letter_rejected() {
        assert_eq!(extract("27 C"), None);
        assert_eq!(extract("Gas 21 F"), None);
        assert_eq!(extract("27"), None);
    }

    #[test]
    fn test_water_keyword_preferred() {
        let text = "Air 31°C  Water 24°C";
        assert_eq!(extract(text), Some((24.0, ConfidenceTag::High)));
    }

    #[test]
    fn test_conversion_formula() {
        assert_eq!(fahrenheit_to_celsius(212.0), 100.0);
        assert_eq!(fahrenheit_to_celsius(-40.0), -40.0);
    }
}
