//! Dive time rule
//!
//! Accepted forms: `H:MM:SS`, `MM:SS` and `M'SS"` (straight or typographic
//! primes). Any component of 60 or more in a minutes or seconds position
//! rejects the candidate outright. The first well-formed time in the text
//! wins; a "dive time" keyword only raises confidence.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{char_after, char_before, select_first, Candidate, Keywords};
use crate::types::ConfidenceTag;

static COLON_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]{1,3}):([0-9]{2})(?::([0-9]{2}))?").expect("colon time pattern is valid")
});

static PRIME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([0-9]{1,3})\s*['’′]\s*([0-9]{2})\s*(?:''|"|”|″)?"#)
        .expect("prime time pattern is valid")
});

const KEYWORDS: Keywords = Keywords {
    primary: &["dive time", "divetime"],
    field: &["time", "duration"],
};

/// Dive time in seconds and its confidence
pub fn extract(text: &str) -> Option<(u32, ConfidenceTag)> {
    let mut found: Vec<(usize, Candidate<u32>)> = Vec::new();

    for caps in COLON_PATTERN.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if !standalone(text, whole.start(), whole.end()) || is_clock_time(text, whole.end()) {
            continue;
        }

        let first = caps[1].parse::<u32>().ok();
        let second = caps[2].parse::<u32>().ok();
        let seconds = match (first, second, caps.get(3)) {
            (Some(h), Some(m), Some(s)) => s
                .as_str()
                .parse::<u32>()
                .ok()
                .and_then(|s| hms_to_seconds(h, m, s)),
            (Some(m), Some(s), None) => ms_to_seconds(m, s),
            _ => None,
        };

        if let Some(seconds) = seconds {
            found.push((whole.start(), candidate(text, whole.start(), seconds)));
        }
    }

    for caps in PRIME_PATTERN.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if !standalone(text, whole.start(), whole.end()) {
            continue;
        }

        let seconds = match (caps[1].parse::<u32>(), caps[2].parse::<u32>()) {
            (Ok(m), Ok(s)) => ms_to_seconds(m, s),
            _ => None,
        };

        if let Some(seconds) = seconds {
            found.push((whole.start(), candidate(text, whole.start(), seconds)));
        }
    }

    found.sort_by_key(|(start, _)| *start);
    select_first(found.into_iter().map(|(_, c)| c).collect())
}

fn candidate(text: &str, start: usize, seconds: u32) -> Candidate<u32> {
    Candidate {
        value: seconds,
        keyword: KEYWORDS.score(text, start),
        certainty: ConfidenceTag::High,
    }
}

fn ms_to_seconds(minutes: u32, seconds: u32) -> Option<u32> {
    (minutes < 60 && seconds < 60).then(|| minutes * 60 + seconds)
}

fn hms_to_seconds(hours: u32, minutes: u32, seconds: u32) -> Option<u32> {
    (minutes < 60 && seconds < 60).then(|| hours * 3600 + minutes * 60 + seconds)
}

/// Not glued to surrounding digits, words or further `:` groups
fn standalone(text: &str, start: usize, end: usize) -> bool {
    let before_ok = !matches!(
        char_before(text, start),
        Some(c) if c.is_alphanumeric() || c == '.' || c == ':' || c == ','
    );
    let after_ok = !matches!(char_after(text, end), Some(c) if c.is_ascii_digit() || c == ':');
    before_ok && after_ok
}

/// Followed by "am"/"pm": a time of day, not a duration
fn is_clock_time(text: &str, end: usize) -> bool {
    let rest = text[end..].trim_start().to_ascii_lowercase();
    rest.starts_with("am") || rest.starts_with("pm")
}
