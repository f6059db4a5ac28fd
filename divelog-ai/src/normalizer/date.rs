//! Dive date rule
//!
//! | Form          | Order | Confidence                  |
//! |---------------|-------|-----------------------------|
//! | `YYYY-MM-DD`  | ISO   | high                        |
//! | `DD.MM.YYYY`  | DMY   | high                        |
//! | `A/B/YYYY`    | A > 12: DMY, B > 12: MDY | high     |
//! | `A/B/YYYY`    | both ≤ 12: batch order or MDY | medium |
//!
//! Two-digit years map to 2000–2069 below 70 and 1970–1999 otherwise.
//! Calendar-invalid dates (31 June, 30 February) are discarded.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::{select, Candidate, Keywords};
use crate::types::ConfidenceTag;

/// Day/month order of slash dates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOrder {
    /// `MM/DD/YYYY`, the default when nothing else is known
    MonthDayYear,
    /// `DD/MM/YYYY`
    DayMonthYear,
}

/// Two-digit years below this are 20xx
const CENTURY_PIVOT: i32 = 70;

static ISO_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([0-9]{4})-([0-9]{1,2})-([0-9]{1,2})\b").expect("ISO date pattern is valid")
});

static DOT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([0-9]{1,2})\.([0-9]{1,2})\.([0-9]{4}|[0-9]{2})\b")
        .expect("dotted date pattern is valid")
});

static SLASH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([0-9]{1,2})/([0-9]{1,2})/([0-9]{4}|[0-9]{2})\b")
        .expect("slash date pattern is valid")
});

const KEYWORDS: Keywords = Keywords {
    primary: &["dive date"],
    field: &["date"],
};

/// Dive date and its confidence
///
/// `batch_order` resolves slash dates where both leading parts are ≤ 12.
pub fn extract(text: &str, batch_order: Option<DateOrder>) -> Option<(NaiveDate, ConfidenceTag)> {
    let mut found: Vec<(usize, Candidate<NaiveDate>)> = Vec::new();

    for caps in ISO_PATTERN.captures_iter(text) {
        if let Some((start, [y, m, d])) = numbers(&caps) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m as u32, d as u32) {
                found.push((start, candidate(text, start, date, ConfidenceTag::High)));
            }
        }
    }

    for caps in DOT_PATTERN.captures_iter(text) {
        if let Some((start, [d, m, y])) = numbers(&caps) {
            if let Some(date) = NaiveDate::from_ymd_opt(expand_year(y, &caps[3]), m as u32, d as u32) {
                found.push((start, candidate(text, start, date, ConfidenceTag::High)));
            }
        }
    }

    for caps in SLASH_PATTERN.captures_iter(text) {
        if let Some((start, [a, b, y])) = numbers(&caps) {
            let year = expand_year(y, &caps[3]);
            if let Some((date, certainty)) = resolve_slash(a as u32, b as u32, year, batch_order) {
                found.push((start, candidate(text, start, date, certainty)));
            }
        }
    }

    found.sort_by_key(|(start, _)| *start);
    select(found.into_iter().map(|(_, c)| c).collect())
}

/// Order votes cast by the unambiguous dates in `text`
///
/// Dotted dates are always day-first; slash dates vote only when one of the
/// leading parts cannot be a month.
pub fn order_votes(text: &str) -> Vec<DateOrder> {
    let mut votes = Vec::new();

    for caps in DOT_PATTERN.captures_iter(text) {
        if let Some((_, [d, m, y])) = numbers(&caps) {
            if NaiveDate::from_ymd_opt(expand_year(y, &caps[3]), m as u32, d as u32).is_some() {
                votes.push(DateOrder::DayMonthYear);
            }
        }
    }

    for caps in SLASH_PATTERN.captures_iter(text) {
        if let Some((_, [a, b, y])) = numbers(&caps) {
            let year = expand_year(y, &caps[3]);
            let order = match (a > 12, b > 12) {
                (true, false) => Some(DateOrder::DayMonthYear),
                (false, true) => Some(DateOrder::MonthDayYear),
                _ => None,
            };
            if let Some(order) = order {
                if ymd(a as u32, b as u32, year, order).is_some() {
                    votes.push(order);
                }
            }
        }
    }

    votes
}

fn resolve_slash(
    a: u32,
    b: u32,
    year: i32,
    batch_order: Option<DateOrder>,
) -> Option<(NaiveDate, ConfidenceTag)> {
    match (a > 12, b > 12) {
        (true, true) => None,
        (true, false) => ymd(a, b, year, DateOrder::DayMonthYear).map(|d| (d, ConfidenceTag::High)),
        (false, true) => ymd(a, b, year, DateOrder::MonthDayYear).map(|d| (d, ConfidenceTag::High)),
        // Same day and month reads the same either way
        (false, false) if a == b => {
            ymd(a, b, year, DateOrder::MonthDayYear).map(|d| (d, ConfidenceTag::High))
        }
        (false, false) => {
            let order = batch_order.unwrap_or(DateOrder::MonthDayYear);
            ymd(a, b, year, order).map(|d| (d, ConfidenceTag::Medium))
        }
    }
}

fn ymd(a: u32, b: u32, year: i32, order: DateOrder) -> Option<NaiveDate> {
    match order {
        DateOrder::MonthDayYear => NaiveDate::from_ymd_opt(year, a, b),
        DateOrder::DayMonthYear => NaiveDate::from_ymd_opt(year, b, a),
    }
}

fn expand_year(year: i32, raw: &str) -> i32 {
    if raw.len() == 2 {
        if year < CENTURY_PIVOT {
            2000 + year
        } else {
            1900 + year
        }
    } else {
        year
    }
}

/// Match start and the three numeric groups
fn numbers(caps: &Captures<'_>) -> Option<(usize, [i32; 3])> {
    let start = caps.get(0)?.start();
    let a = caps[1].parse().ok()?;
    let b = caps[2].parse().ok()?;
    let c = caps[3].parse().ok()?;
    Some((start, [a, b, c]))
}

fn candidate(text: &str, start: usize, date: NaiveDate, certainty: ConfidenceTag) -> Candidate<NaiveDate> {
    Candidate {
        value: date,
        keyword: KEYWORDS.score(text, start),
        certainty,
    }
}
