//! Metric normalizer
//!
//! Parses free-form OCR/vision text into [`NormalizedMetrics`]. Each field has
//! its own rule module; all of them follow the same shape:
//!
//! 1. Find every unit- or format-qualified candidate in the text
//! 2. Score candidates by keywords found just before them on the same line
//! 3. Pick one candidate and derive its [`ConfidenceTag`]
//!
//! Normalization is total: any input, including empty or binary-looking text,
//! produces a value. Fields that cannot be found stay `None` with confidence
//! `Absent`. Nothing here reads a clock or any other hidden state.

pub mod date;
pub mod depth;
pub mod temperature;
pub mod time;

pub use date::DateOrder;

use crate::types::{ConfidenceTag, NormalizedMetrics, RawExtraction};

/// Engine confidence below this downgrades every extracted field one level
pub const LOW_ENGINE_CONFIDENCE: f32 = 0.5;

/// Characters before a candidate searched for keywords
const KEYWORD_WINDOW_CHARS: usize = 24;

/// Batch-wide hints used to resolve ambiguous values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizationContext {
    /// Day/month order seen in the other images of the same batch
    pub date_order: Option<DateOrder>,
}

impl NormalizationContext {
    /// Context for a single image with no batch to learn from
    pub fn standalone() -> Self {
        Self::default()
    }

    pub fn with_date_order(date_order: DateOrder) -> Self {
        Self {
            date_order: Some(date_order),
        }
    }

    /// Learn the majority date order from the unambiguous dates in a batch
    ///
    /// A tie (including no evidence at all) leaves the order unset.
    pub fn from_batch<'a, I>(raw_texts: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let (mut mdy, mut dmy) = (0usize, 0usize);
        for text in raw_texts {
            for vote in date::order_votes(text) {
                match vote {
                    DateOrder::MonthDayYear => mdy += 1,
                    DateOrder::DayMonthYear => dmy += 1,
                }
            }
        }

        let date_order = match mdy.cmp(&dmy) {
            std::cmp::Ordering::Greater => Some(DateOrder::MonthDayYear),
            std::cmp::Ordering::Less => Some(DateOrder::DayMonthYear),
            std::cmp::Ordering::Equal => None,
        };

        tracing::debug!(mdy, dmy, ?date_order, "Batch date order context");
        Self { date_order }
    }
}

/// Normalize one extraction
pub fn normalize(raw: &RawExtraction, ctx: &NormalizationContext) -> NormalizedMetrics {
    let mut metrics = normalize_text(&raw.source_image_id, &raw.raw_text, ctx);

    if let Some(engine_confidence) = raw.engine_confidence {
        if engine_confidence < LOW_ENGINE_CONFIDENCE {
            let fc = &mut metrics.field_confidence;
            fc.max_depth_meters = fc.max_depth_meters.downgraded();
            fc.dive_time_seconds = fc.dive_time_seconds.downgraded();
            fc.water_temperature_celsius = fc.water_temperature_celsius.downgraded();
            fc.dive_date = fc.dive_date.downgraded();
        }
    }

    tracing::debug!(
        source_image_id = %raw.source_image_id,
        engine = %raw.engine,
        depth = ?metrics.max_depth_meters,
        time = ?metrics.dive_time_seconds,
        temperature = ?metrics.water_temperature_celsius,
        date = ?metrics.dive_date,
        "Normalized extraction"
    );

    metrics
}

/// Normalize raw text directly
pub fn normalize_text(
    source_image_id: &str,
    text: &str,
    ctx: &NormalizationContext,
) -> NormalizedMetrics {
    let mut metrics = NormalizedMetrics::empty(source_image_id);

    if let Some((value, tag)) = depth::extract(text) {
        metrics.max_depth_meters = Some(value);
        metrics.field_confidence.max_depth_meters = tag;
    }
    if let Some((value, tag)) = time::extract(text) {
        metrics.dive_time_seconds = Some(value);
        metrics.field_confidence.dive_time_seconds = tag;
    }
    if let Some((value, tag)) = temperature::extract(text) {
        metrics.water_temperature_celsius = Some(value);
        metrics.field_confidence.water_temperature_celsius = tag;
    }
    if let Some((value, tag)) = date::extract(text, ctx.date_order) {
        metrics.dive_date = Some(value);
        metrics.field_confidence.dive_date = tag;
    }

    metrics
}

/// Normalize arbitrary bytes; invalid UTF-8 is replaced, never rejected
pub fn normalize_bytes(
    source_image_id: &str,
    bytes: &[u8],
    ctx: &NormalizationContext,
) -> NormalizedMetrics {
    normalize_text(source_image_id, &String::from_utf8_lossy(bytes), ctx)
}

// ============================================================================
// Candidate scoring shared by the field rules
// ============================================================================

/// How strongly the text before a candidate marks it as the wanted field
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum KeywordMatch {
    None,
    /// Names the field ("depth", "time", "date")
    Field,
    /// Names the exact reading wanted ("max", "dive time", "water")
    Primary,
}

/// Keyword lists for one field
pub(crate) struct Keywords {
    pub primary: &'static [&'static str],
    pub field: &'static [&'static str],
}

impl Keywords {
    /// Score the keyword window ending at byte offset `start`
    pub fn score(&self, text: &str, start: usize) -> KeywordMatch {
        let window = keyword_window(text, start);
        if self.primary.iter().any(|k| window.contains(k)) {
            KeywordMatch::Primary
        } else if self.field.iter().any(|k| window.contains(k)) {
            KeywordMatch::Field
        } else {
            KeywordMatch::None
        }
    }
}

/// One parsed value and where it was found
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Candidate<T> {
    pub value: T,
    pub keyword: KeywordMatch,
    /// Best confidence the rule that produced this value allows
    pub certainty: ConfidenceTag,
}

/// Pick one candidate (candidates must be in text order)
///
/// - Exactly one candidate: high
/// - Exactly one candidate with the strongest keyword: high
/// - Otherwise the first candidate with the strongest keyword: medium
///
/// The result never exceeds the candidate's own certainty.
pub(crate) fn select<T>(candidates: Vec<Candidate<T>>) -> Option<(T, ConfidenceTag)> {
    let best = candidates.iter().map(|c| c.keyword).max()?;
    let total = candidates.len();
    let at_best = candidates.iter().filter(|c| c.keyword == best).count();

    let confidence = if total == 1 || (at_best == 1 && best > KeywordMatch::None) {
        ConfidenceTag::High
    } else {
        ConfidenceTag::Medium
    };

    let chosen = candidates.into_iter().find(|c| c.keyword == best)?;
    Some((chosen.value, confidence.min(chosen.certainty)))
}

/// Take the first candidate in text order
///
/// Keywords only affect confidence: high when there is a single candidate or
/// the first one is the only candidate carrying the strongest keyword,
/// otherwise medium.
pub(crate) fn select_first<T>(candidates: Vec<Candidate<T>>) -> Option<(T, ConfidenceTag)> {
    let best = candidates.iter().map(|c| c.keyword).max()?;
    let total = candidates.len();
    let at_best = candidates.iter().filter(|c| c.keyword == best).count();

    let chosen = candidates.into_iter().next()?;
    let confidence = if total == 1 || (at_best == 1 && best > KeywordMatch::None && chosen.keyword == best) {
        ConfidenceTag::High
    } else {
        ConfidenceTag::Medium
    };

    Some((chosen.value, confidence.min(chosen.certainty)))
}

/// Lowercased text of up to [`KEYWORD_WINDOW_CHARS`] characters before `start`,
/// not crossing a line break
fn keyword_window(text: &str, start: usize) -> String {
    let before = &text[..start];
    let line = match before.rfind('\n') {
        Some(idx) => &before[idx + 1..],
        None => before,
    };
    let skip = line.chars().count().saturating_sub(KEYWORD_WINDOW_CHARS);
    line.chars().skip(skip).collect::<String>().to_lowercase()
}

/// Character immediately before byte offset `start`
pub(crate) fn char_before(text: &str, start: usize) -> Option<char> {
    text[..start].chars().next_back()
}

/// Character immediately after byte offset `end`
pub(crate) fn char_after(text: &str, end: usize) -> Option<char> {
    text[end..].chars().next()
}

/// Parse a decimal that may use a comma separator ("45,2")
pub(crate) fn parse_decimal(s: &str) -> Option<f64> {
    s.replace(',', ".").parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Round to `decimals` decimal places
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
