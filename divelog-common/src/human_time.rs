//! Human-readable dive time formatting
//!
//! Dive times are stored as whole seconds and shown to people as clock
//! durations. Minutes are not zero-padded; seconds always are.

const SECONDS_PER_HOUR: u32 = 3600;

/// Format a dive time for display.
///
/// - Under one hour: `M:SS`
/// - One hour or longer: `H:MM:SS`
///
/// # Examples
///
/// ```
/// use divelog_common::human_time::format_dive_time;
///
/// assert_eq!(format_dive_time(173), "2:53");
/// assert_eq!(format_dive_time(135), "2:15");
/// assert_eq!(format_dive_time(5), "0:05");
/// assert_eq!(format_dive_time(3725), "1:02:05");
/// ```
pub fn format_dive_time(seconds: u32) -> String {
    let hours = seconds / SECONDS_PER_HOUR;
    let minutes = (seconds % SECONDS_PER_HOUR) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Format an optional dive time, `None` stays `None`
pub fn format_optional_dive_time(seconds: Option<u32>) -> Option<String> {
    seconds.map(format_dive_time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes_and_seconds() {
        assert_eq!(format_dive_time(173), "2:53");
        assert_eq!(format_dive_time(60), "1:00");
        assert_eq!(format_dive_time(599), "9:59");
        assert_eq!(format_dive_time(1800), "30:00");
    }

    #[test]
    fn test_zero_and_sub_minute() {
        assert_eq!(format_dive_time(0), "0:00");
        assert_eq!(format_dive_time(9), "0:09");
    }

    #[test]
    fn test_hours() {
        assert_eq!(format_dive_time(3600), "1:00:00");
        assert_eq!(format_dive_time(3661), "1:01:01");
    }

    #[test]
    fn test_optional() {
        assert_eq!(format_optional_dive_time(None), None);
        assert_eq!(format_optional_dive_time(Some(135)), Some("2:15".to_string()));
    }
}
