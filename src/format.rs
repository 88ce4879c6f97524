//! Display formatting for stopwatch values.

/// Format elapsed milliseconds as `HH:MM:SS`, or `HH:MM:SS:cc` with
/// centiseconds when `include_millis` is set.
///
/// Hours are not wrapped, so runs longer than 99 hours print more digits.
///
/// # Example
/// ```
/// use run_tracker::format_stopwatch_time;
///
/// assert_eq!(format_stopwatch_time(3_723_000, false), "01:02:03");
/// assert_eq!(format_stopwatch_time(3_723_450, true), "01:02:03:45");
/// ```
pub fn format_stopwatch_time(ms: u64, include_millis: bool) -> String {
    let hours = ms / 3_600_000;
    let minutes = ms % 3_600_000 / 60_000;
    let seconds = ms % 60_000 / 1000;

    if !include_millis {
        return format!("{:02}:{:02}:{:02}", hours, minutes, seconds);
    }

    let centis = ms % 1000 / 10;
    format!("{:02}:{:02}:{:02}:{:02}", hours, minutes, seconds, centis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero() {
        assert_eq!(format_stopwatch_time(0, false), "00:00:00");
        assert_eq!(format_stopwatch_time(0, true), "00:00:00:00");
    }

    #[test]
    fn test_components() {
        assert_eq!(format_stopwatch_time(59_999, false), "00:00:59");
        assert_eq!(format_stopwatch_time(59_999, true), "00:00:59:99");
        assert_eq!(format_stopwatch_time(61_005, true), "00:01:01:00");
        assert_eq!(format_stopwatch_time(36_000_000, false), "10:00:00");
    }

    #[test]
    fn test_long_runs_keep_all_hours() {
        assert_eq!(format_stopwatch_time(100 * 3_600_000, false), "100:00:00");
    }
}
