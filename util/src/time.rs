//! General time utility functions

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a duration into a number of seconds, or `None` if the nanosecond
/// count overflows.
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Get the period in seconds of a loop running at the given frequency.
///
/// Returns `None` for non-positive or non-finite frequencies.
pub fn period_s(frequency_hz: f64) -> Option<f64> {
    if frequency_hz.is_finite() && frequency_hz > 0.0 {
        Some(1.0 / frequency_hz)
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_duration_to_seconds() {
        assert_eq!(
            duration_to_seconds(chrono::Duration::milliseconds(1500)),
            Some(1.5)
        );
        assert_eq!(period_s(25.0), Some(0.04));
        assert_eq!(period_s(0.0), None);
        assert_eq!(period_s(f64::NAN), None);
    }
}
