//! Deterministic retry backoff.

use chrono::Duration;

/// Delay before the given attempt number may run. Attempt 1 is immediate;
/// later attempts back off on a fixed schedule, capped at eight hours.
pub fn backoff_delay(attempt: i64) -> Duration {
    match attempt {
        i64::MIN..=1 => Duration::zero(),
        2 => Duration::minutes(5),
        3 => Duration::minutes(30),
        4 => Duration::hours(2),
        _ => Duration::hours(8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_matches_policy() {
        assert_eq!(backoff_delay(1), Duration::zero());
        assert_eq!(backoff_delay(2), Duration::minutes(5));
        assert_eq!(backoff_delay(3), Duration::minutes(30));
        assert_eq!(backoff_delay(4), Duration::hours(2));
        assert_eq!(backoff_delay(5), Duration::hours(8));
    }

    #[test]
    fn schedule_is_capped_beyond_five() {
        assert_eq!(backoff_delay(6), Duration::hours(8));
        assert_eq!(backoff_delay(50), Duration::hours(8));
    }

    #[test]
    fn nonsense_attempts_are_immediate() {
        assert_eq!(backoff_delay(0), Duration::zero());
        assert_eq!(backoff_delay(-3), Duration::zero());
    }
}
