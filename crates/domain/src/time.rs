//! Time and timestamp helpers.

use chrono::{DateTime, Utc};

/// UTC timestamp used for `last_changed`, command and state-change times.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Return `candidate`, or `floor` if the clock went backwards.
///
/// Keeps per-property timestamps non-decreasing even when the wall clock is
/// adjusted between two commits.
#[must_use]
pub fn not_before(candidate: Timestamp, floor: Option<Timestamp>) -> Timestamp {
    match floor {
        Some(floor) if floor > candidate => floor,
        _ => candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_return_current_utc_time() {
        let before = Utc::now();
        let ts = now();
        let after = Utc::now();
        assert!(ts >= before);
        assert!(ts <= after);
    }

    #[test]
    fn should_keep_candidate_when_after_floor() {
        let floor = now();
        let later = floor + chrono::Duration::seconds(1);
        assert_eq!(not_before(later, Some(floor)), later);
    }

    #[test]
    fn should_clamp_to_floor_when_clock_went_backwards() {
        let floor = now();
        let earlier = floor - chrono::Duration::seconds(5);
        assert_eq!(not_before(earlier, Some(floor)), floor);
    }

    #[test]
    fn should_keep_candidate_without_floor() {
        let ts = now();
        assert_eq!(not_before(ts, None), ts);
    }
}
