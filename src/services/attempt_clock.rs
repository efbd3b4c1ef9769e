use time::{Duration, PrimitiveDateTime};

/// Server-owned deadline for a timed attempt. `time_limit_minutes <= 0`
/// means no limit: the attempt never expires.
pub(crate) fn deadline(
    started_at: PrimitiveDateTime,
    time_limit_minutes: i32,
) -> Option<PrimitiveDateTime> {
    if time_limit_minutes <= 0 {
        return None;
    }
    Some(started_at + Duration::minutes(time_limit_minutes as i64))
}

pub(crate) fn is_expired(
    started_at: PrimitiveDateTime,
    time_limit_minutes: i32,
    now: PrimitiveDateTime,
) -> bool {
    match deadline(started_at, time_limit_minutes) {
        Some(deadline) => now >= deadline,
        None => false,
    }
}

/// `None` for untimed attempts, otherwise seconds left clamped at zero.
pub(crate) fn remaining_seconds(
    started_at: PrimitiveDateTime,
    time_limit_minutes: i32,
    now: PrimitiveDateTime,
) -> Option<i64> {
    deadline(started_at, time_limit_minutes)
        .map(|deadline| (deadline - now).whole_seconds().max(0))
}

/// Seconds until a new attempt is allowed, if the cooldown window since the
/// last finished attempt is still open.
pub(crate) fn cooldown_retry_after(
    last_finished_at: PrimitiveDateTime,
    cooldown_minutes: i32,
    now: PrimitiveDateTime,
) -> Option<i64> {
    if cooldown_minutes <= 0 {
        return None;
    }
    let until = last_finished_at + Duration::minutes(cooldown_minutes as i64);
    if now >= until {
        return None;
    }
    Some((until - now).whole_seconds().max(1))
}

pub(crate) fn score_percent(earned: f64, possible: f64) -> f64 {
    if possible <= 0.0 {
        return 0.0;
    }
    earned / possible * 100.0
}

pub(crate) fn passed(score: f64, passing_score: f64) -> bool {
    score >= passing_score
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Date, Time};

    fn at(hour: u8, minute: u8) -> PrimitiveDateTime {
        let date = Date::from_calendar_date(2025, time::Month::June, 1).unwrap();
        PrimitiveDateTime::new(date, Time::from_hms(hour, minute, 0).unwrap())
    }

    #[test]
    fn zero_limit_never_expires() {
        let started = at(9, 0);
        assert!(deadline(started, 0).is_none());
        assert!(!is_expired(started, 0, at(23, 59)));
        assert_eq!(remaining_seconds(started, 0, at(23, 59)), None);
    }

    #[test]
    fn expiry_at_and_after_deadline() {
        let started = at(9, 0);
        assert!(!is_expired(started, 30, at(9, 29)));
        assert!(is_expired(started, 30, at(9, 30)));
        assert!(is_expired(started, 30, at(11, 0)));
    }

    #[test]
    fn remaining_clamps_at_zero() {
        let started = at(9, 0);
        assert_eq!(remaining_seconds(started, 30, at(9, 10)), Some(1200));
        assert_eq!(remaining_seconds(started, 30, at(10, 0)), Some(0));
    }

    #[test]
    fn cooldown_window() {
        let finished = at(9, 0);
        assert_eq!(cooldown_retry_after(finished, 0, at(9, 1)), None);
        assert_eq!(cooldown_retry_after(finished, 15, at(9, 5)), Some(600));
        assert_eq!(cooldown_retry_after(finished, 15, at(9, 15)), None);
    }

    #[test]
    fn full_marks_score_one_hundred() {
        let score = score_percent(10.0, 10.0);
        assert_eq!(score, 100.0);
        assert!(passed(score, 80.0));
    }

    #[test]
    fn zero_possible_points_scores_zero() {
        assert_eq!(score_percent(0.0, 0.0), 0.0);
    }

    #[test]
    fn partial_score_against_passing_threshold() {
        let score = score_percent(7.0, 10.0);
        assert_eq!(score, 70.0);
        assert!(!passed(score, 80.0));
        assert!(passed(score, 70.0));
    }
}
