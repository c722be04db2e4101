use crate::config::EndDatePolicy;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Duration, Months, Utc};

/// End of a membership that starts at `start` and lasts `duration_days`.
///
/// `MonthlyAnchor` treats every 30 days as one calendar month and keeps the
/// day-of-month, clamped to the end of shorter months. Durations that are not
/// a multiple of 30 fall back to plain day arithmetic.
pub fn compute_end_date(
    start: DateTime<Utc>,
    duration_days: i32,
    policy: EndDatePolicy,
) -> AppResult<DateTime<Utc>> {
    if duration_days <= 0 {
        return Err(AppError::ValidationError(
            "Plan duration must be positive".to_string(),
        ));
    }

    let fixed = || {
        start
            .checked_add_signed(Duration::days(duration_days.into()))
            .ok_or_else(|| AppError::ValidationError("Membership end date overflows".to_string()))
    };

    match policy {
        EndDatePolicy::FixedDays => fixed(),
        EndDatePolicy::MonthlyAnchor if duration_days % 30 == 0 => {
            let months = (duration_days / 30) as u32;
            start.checked_add_months(Months::new(months)).ok_or_else(|| {
                AppError::ValidationError("Membership end date overflows".to_string())
            })
        }
        EndDatePolicy::MonthlyAnchor => fixed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_fixed_days_thirty_day_plan() {
        let end = compute_end_date(at(2025, 1, 1), 30, EndDatePolicy::FixedDays).unwrap();
        assert_eq!(end, at(2025, 1, 31));

        // 2月只有28天
        let end = compute_end_date(at(2025, 2, 1), 30, EndDatePolicy::FixedDays).unwrap();
        assert_eq!(end, at(2025, 3, 3));
    }

    #[test]
    fn test_monthly_anchor_clamps_to_month_end() {
        let end = compute_end_date(at(2025, 1, 31), 30, EndDatePolicy::MonthlyAnchor).unwrap();
        assert_eq!(end, at(2025, 2, 28));

        let end = compute_end_date(at(2025, 1, 15), 90, EndDatePolicy::MonthlyAnchor).unwrap();
        assert_eq!(end, at(2025, 4, 15));

        let end = compute_end_date(at(2024, 1, 31), 30, EndDatePolicy::MonthlyAnchor).unwrap();
        assert_eq!(end, at(2024, 2, 29));
    }

    #[test]
    fn test_monthly_anchor_falls_back_for_odd_durations() {
        let end = compute_end_date(at(2025, 1, 1), 7, EndDatePolicy::MonthlyAnchor).unwrap();
        assert_eq!(end, at(2025, 1, 8));
    }

    #[test]
    fn test_rejects_non_positive_duration() {
        assert!(compute_end_date(at(2025, 1, 1), 0, EndDatePolicy::FixedDays).is_err());
        assert!(compute_end_date(at(2025, 1, 1), -30, EndDatePolicy::MonthlyAnchor).is_err());
    }
}
