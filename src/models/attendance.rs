use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Type, prelude::FromRow};
use uuid::Uuid;

use crate::utils::config::AttendanceRules;

#[derive(Debug, Type, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "attendance_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    HalfDay,
    Absent,
}

#[derive(Serialize, Debug, FromRow)]
pub struct Attendance {
    pub attendance_id: Uuid,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub clock_in: DateTime<Utc>,
    pub clock_out: Option<DateTime<Utc>>,
    pub status: AttendanceStatus,
    pub work_hours: Option<f64>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, FromRow)]
pub struct AttendanceWithUser {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub attendance: Attendance,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ClockReq {
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct AttendanceQueryParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub user_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<AttendanceStatus>,
}

#[derive(Deserialize)]
pub struct UpdateAttendanceReq {
    pub clock_in: Option<DateTime<Utc>>,
    pub clock_out: Option<DateTime<Utc>>,
    pub status: Option<AttendanceStatus>,
    pub notes: Option<String>,
}

/// Status at clock-in: late once the grace period after workday start has
/// passed.
pub fn clock_in_status(clock_in: DateTime<Utc>, rules: &AttendanceRules) -> AttendanceStatus {
    let cutoff = clock_in.date_naive().and_time(rules.workday_start).and_utc()
        + Duration::minutes(rules.late_grace_minutes);
    if clock_in > cutoff {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::Present
    }
}

/// Hours between clock-in and clock-out, rounded to two decimals.
pub fn work_hours(clock_in: DateTime<Utc>, clock_out: DateTime<Utc>) -> f64 {
    let minutes = (clock_out - clock_in).num_minutes().max(0) as f64;
    (minutes / 60.0 * 100.0).round() / 100.0
}

/// Status once the day is closed: short days become half days, otherwise
/// the clock-in status stands.
pub fn clock_out_status(current: AttendanceStatus, hours: f64, rules: &AttendanceRules) -> AttendanceStatus {
    if hours < rules.half_day_hours {
        AttendanceStatus::HalfDay
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn test_clock_in_within_grace_is_present() {
        let rules = AttendanceRules::default();
        assert_eq!(clock_in_status(at(8, 30), &rules), AttendanceStatus::Present);
        assert_eq!(clock_in_status(at(9, 15), &rules), AttendanceStatus::Present);
    }

    #[test]
    fn test_clock_in_after_grace_is_late() {
        let rules = AttendanceRules::default();
        assert_eq!(clock_in_status(at(9, 16), &rules), AttendanceStatus::Late);
        assert_eq!(clock_in_status(at(13, 0), &rules), AttendanceStatus::Late);
    }

    #[test]
    fn test_work_hours() {
        assert_eq!(work_hours(at(9, 0), at(17, 30)), 8.5);
        assert_eq!(work_hours(at(9, 0), at(9, 20)), 0.33);
        assert_eq!(work_hours(at(10, 0), at(9, 0)), 0.0);
    }

    #[test]
    fn test_clock_out_status() {
        let rules = AttendanceRules::default();
        assert_eq!(clock_out_status(AttendanceStatus::Present, 3.5, &rules), AttendanceStatus::HalfDay);
        assert_eq!(clock_out_status(AttendanceStatus::Late, 8.0, &rules), AttendanceStatus::Late);
        assert_eq!(clock_out_status(AttendanceStatus::Present, 4.0, &rules), AttendanceStatus::Present);
    }
}
