use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use sqlx::{Type, prelude::FromRow};
use uuid::Uuid;

use crate::utils::errorhandler::AppError;

#[derive(Debug, Type, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "leave_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl LeaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveStatus::Pending => "pending",
            LeaveStatus::Approved => "approved",
            LeaveStatus::Rejected => "rejected",
            LeaveStatus::Cancelled => "cancelled",
        }
    }

    /// Only pending requests can be approved, rejected or cancelled.
    pub fn ensure_pending(&self) -> Result<(), AppError> {
        if *self != LeaveStatus::Pending {
            return Err(AppError::bad_request(format!(
                "leave request is already {}",
                self.as_str()
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Debug, FromRow)]
pub struct LeaveType {
    pub leave_type_id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub code: String,
    pub default_days: f64,
    pub is_paid: bool,
    pub carry_forward: bool,
    pub max_carry_forward_days: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct CreateLeaveTypeReq {
    pub name: String,
    pub code: String,
    pub default_days: f64,
    pub is_paid: Option<bool>,
    pub carry_forward: Option<bool>,
    pub max_carry_forward_days: Option<f64>,
}

#[derive(Deserialize)]
pub struct UpdateLeaveTypeReq {
    pub name: Option<String>,
    pub default_days: Option<f64>,
    pub is_paid: Option<bool>,
    pub carry_forward: Option<bool>,
    pub max_carry_forward_days: Option<f64>,
    pub is_active: Option<bool>,
}

#[derive(Serialize, Debug, Clone, FromRow)]
pub struct LeaveBalance {
    pub balance_id: Uuid,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub leave_type_id: Uuid,
    pub year: i32,
    pub total_days: f64,
    pub used_days: f64,
    pub pending_days: f64,
    pub carried_forward_days: f64,
    pub updated_at: DateTime<Utc>,
}

impl LeaveBalance {
    pub fn available(&self) -> f64 {
        self.total_days + self.carried_forward_days - self.used_days - self.pending_days
    }

    /// Holds `days` as pending for a new request.
    pub fn reserve(&mut self, days: f64) -> Result<(), AppError> {
        if days > self.available() {
            return Err(AppError::bad_request(format!(
                "insufficient leave balance: {} days available, {} requested",
                self.available(),
                days
            )));
        }
        self.pending_days += days;
        Ok(())
    }

    /// Moves `days` from pending to used.
    pub fn approve(&mut self, days: f64) {
        self.pending_days = (self.pending_days - days).max(0.0);
        self.used_days += days;
    }

    /// Returns pending `days` to available (reject or cancel).
    pub fn release(&mut self, days: f64) {
        self.pending_days = (self.pending_days - days).max(0.0);
    }
}

#[derive(Serialize, Debug, FromRow)]
pub struct LeaveBalanceView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub balance: LeaveBalance,
    pub leave_type_name: String,
    pub leave_type_code: String,
}

#[derive(Deserialize)]
pub struct BalanceQueryParams {
    pub user_id: Option<Uuid>,
    pub year: Option<i32>,
}

#[derive(Deserialize)]
pub struct AllocateBalanceReq {
    pub user_id: Uuid,
    pub leave_type_id: Uuid,
    pub year: i32,
    pub total_days: f64,
    pub carried_forward_days: Option<f64>,
}

#[derive(Serialize, Debug, FromRow)]
pub struct LeaveRequest {
    pub leave_request_id: Uuid,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub leave_type_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: f64,
    pub half_day: bool,
    pub reason: Option<String>,
    pub status: LeaveStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, FromRow)]
pub struct LeaveRequestView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub request: LeaveRequest,
    pub leave_type_name: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Deserialize)]
pub struct CreateLeaveRequestReq {
    pub leave_type_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub half_day: bool,
    pub reason: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct ReviewLeaveReq {
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct LeaveRequestQueryParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<LeaveStatus>,
    pub user_id: Option<Uuid>,
}

/// Weekdays (Mon–Fri) between `start` and `end`, inclusive.
pub fn business_days(start: NaiveDate, end: NaiveDate) -> i64 {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .count() as i64
}

/// Days charged against the balance for a request.
pub fn requested_days(start: NaiveDate, end: NaiveDate, half_day: bool) -> Result<f64, AppError> {
    if end < start {
        return Err(AppError::validation("end_date must not be before start_date"));
    }
    if half_day && start != end {
        return Err(AppError::validation("a half-day leave must start and end on the same date"));
    }
    let days = business_days(start, end);
    if days == 0 {
        return Err(AppError::validation("the requested range contains no working days"));
    }
    Ok(if half_day { 0.5 } else { days as f64 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn balance(total: f64, used: f64, pending: f64, carried: f64) -> LeaveBalance {
        LeaveBalance {
            balance_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            leave_type_id: Uuid::new_v4(),
            year: 2025,
            total_days: total,
            used_days: used,
            pending_days: pending,
            carried_forward_days: carried,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_business_days_skip_weekends() {
        // 2025-03-07 is a Friday, 2025-03-10 a Monday.
        assert_eq!(business_days(date(2025, 3, 7), date(2025, 3, 10)), 2);
        assert_eq!(business_days(date(2025, 3, 10), date(2025, 3, 14)), 5);
        assert_eq!(business_days(date(2025, 3, 8), date(2025, 3, 9)), 0);
    }

    #[test]
    fn test_requested_days() {
        assert_eq!(requested_days(date(2025, 3, 10), date(2025, 3, 12), false).unwrap(), 3.0);
        assert_eq!(requested_days(date(2025, 3, 10), date(2025, 3, 10), true).unwrap(), 0.5);
        assert!(requested_days(date(2025, 3, 12), date(2025, 3, 10), false).is_err());
        assert!(requested_days(date(2025, 3, 10), date(2025, 3, 11), true).is_err());
        assert!(requested_days(date(2025, 3, 8), date(2025, 3, 9), false).is_err());
    }

    #[test]
    fn test_available_counts_carry_forward_and_pending() {
        let b = balance(20.0, 5.0, 3.0, 2.0);
        assert_eq!(b.available(), 14.0);
    }

    #[test]
    fn test_reserve_then_approve() {
        let mut b = balance(10.0, 0.0, 0.0, 0.0);
        b.reserve(4.0).unwrap();
        assert_eq!((b.pending_days, b.available()), (4.0, 6.0));
        b.approve(4.0);
        assert_eq!((b.pending_days, b.used_days, b.available()), (0.0, 4.0, 6.0));
    }

    #[test]
    fn test_reserve_then_release() {
        let mut b = balance(10.0, 2.0, 0.0, 0.0);
        b.reserve(3.0).unwrap();
        b.release(3.0);
        assert_eq!((b.pending_days, b.used_days, b.available()), (0.0, 2.0, 8.0));
    }

    #[test]
    fn test_reserve_rejects_overdraw() {
        let mut b = balance(5.0, 3.0, 1.0, 0.0);
        let err = b.reserve(2.0).unwrap_err();
        assert!(err.to_string().contains("insufficient leave balance"));
        assert_eq!(b.pending_days, 1.0);
    }

    #[test]
    fn test_only_pending_transitions() {
        assert!(LeaveStatus::Pending.ensure_pending().is_ok());
        let err = LeaveStatus::Approved.ensure_pending().unwrap_err();
        assert_eq!(err.to_string(), "Bad request: leave request is already approved");
        assert!(LeaveStatus::Cancelled.ensure_pending().is_err());
    }
}
