use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Type, prelude::FromRow};
use uuid::Uuid;

use crate::{models::employee::EmploymentType, utils::errorhandler::AppError};

#[derive(Debug, Type, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Draft,
    Open,
    OnHold,
    Closed,
}

#[derive(Serialize, Debug, FromRow)]
pub struct JobPosting {
    pub job_posting_id: Uuid,
    pub company_id: Uuid,
    pub department_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    pub employment_type: EmploymentType,
    pub salary_min: Option<Decimal>,
    pub salary_max: Option<Decimal>,
    pub status: JobStatus,
    pub posted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, FromRow)]
pub struct JobPostingView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub posting: JobPosting,
    pub department_name: Option<String>,
    pub candidate_count: i64,
}

#[derive(Deserialize)]
pub struct CreateJobPostingReq {
    pub title: String,
    pub description: String,
    pub department_id: Option<Uuid>,
    pub location: Option<String>,
    pub employment_type: Option<EmploymentType>,
    pub salary_min: Option<Decimal>,
    pub salary_max: Option<Decimal>,
    pub status: Option<JobStatus>,
}

#[derive(Deserialize)]
pub struct UpdateJobPostingReq {
    pub title: Option<String>,
    pub description: Option<String>,
    pub department_id: Option<Uuid>,
    pub location: Option<String>,
    pub employment_type: Option<EmploymentType>,
    pub salary_min: Option<Decimal>,
    pub salary_max: Option<Decimal>,
    pub status: Option<JobStatus>,
}

#[derive(Deserialize)]
pub struct JobPostingQueryParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<JobStatus>,
    pub department_id: Option<Uuid>,
    pub search: Option<String>,
}

pub fn validate_salary_range(min: Option<Decimal>, max: Option<Decimal>) -> Result<(), AppError> {
    if min.is_some_and(|m| m.is_sign_negative()) || max.is_some_and(|m| m.is_sign_negative()) {
        return Err(AppError::validation("salary must not be negative"));
    }
    if let (Some(min), Some(max)) = (min, max)
        && min > max
    {
        return Err(AppError::validation("salary_min must not exceed salary_max"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_salary_range() {
        assert!(validate_salary_range(None, None).is_ok());
        assert!(validate_salary_range(Some(Decimal::from(40_000)), Some(Decimal::from(60_000))).is_ok());
        assert!(validate_salary_range(Some(Decimal::from(70_000)), Some(Decimal::from(60_000))).is_err());
        assert!(validate_salary_range(Some(Decimal::from(-1)), None).is_err());
    }

    #[test]
    fn test_status_wire_name() {
        let status: JobStatus = serde_json::from_str("\"on_hold\"").unwrap();
        assert_eq!(status, JobStatus::OnHold);
    }
}
