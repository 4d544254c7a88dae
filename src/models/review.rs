use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Type, prelude::FromRow};
use uuid::Uuid;

#[derive(Debug, Type, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "review_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Draft,
    Submitted,
    Acknowledged,
}

#[derive(Serialize, Debug, FromRow)]
pub struct PerformanceReview {
    pub review_id: Uuid,
    pub company_id: Uuid,
    pub reviewee_id: Uuid,
    pub reviewer_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub rating: i32,
    pub strengths: Option<String>,
    pub improvements: Option<String>,
    pub comments: Option<String>,
    pub status: ReviewStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, FromRow)]
pub struct ReviewView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub review: PerformanceReview,
    pub reviewee_name: String,
    pub reviewer_name: String,
}

#[derive(Deserialize)]
pub struct CreateReviewReq {
    pub reviewee_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub rating: i32,
    pub strengths: Option<String>,
    pub improvements: Option<String>,
    pub comments: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateReviewReq {
    pub rating: Option<i32>,
    pub strengths: Option<String>,
    pub improvements: Option<String>,
    pub comments: Option<String>,
    #[serde(default)]
    pub submit: bool,
}

#[derive(Deserialize)]
pub struct ReviewQueryParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub reviewee_id: Option<Uuid>,
    pub status: Option<ReviewStatus>,
}
