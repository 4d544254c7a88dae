use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Type, prelude::FromRow};
use uuid::Uuid;

#[derive(Debug, Type, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "interview_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InterviewType {
    Phone,
    Video,
    Onsite,
    Technical,
}

#[derive(Debug, Type, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "interview_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

#[derive(Serialize, Debug, FromRow)]
pub struct Interview {
    pub interview_id: Uuid,
    pub company_id: Uuid,
    pub candidate_id: Uuid,
    pub interviewer_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub interview_type: InterviewType,
    pub status: InterviewStatus,
    pub feedback: Option<String>,
    pub rating: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, FromRow)]
pub struct InterviewView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub interview: Interview,
    pub candidate_name: String,
    pub interviewer_name: String,
}

#[derive(Deserialize)]
pub struct CreateInterviewReq {
    pub candidate_id: Uuid,
    pub interviewer_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<i32>,
    pub interview_type: Option<InterviewType>,
}

#[derive(Deserialize)]
pub struct UpdateInterviewReq {
    pub interviewer_id: Option<Uuid>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub interview_type: Option<InterviewType>,
    pub status: Option<InterviewStatus>,
}

#[derive(Deserialize)]
pub struct InterviewFeedbackReq {
    pub rating: i32,
    pub feedback: Option<String>,
}

#[derive(Deserialize)]
pub struct InterviewQueryParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub candidate_id: Option<Uuid>,
    pub status: Option<InterviewStatus>,
}
