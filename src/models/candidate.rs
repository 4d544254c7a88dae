use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Type, prelude::FromRow};
use uuid::Uuid;

/// Pipeline stage. Any stage may follow any other; recruiters move
/// candidates freely.
#[derive(Debug, Type, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "candidate_stage", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CandidateStage {
    Applied,
    Screening,
    Interview,
    Offer,
    Hired,
    Rejected,
}

#[derive(Serialize, Debug, FromRow)]
pub struct Candidate {
    pub candidate_id: Uuid,
    pub company_id: Uuid,
    pub job_posting_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub resume_url: Option<String>,
    pub source: Option<String>,
    pub stage: CandidateStage,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, FromRow)]
pub struct CandidateView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub candidate: Candidate,
    pub job_title: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateCandidateReq {
    pub job_posting_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub resume_url: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateCandidateReq {
    pub job_posting_id: Option<Uuid>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub resume_url: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateStageReq {
    pub stage: CandidateStage,
}

#[derive(Deserialize)]
pub struct CandidateQueryParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub stage: Option<CandidateStage>,
    pub job_posting_id: Option<Uuid>,
    pub search: Option<String>,
}
