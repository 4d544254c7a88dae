use axum::{Json, extract::{Path, Query, State}, http::StatusCode};
use serde_json::{Value, json};
use sqlx::{Postgres, QueryBuilder};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::interview::{
        CreateInterviewReq, Interview, InterviewFeedbackReq, InterviewQueryParams, InterviewStatus, InterviewView,
        UpdateInterviewReq,
    },
    state::AppState,
    utils::{
        access::{RECRUITING_ROLES, ensure_in_company, require_role},
        auth::CurrentUser,
        errorhandler::AppError,
        pagination::Page,
        validation::{MAX_TEXT_LEN, validate_optional_text, validate_rating},
    },
};

const INTERVIEW_SELECT: &str = "SELECT i.*,
    c.first_name || ' ' || c.last_name AS candidate_name,
    u.first_name || ' ' || u.last_name AS interviewer_name
    FROM interviews i
    JOIN candidates c ON c.candidate_id = i.candidate_id
    JOIN users u ON u.user_id = i.interviewer_id";

fn validate_duration(minutes: i32) -> Result<(), AppError> {
    if !(5..=480).contains(&minutes) {
        return Err(AppError::validation("duration_minutes must be between 5 and 480"));
    }
    Ok(())
}

fn push_interview_filters(qb: &mut QueryBuilder<'_, Postgres>, user: &CurrentUser, params: &InterviewQueryParams) {
    qb.push(" WHERE i.company_id = ").push_bind(user.company_id);
    if !user.role.is_recruiting() {
        qb.push(" AND i.interviewer_id = ").push_bind(user.user_id);
    }
    if let Some(candidate_id) = params.candidate_id {
        qb.push(" AND i.candidate_id = ").push_bind(candidate_id);
    }
    if let Some(status) = params.status {
        qb.push(" AND i.status = ").push_bind(status);
    }
}

pub async fn create_interview(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateInterviewReq>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_role(&user, RECRUITING_ROLES, "schedule interviews")?;
    let duration = payload.duration_minutes.unwrap_or(60);
    validate_duration(duration)?;

    ensure_in_company(&state.db, "candidates", "candidate_id", payload.candidate_id, user.company_id, "candidate").await?;
    ensure_in_company(&state.db, "users", "user_id", payload.interviewer_id, user.company_id, "interviewer").await?;

    let interview = sqlx::query_as::<_, Interview>(
        "INSERT INTO interviews (company_id, candidate_id, interviewer_id, scheduled_at, duration_minutes, interview_type)
         VALUES ($1, $2, $3, $4, $5, COALESCE($6, 'video'::interview_type)) RETURNING *",
    )
    .bind(user.company_id)
    .bind(payload.candidate_id)
    .bind(payload.interviewer_id)
    .bind(payload.scheduled_at)
    .bind(duration)
    .bind(payload.interview_type)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to schedule interview", e))?;

    info!("Interview {} scheduled by {}", interview.interview_id, user.user_id);

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "interview": interview,
    }))))
}

pub async fn get_interviews(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<InterviewQueryParams>,
) -> Result<Json<Value>, AppError> {
    let page = Page::new(params.page, params.limit);

    let mut query_builder = QueryBuilder::<Postgres>::new(INTERVIEW_SELECT);
    push_interview_filters(&mut query_builder, &user, &params);
    query_builder.push(" ORDER BY i.scheduled_at ASC");
    page.push_limit(&mut query_builder);

    let interviews = query_builder
        .build_query_as::<InterviewView>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to fetch interviews", e))?;

    let mut count_builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM interviews i");
    push_interview_filters(&mut count_builder, &user, &params);
    let total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to count interviews", e))?;

    Ok(Json(json!({
        "success": true,
        "interviews": interviews,
        "pagination": page.meta(total),
    })))
}

pub async fn get_interview_by_id(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(interview_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let interview = sqlx::query_as::<_, InterviewView>(&format!(
        "{INTERVIEW_SELECT} WHERE i.interview_id = $1 AND i.company_id = $2"
    ))
    .bind(interview_id)
    .bind(user.company_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("interview not found", e))?;

    if !user.role.is_recruiting() && interview.interview.interviewer_id != user.user_id {
        return Err(AppError::not_found("interview not found"));
    }

    Ok(Json(json!({
        "success": true,
        "interview": interview,
    })))
}

pub async fn update_interview(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(interview_id): Path<Uuid>,
    Json(payload): Json<UpdateInterviewReq>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, RECRUITING_ROLES, "reschedule interviews")?;

    if let Some(interviewer_id) = payload.interviewer_id {
        ensure_in_company(&state.db, "users", "user_id", interviewer_id, user.company_id, "interviewer").await?;
    }

    let mut query_builder = QueryBuilder::<Postgres>::new("UPDATE interviews SET ");
    let mut separated = query_builder.separated(", ");
    let mut has_update = false;

    if let Some(interviewer_id) = payload.interviewer_id {
        separated.push("interviewer_id = ");
        separated.push_bind_unseparated(interviewer_id);
        has_update = true;
    }

    if let Some(scheduled_at) = payload.scheduled_at {
        separated.push("scheduled_at = ");
        separated.push_bind_unseparated(scheduled_at);
        has_update = true;
    }

    if let Some(duration) = payload.duration_minutes {
        validate_duration(duration)?;
        separated.push("duration_minutes = ");
        separated.push_bind_unseparated(duration);
        has_update = true;
    }

    if let Some(interview_type) = payload.interview_type {
        separated.push("interview_type = ");
        separated.push_bind_unseparated(interview_type);
        has_update = true;
    }

    if let Some(status) = payload.status {
        separated.push("status = ");
        separated.push_bind_unseparated(status);
        has_update = true;
    }

    if !has_update {
        return Err(AppError::bad_request("no parameters provided"));
    }

    query_builder.push(", updated_at = now() WHERE interview_id = ");
    query_builder.push_bind(interview_id);
    query_builder.push(" AND company_id = ");
    query_builder.push_bind(user.company_id);
    query_builder.push(" RETURNING *");

    let interview = query_builder
        .build_query_as::<Interview>()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("interview not found", e))?;

    Ok(Json(json!({
        "success": true,
        "interview": interview,
    })))
}

/// Recorded by the interviewer or any recruiting role; completes the
/// interview.
pub async fn submit_feedback(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(interview_id): Path<Uuid>,
    Json(payload): Json<InterviewFeedbackReq>,
) -> Result<Json<Value>, AppError> {
    validate_rating(payload.rating)?;
    validate_optional_text(&payload.feedback, "feedback", MAX_TEXT_LEN)?;

    let interviewer_id = sqlx::query_scalar::<_, Uuid>(
        "SELECT interviewer_id FROM interviews WHERE interview_id = $1 AND company_id = $2",
    )
    .bind(interview_id)
    .bind(user.company_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("interview not found", e))?;

    if interviewer_id != user.user_id && !user.role.is_recruiting() {
        warn!("User {} attempted to leave feedback on interview {}", user.user_id, interview_id);
        return Err(AppError::forbidden("only the interviewer can leave feedback"));
    }

    let interview = sqlx::query_as::<_, Interview>(
        "UPDATE interviews SET rating = $1, feedback = $2, status = $3, updated_at = now()
         WHERE interview_id = $4 RETURNING *",
    )
    .bind(payload.rating)
    .bind(&payload.feedback)
    .bind(InterviewStatus::Completed)
    .bind(interview_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to record feedback", e))?;

    info!("Feedback recorded on interview {} by {}", interview_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "interview": interview,
    })))
}

pub async fn delete_interview(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(interview_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, RECRUITING_ROLES, "delete interviews")?;

    let result = sqlx::query("DELETE FROM interviews WHERE interview_id = $1 AND company_id = $2")
        .bind(interview_id)
        .bind(user.company_id)
        .execute(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to delete interview", e))?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("interview not found"));
    }

    Ok(Json(json!({
        "success": true,
        "message": "interview deleted",
    })))
}
