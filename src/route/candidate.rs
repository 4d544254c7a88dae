use axum::{Json, extract::{Path, Query, State}, http::StatusCode};
use serde_json::{Value, json};
use sqlx::{Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use crate::{
    models::candidate::{
        Candidate, CandidateQueryParams, CandidateView, CreateCandidateReq, UpdateCandidateReq, UpdateStageReq,
    },
    state::AppState,
    utils::{
        access::{RECRUITING_ROLES, ensure_in_company, require_role},
        auth::CurrentUser,
        errorhandler::AppError,
        pagination::Page,
        validation::{MAX_NAME_LEN, MAX_TEXT_LEN, normalize_email, validate_optional_text, validate_required_text},
    },
};

const CANDIDATE_SELECT: &str = "SELECT c.*, p.title AS job_title
    FROM candidates c
    LEFT JOIN job_postings p ON p.job_posting_id = c.job_posting_id";

fn push_candidate_filters(qb: &mut QueryBuilder<'_, Postgres>, company_id: Uuid, params: &CandidateQueryParams) {
    qb.push(" WHERE c.company_id = ").push_bind(company_id);
    if let Some(stage) = params.stage {
        qb.push(" AND c.stage = ").push_bind(stage);
    }
    if let Some(job_posting_id) = params.job_posting_id {
        qb.push(" AND c.job_posting_id = ").push_bind(job_posting_id);
    }
    if let Some(search) = params.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = format!("%{}%", search.trim());
        qb.push(" AND (c.first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.last_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.email ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn create_candidate(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateCandidateReq>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_role(&user, RECRUITING_ROLES, "manage candidates")?;
    validate_required_text(&payload.first_name, "first_name", MAX_NAME_LEN)?;
    validate_required_text(&payload.last_name, "last_name", MAX_NAME_LEN)?;
    validate_optional_text(&payload.phone, "phone", 50)?;
    validate_optional_text(&payload.resume_url, "resume_url", MAX_TEXT_LEN)?;
    validate_optional_text(&payload.source, "source", MAX_NAME_LEN)?;
    validate_optional_text(&payload.notes, "notes", MAX_TEXT_LEN)?;
    let email = normalize_email(&payload.email)?;

    if let Some(job_posting_id) = payload.job_posting_id {
        ensure_in_company(&state.db, "job_postings", "job_posting_id", job_posting_id, user.company_id, "job posting").await?;
    }

    let candidate = sqlx::query_as::<_, Candidate>(
        "INSERT INTO candidates (company_id, job_posting_id, first_name, last_name, email, phone, resume_url, source, notes, created_by)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING *",
    )
    .bind(user.company_id)
    .bind(payload.job_posting_id)
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(&email)
    .bind(&payload.phone)
    .bind(&payload.resume_url)
    .bind(&payload.source)
    .bind(&payload.notes)
    .bind(user.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to create candidate", e))?;

    info!("Candidate {} added by {}", candidate.candidate_id, user.user_id);

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "candidate": candidate,
    }))))
}

pub async fn get_candidates(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<CandidateQueryParams>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, RECRUITING_ROLES, "view candidates")?;
    let page = Page::new(params.page, params.limit);

    let mut query_builder = QueryBuilder::<Postgres>::new(CANDIDATE_SELECT);
    push_candidate_filters(&mut query_builder, user.company_id, &params);
    query_builder.push(" ORDER BY c.created_at DESC");
    page.push_limit(&mut query_builder);

    let candidates = query_builder
        .build_query_as::<CandidateView>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to fetch candidates", e))?;

    let mut count_builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM candidates c");
    push_candidate_filters(&mut count_builder, user.company_id, &params);
    let total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to count candidates", e))?;

    Ok(Json(json!({
        "success": true,
        "candidates": candidates,
        "pagination": page.meta(total),
    })))
}

pub async fn get_candidate_by_id(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(candidate_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, RECRUITING_ROLES, "view candidates")?;

    let candidate = sqlx::query_as::<_, CandidateView>(&format!(
        "{CANDIDATE_SELECT} WHERE c.candidate_id = $1 AND c.company_id = $2"
    ))
    .bind(candidate_id)
    .bind(user.company_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("candidate not found", e))?;

    Ok(Json(json!({
        "success": true,
        "candidate": candidate,
    })))
}

pub async fn update_candidate(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(candidate_id): Path<Uuid>,
    Json(payload): Json<UpdateCandidateReq>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, RECRUITING_ROLES, "manage candidates")?;

    if let Some(job_posting_id) = payload.job_posting_id {
        ensure_in_company(&state.db, "job_postings", "job_posting_id", job_posting_id, user.company_id, "job posting").await?;
    }

    let mut query_builder = QueryBuilder::<Postgres>::new("UPDATE candidates SET ");
    let mut separated = query_builder.separated(", ");
    let mut has_update = false;

    if let Some(job_posting_id) = payload.job_posting_id {
        separated.push("job_posting_id = ");
        separated.push_bind_unseparated(job_posting_id);
        has_update = true;
    }

    if let Some(first_name) = payload.first_name {
        validate_required_text(&first_name, "first_name", MAX_NAME_LEN)?;
        separated.push("first_name = ");
        separated.push_bind_unseparated(first_name.trim().to_string());
        has_update = true;
    }

    if let Some(last_name) = payload.last_name {
        validate_required_text(&last_name, "last_name", MAX_NAME_LEN)?;
        separated.push("last_name = ");
        separated.push_bind_unseparated(last_name.trim().to_string());
        has_update = true;
    }

    if let Some(email) = payload.email {
        separated.push("email = ");
        separated.push_bind_unseparated(normalize_email(&email)?);
        has_update = true;
    }

    for (column, value, max_len) in [
        ("phone", payload.phone, 50),
        ("resume_url", payload.resume_url, MAX_TEXT_LEN),
        ("source", payload.source, MAX_NAME_LEN),
        ("notes", payload.notes, MAX_TEXT_LEN),
    ] {
        if let Some(value) = value {
            validate_optional_text(&Some(value.clone()), column, max_len)?;
            separated.push(format!("{column} = "));
            separated.push_bind_unseparated(value);
            has_update = true;
        }
    }

    if !has_update {
        return Err(AppError::bad_request("no parameters provided"));
    }

    query_builder.push(", updated_at = now() WHERE candidate_id = ");
    query_builder.push_bind(candidate_id);
    query_builder.push(" AND company_id = ");
    query_builder.push_bind(user.company_id);
    query_builder.push(" RETURNING *");

    let candidate = query_builder
        .build_query_as::<Candidate>()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("candidate not found", e))?;

    Ok(Json(json!({
        "success": true,
        "candidate": candidate,
    })))
}

/// Moves a candidate to any pipeline stage.
pub async fn update_candidate_stage(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(candidate_id): Path<Uuid>,
    Json(payload): Json<UpdateStageReq>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, RECRUITING_ROLES, "move candidates")?;

    let candidate = sqlx::query_as::<_, Candidate>(
        "UPDATE candidates SET stage = $1, updated_at = now() WHERE candidate_id = $2 AND company_id = $3 RETURNING *",
    )
    .bind(payload.stage)
    .bind(candidate_id)
    .bind(user.company_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("candidate not found", e))?;

    info!("Candidate {} moved to {:?} by {}", candidate_id, payload.stage, user.user_id);

    Ok(Json(json!({
        "success": true,
        "candidate": candidate,
    })))
}

pub async fn delete_candidate(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(candidate_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, RECRUITING_ROLES, "delete candidates")?;

    let result = sqlx::query("DELETE FROM candidates WHERE candidate_id = $1 AND company_id = $2")
        .bind(candidate_id)
        .bind(user.company_id)
        .execute(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to delete candidate", e))?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("candidate not found"));
    }

    info!("Candidate {} deleted by {}", candidate_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "message": "candidate deleted",
    })))
}
