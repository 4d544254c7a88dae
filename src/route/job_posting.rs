use axum::{Json, extract::{Path, Query, State}, http::StatusCode};
use serde_json::{Value, json};
use sqlx::{Postgres, QueryBuilder};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::job_posting::{
        CreateJobPostingReq, JobPosting, JobPostingQueryParams, JobPostingView, JobStatus, UpdateJobPostingReq,
        validate_salary_range,
    },
    state::AppState,
    utils::{
        access::{RECRUITING_ROLES, ensure_in_company, require_role},
        auth::CurrentUser,
        errorhandler::AppError,
        pagination::Page,
        validation::{MAX_NAME_LEN, MAX_TEXT_LEN, validate_optional_text, validate_required_text},
    },
};

const POSTING_SELECT: &str = "SELECT p.*, d.name AS department_name,
    (SELECT COUNT(*) FROM candidates c
        WHERE c.job_posting_id = p.job_posting_id AND c.company_id = p.company_id) AS candidate_count
    FROM job_postings p
    LEFT JOIN departments d ON d.department_id = p.department_id";

/// One row only when the posting belongs to the company.
const POSTING_CANDIDATES_SQL: &str = "SELECT (SELECT COUNT(*) FROM candidates c
        WHERE c.job_posting_id = p.job_posting_id AND c.company_id = p.company_id)
    FROM job_postings p WHERE p.job_posting_id = $1 AND p.company_id = $2";

fn deletion_blocked(candidates: i64) -> Option<AppError> {
    (candidates > 0).then(|| AppError::conflict(format!("job posting has {candidates} candidates; close it instead")))
}

/// Employees and managers only ever see open postings.
fn sees_all_postings(user: &CurrentUser) -> bool {
    user.role.is_recruiting()
}

fn push_posting_filters(qb: &mut QueryBuilder<'_, Postgres>, user: &CurrentUser, params: &JobPostingQueryParams) {
    qb.push(" WHERE p.company_id = ").push_bind(user.company_id);
    if !sees_all_postings(user) {
        qb.push(" AND p.status = ").push_bind(JobStatus::Open);
    } else if let Some(status) = params.status {
        qb.push(" AND p.status = ").push_bind(status);
    }
    if let Some(department_id) = params.department_id {
        qb.push(" AND p.department_id = ").push_bind(department_id);
    }
    if let Some(search) = params.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = format!("%{}%", search.trim());
        qb.push(" AND (p.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR p.description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

async fn fetch_posting(state: &AppState, user: &CurrentUser, posting_id: Uuid) -> Result<JobPostingView, AppError> {
    let posting = sqlx::query_as::<_, JobPostingView>(&format!(
        "{POSTING_SELECT} WHERE p.job_posting_id = $1 AND p.company_id = $2"
    ))
    .bind(posting_id)
    .bind(user.company_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("job posting not found", e))?;

    if !sees_all_postings(user) && posting.posting.status != JobStatus::Open {
        return Err(AppError::not_found("job posting not found"));
    }
    Ok(posting)
}

pub async fn create_job_posting(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateJobPostingReq>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_role(&user, RECRUITING_ROLES, "create job postings")?;
    validate_required_text(&payload.title, "title", MAX_NAME_LEN)?;
    validate_required_text(&payload.description, "description", MAX_TEXT_LEN)?;
    validate_optional_text(&payload.location, "location", MAX_NAME_LEN)?;
    validate_salary_range(payload.salary_min, payload.salary_max)?;

    if let Some(department_id) = payload.department_id {
        ensure_in_company(&state.db, "departments", "department_id", department_id, user.company_id, "department").await?;
    }

    let posting = sqlx::query_as::<_, JobPosting>(
        "INSERT INTO job_postings (company_id, department_id, title, description, location, employment_type, salary_min, salary_max, status, posted_by)
         VALUES ($1, $2, $3, $4, $5, COALESCE($6, 'full_time'::employment_type), $7, $8, COALESCE($9, 'draft'::job_status), $10)
         RETURNING *",
    )
    .bind(user.company_id)
    .bind(payload.department_id)
    .bind(payload.title.trim())
    .bind(&payload.description)
    .bind(&payload.location)
    .bind(payload.employment_type)
    .bind(payload.salary_min)
    .bind(payload.salary_max)
    .bind(payload.status)
    .bind(user.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to create job posting", e))?;

    info!("Job posting {} created by {}", posting.job_posting_id, user.user_id);

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "job_posting": posting,
    }))))
}

pub async fn get_job_postings(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<JobPostingQueryParams>,
) -> Result<Json<Value>, AppError> {
    let page = Page::new(params.page, params.limit);

    let mut query_builder = QueryBuilder::<Postgres>::new(POSTING_SELECT);
    push_posting_filters(&mut query_builder, &user, &params);
    query_builder.push(" ORDER BY p.created_at DESC");
    page.push_limit(&mut query_builder);

    let postings = query_builder
        .build_query_as::<JobPostingView>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to fetch job postings", e))?;

    let mut count_builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM job_postings p");
    push_posting_filters(&mut count_builder, &user, &params);
    let total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to count job postings", e))?;

    Ok(Json(json!({
        "success": true,
        "job_postings": postings,
        "pagination": page.meta(total),
    })))
}

pub async fn get_job_posting_by_id(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(posting_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let posting = fetch_posting(&state, &user, posting_id).await?;

    Ok(Json(json!({
        "success": true,
        "job_posting": posting,
    })))
}

pub async fn update_job_posting(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(posting_id): Path<Uuid>,
    Json(payload): Json<UpdateJobPostingReq>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, RECRUITING_ROLES, "update job postings")?;

    let current = fetch_posting(&state, &user, posting_id).await?.posting;
    validate_salary_range(
        payload.salary_min.or(current.salary_min),
        payload.salary_max.or(current.salary_max),
    )?;

    if let Some(department_id) = payload.department_id {
        ensure_in_company(&state.db, "departments", "department_id", department_id, user.company_id, "department").await?;
    }

    let mut query_builder = QueryBuilder::<Postgres>::new("UPDATE job_postings SET ");
    let mut separated = query_builder.separated(", ");
    let mut has_update = false;

    if let Some(title) = payload.title {
        validate_required_text(&title, "title", MAX_NAME_LEN)?;
        separated.push("title = ");
        separated.push_bind_unseparated(title.trim().to_string());
        has_update = true;
    }

    if let Some(description) = payload.description {
        validate_required_text(&description, "description", MAX_TEXT_LEN)?;
        separated.push("description = ");
        separated.push_bind_unseparated(description);
        has_update = true;
    }

    if let Some(department_id) = payload.department_id {
        separated.push("department_id = ");
        separated.push_bind_unseparated(department_id);
        has_update = true;
    }

    if let Some(location) = payload.location {
        validate_optional_text(&Some(location.clone()), "location", MAX_NAME_LEN)?;
        separated.push("location = ");
        separated.push_bind_unseparated(location);
        has_update = true;
    }

    if let Some(employment_type) = payload.employment_type {
        separated.push("employment_type = ");
        separated.push_bind_unseparated(employment_type);
        has_update = true;
    }

    if let Some(salary_min) = payload.salary_min {
        separated.push("salary_min = ");
        separated.push_bind_unseparated(salary_min);
        has_update = true;
    }

    if let Some(salary_max) = payload.salary_max {
        separated.push("salary_max = ");
        separated.push_bind_unseparated(salary_max);
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

    query_builder.push(", updated_at = now() WHERE job_posting_id = ");
    query_builder.push_bind(posting_id);
    query_builder.push(" AND company_id = ");
    query_builder.push_bind(user.company_id);
    query_builder.push(" RETURNING *");

    let posting = query_builder
        .build_query_as::<JobPosting>()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("job posting not found", e))?;

    Ok(Json(json!({
        "success": true,
        "job_posting": posting,
    })))
}

/// Hard delete, refused while candidates still reference the posting.
pub async fn delete_job_posting(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(posting_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, RECRUITING_ROLES, "delete job postings")?;

    let candidates = sqlx::query_scalar::<_, Option<i64>>(POSTING_CANDIDATES_SQL)
        .bind(posting_id)
        .bind(user.company_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to delete job posting", e))?
        .ok_or_else(|| AppError::not_found("job posting not found"))?
        .unwrap_or(0);

    if let Some(err) = deletion_blocked(candidates) {
        warn!("Refused to delete job posting {} with {} candidates", posting_id, candidates);
        return Err(err);
    }

    let result = sqlx::query("DELETE FROM job_postings WHERE job_posting_id = $1 AND company_id = $2")
        .bind(posting_id)
        .bind(user.company_id)
        .execute(&state.db)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                AppError::conflict("job posting has candidates; close it instead")
            }
            e => AppError::from_db("Failed to delete job posting", e),
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("job posting not found"));
    }

    info!("Job posting {} deleted by {}", posting_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "message": "job posting deleted",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_count_is_scoped_to_company() {
        assert!(POSTING_CANDIDATES_SQL.contains("p.company_id = $2"));
        assert!(POSTING_CANDIDATES_SQL.contains("c.company_id = p.company_id"));
        assert!(POSTING_SELECT.contains("c.company_id = p.company_id"));
    }

    #[test]
    fn test_postings_with_candidates_are_not_deleted() {
        assert!(deletion_blocked(0).is_none());
        let err = deletion_blocked(3).unwrap();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "Conflict: job posting has 3 candidates; close it instead");
    }
}
