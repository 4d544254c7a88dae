use axum::{Json, extract::{Path, Query, State}, http::StatusCode};
use serde_json::{Value, json};
use sqlx::{Postgres, QueryBuilder};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::review::{
        CreateReviewReq, PerformanceReview, ReviewQueryParams, ReviewStatus, ReviewView, UpdateReviewReq,
    },
    state::AppState,
    utils::{
        access::{REVIEWER_ROLES, Scope, ensure_in_company, is_direct_report, require_role},
        auth::CurrentUser,
        errorhandler::AppError,
        pagination::Page,
        validation::{MAX_TEXT_LEN, validate_optional_text, validate_rating},
    },
};

const REVIEW_SELECT: &str = "SELECT r.*,
    e.first_name || ' ' || e.last_name AS reviewee_name,
    v.first_name || ' ' || v.last_name AS reviewer_name
    FROM performance_reviews r
    JOIN users e ON e.user_id = r.reviewee_id
    JOIN users v ON v.user_id = r.reviewer_id";

/// Reviewers see what they wrote, reviewees see their reviews once
/// submitted, managers see their team's and HR the whole company's.
fn push_review_visibility(qb: &mut QueryBuilder<'_, Postgres>, user: &CurrentUser) {
    let scope = user.role.scope();
    if scope == Scope::Company {
        return;
    }
    qb.push(" AND (r.reviewer_id = ")
        .push_bind(user.user_id)
        .push(" OR (r.reviewee_id = ")
        .push_bind(user.user_id)
        .push(" AND r.status <> 'draft')");
    if scope == Scope::Team {
        qb.push(" OR r.reviewee_id IN (SELECT user_id FROM employees WHERE manager_id = ")
            .push_bind(user.user_id)
            .push(")");
    }
    qb.push(")");
}

fn push_review_filters(qb: &mut QueryBuilder<'_, Postgres>, user: &CurrentUser, params: &ReviewQueryParams) {
    qb.push(" WHERE r.company_id = ").push_bind(user.company_id);
    push_review_visibility(qb, user);
    if let Some(reviewee_id) = params.reviewee_id {
        qb.push(" AND r.reviewee_id = ").push_bind(reviewee_id);
    }
    if let Some(status) = params.status {
        qb.push(" AND r.status = ").push_bind(status);
    }
}

async fn fetch_review(state: &AppState, user: &CurrentUser, review_id: Uuid) -> Result<ReviewView, AppError> {
    let mut query_builder = QueryBuilder::<Postgres>::new(REVIEW_SELECT);
    query_builder.push(" WHERE r.company_id = ").push_bind(user.company_id);
    push_review_visibility(&mut query_builder, user);
    query_builder.push(" AND r.review_id = ").push_bind(review_id);

    query_builder
        .build_query_as::<ReviewView>()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("review not found", e))
}

pub async fn create_review(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateReviewReq>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_role(&user, REVIEWER_ROLES, "write performance reviews")?;
    validate_rating(payload.rating)?;
    validate_optional_text(&payload.strengths, "strengths", MAX_TEXT_LEN)?;
    validate_optional_text(&payload.improvements, "improvements", MAX_TEXT_LEN)?;
    validate_optional_text(&payload.comments, "comments", MAX_TEXT_LEN)?;

    if payload.period_start > payload.period_end {
        return Err(AppError::validation("period_start must not be after period_end"));
    }
    if payload.reviewee_id == user.user_id {
        return Err(AppError::bad_request("you cannot review yourself"));
    }

    match user.role.scope() {
        Scope::Team => {
            if !is_direct_report(&state.db, user.user_id, payload.reviewee_id).await? {
                warn!("Manager {} attempted to review non-report {}", user.user_id, payload.reviewee_id);
                return Err(AppError::forbidden("managers can only review their direct reports"));
            }
        }
        _ => {
            ensure_in_company(&state.db, "users", "user_id", payload.reviewee_id, user.company_id, "reviewee").await?;
        }
    }

    let review = sqlx::query_as::<_, PerformanceReview>(
        "INSERT INTO performance_reviews (company_id, reviewee_id, reviewer_id, period_start, period_end, rating, strengths, improvements, comments)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
    )
    .bind(user.company_id)
    .bind(payload.reviewee_id)
    .bind(user.user_id)
    .bind(payload.period_start)
    .bind(payload.period_end)
    .bind(payload.rating)
    .bind(&payload.strengths)
    .bind(&payload.improvements)
    .bind(&payload.comments)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to create review", e))?;

    info!("Review {} drafted by {} for {}", review.review_id, user.user_id, review.reviewee_id);

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "review": review,
    }))))
}

pub async fn get_reviews(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<ReviewQueryParams>,
) -> Result<Json<Value>, AppError> {
    let page = Page::new(params.page, params.limit);

    let mut query_builder = QueryBuilder::<Postgres>::new(REVIEW_SELECT);
    push_review_filters(&mut query_builder, &user, &params);
    query_builder.push(" ORDER BY r.period_end DESC, r.created_at DESC");
    page.push_limit(&mut query_builder);

    let reviews = query_builder
        .build_query_as::<ReviewView>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to fetch reviews", e))?;

    let mut count_builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM performance_reviews r");
    push_review_filters(&mut count_builder, &user, &params);
    let total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to count reviews", e))?;

    Ok(Json(json!({
        "success": true,
        "reviews": reviews,
        "pagination": page.meta(total),
    })))
}

pub async fn get_review_by_id(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(review_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let review = fetch_review(&state, &user, review_id).await?;

    Ok(Json(json!({
        "success": true,
        "review": review,
    })))
}

/// Edits a draft. `submit` finalises it for the reviewee.
pub async fn update_review(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(review_id): Path<Uuid>,
    Json(payload): Json<UpdateReviewReq>,
) -> Result<Json<Value>, AppError> {
    let current = fetch_review(&state, &user, review_id).await?.review;

    if current.reviewer_id != user.user_id {
        return Err(AppError::forbidden("only the reviewer can edit this review"));
    }
    if current.status != ReviewStatus::Draft {
        return Err(AppError::bad_request("only draft reviews can be edited"));
    }

    let mut query_builder = QueryBuilder::<Postgres>::new("UPDATE performance_reviews SET updated_at = now()");

    if let Some(rating) = payload.rating {
        validate_rating(rating)?;
        query_builder.push(", rating = ").push_bind(rating);
    }

    for (column, value) in [
        ("strengths", payload.strengths),
        ("improvements", payload.improvements),
        ("comments", payload.comments),
    ] {
        if let Some(value) = value {
            validate_optional_text(&Some(value.clone()), column, MAX_TEXT_LEN)?;
            query_builder.push(format!(", {column} = ")).push_bind(value);
        }
    }

    if payload.submit {
        query_builder
            .push(", status = ")
            .push_bind(ReviewStatus::Submitted)
            .push(", submitted_at = now()");
    }

    query_builder.push(" WHERE review_id = ").push_bind(review_id);
    query_builder.push(" AND status = 'draft' RETURNING *");

    let review = query_builder
        .build_query_as::<PerformanceReview>()
        .fetch_optional(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to update review", e))?
        .ok_or_else(|| AppError::bad_request("only draft reviews can be edited"))?;

    if payload.submit {
        info!("Review {} submitted by {}", review_id, user.user_id);
    }

    Ok(Json(json!({
        "success": true,
        "review": review,
    })))
}

pub async fn acknowledge_review(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(review_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let current = fetch_review(&state, &user, review_id).await?.review;

    if current.reviewee_id != user.user_id {
        return Err(AppError::forbidden("only the reviewee can acknowledge this review"));
    }
    if current.status != ReviewStatus::Submitted {
        return Err(AppError::bad_request("only submitted reviews can be acknowledged"));
    }

    let review = sqlx::query_as::<_, PerformanceReview>(
        "UPDATE performance_reviews SET status = $1, acknowledged_at = now(), updated_at = now()
         WHERE review_id = $2 AND status = 'submitted' RETURNING *",
    )
    .bind(ReviewStatus::Acknowledged)
    .bind(review_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to acknowledge review", e))?
    .ok_or_else(|| AppError::bad_request("only submitted reviews can be acknowledged"))?;

    info!("Review {} acknowledged by {}", review_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "review": review,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;

    fn sql_for(role: Role) -> String {
        let user = CurrentUser {
            user_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            email: "lead@acme.io".into(),
            role,
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM performance_reviews r WHERE r.company_id = ");
        qb.push_bind(user.company_id);
        push_review_visibility(&mut qb, &user);
        qb.sql().to_string()
    }

    #[test]
    fn test_hr_sees_all_reviews() {
        assert!(sql_for(Role::HrManager).ends_with("r.company_id = $1"));
    }

    #[test]
    fn test_reviewee_never_sees_drafts() {
        let sql = sql_for(Role::Employee);
        assert!(sql.contains("r.reviewer_id = $2 OR (r.reviewee_id = $3 AND r.status <> 'draft'))"), "{sql}");
    }

    #[test]
    fn test_manager_sees_team_reviews() {
        let sql = sql_for(Role::Manager);
        assert!(sql.contains("OR r.reviewee_id IN (SELECT user_id FROM employees WHERE manager_id = $4))"), "{sql}");
    }
}
