use axum::{Json, extract::{Path, Query, State}, http::StatusCode};
use serde_json::{Value, json};
use sqlx::{Postgres, QueryBuilder};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::goal::{CreateGoalReq, Goal, GoalQueryParams, UpdateGoalReq, status_for_progress},
    state::AppState,
    utils::{
        access::{Scope, in_scope, is_direct_report, push_scope},
        auth::CurrentUser,
        errorhandler::AppError,
        pagination::Page,
        validation::{MAX_NAME_LEN, MAX_TEXT_LEN, validate_optional_text, validate_required_text},
    },
};

fn push_goal_filters(qb: &mut QueryBuilder<'_, Postgres>, user: &CurrentUser, params: &GoalQueryParams) {
    qb.push(" WHERE company_id = ").push_bind(user.company_id);
    push_scope(qb, "owner_id", user);
    if let Some(owner_id) = params.owner_id {
        qb.push(" AND owner_id = ").push_bind(owner_id);
    }
    if let Some(status) = params.status {
        qb.push(" AND status = ").push_bind(status);
    }
}

/// Fetches a goal the caller may see; anything else reads as missing.
async fn fetch_scoped_goal(state: &AppState, user: &CurrentUser, goal_id: Uuid) -> Result<Goal, AppError> {
    let goal = sqlx::query_as::<_, Goal>("SELECT * FROM goals WHERE goal_id = $1 AND company_id = $2")
        .bind(goal_id)
        .bind(user.company_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("goal not found", e))?;

    if !in_scope(&state.db, user, goal.owner_id).await? {
        return Err(AppError::not_found("goal not found"));
    }
    Ok(goal)
}

pub async fn create_goal(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateGoalReq>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    validate_required_text(&payload.title, "title", MAX_NAME_LEN)?;
    validate_optional_text(&payload.description, "description", MAX_TEXT_LEN)?;

    let owner_id = payload.owner_id.unwrap_or(user.user_id);
    if owner_id != user.user_id && (user.role.scope() == Scope::Own || !in_scope(&state.db, &user, owner_id).await?) {
        warn!("User {} attempted to set a goal for {}", user.user_id, owner_id);
        return Err(AppError::forbidden("you do not have permission to set goals for this user"));
    }

    let goal = sqlx::query_as::<_, Goal>(
        "INSERT INTO goals (company_id, owner_id, title, description, due_date) VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(user.company_id)
    .bind(owner_id)
    .bind(payload.title.trim())
    .bind(&payload.description)
    .bind(payload.due_date)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to create goal", e))?;

    info!("Goal {} created for {} by {}", goal.goal_id, owner_id, user.user_id);

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "goal": goal,
    }))))
}

pub async fn get_goals(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<GoalQueryParams>,
) -> Result<Json<Value>, AppError> {
    let page = Page::new(params.page, params.limit);

    let mut query_builder = QueryBuilder::<Postgres>::new("SELECT * FROM goals");
    push_goal_filters(&mut query_builder, &user, &params);
    query_builder.push(" ORDER BY due_date ASC NULLS LAST, created_at DESC");
    page.push_limit(&mut query_builder);

    let goals = query_builder
        .build_query_as::<Goal>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to fetch goals", e))?;

    let mut count_builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM goals");
    push_goal_filters(&mut count_builder, &user, &params);
    let total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to count goals", e))?;

    Ok(Json(json!({
        "success": true,
        "goals": goals,
        "pagination": page.meta(total),
    })))
}

pub async fn get_goal_by_id(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(goal_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let goal = fetch_scoped_goal(&state, &user, goal_id).await?;

    Ok(Json(json!({
        "success": true,
        "goal": goal,
    })))
}

pub async fn update_goal(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(goal_id): Path<Uuid>,
    Json(payload): Json<UpdateGoalReq>,
) -> Result<Json<Value>, AppError> {
    let current = fetch_scoped_goal(&state, &user, goal_id).await?;

    let mut query_builder = QueryBuilder::<Postgres>::new("UPDATE goals SET ");
    let mut separated = query_builder.separated(", ");
    let mut has_update = false;

    if let Some(title) = payload.title {
        validate_required_text(&title, "title", MAX_NAME_LEN)?;
        separated.push("title = ");
        separated.push_bind_unseparated(title.trim().to_string());
        has_update = true;
    }

    if let Some(description) = payload.description {
        validate_optional_text(&Some(description.clone()), "description", MAX_TEXT_LEN)?;
        separated.push("description = ");
        separated.push_bind_unseparated(description);
        has_update = true;
    }

    if let Some(due_date) = payload.due_date {
        separated.push("due_date = ");
        separated.push_bind_unseparated(due_date);
        has_update = true;
    }

    let status = match payload.progress {
        Some(progress) => {
            separated.push("progress = ");
            separated.push_bind_unseparated(progress);
            has_update = true;
            status_for_progress(progress, payload.status)?
        }
        None => payload.status,
    };

    if let Some(status) = status {
        separated.push("status = ");
        separated.push_bind_unseparated(status);
        has_update = true;
    }

    if !has_update {
        return Err(AppError::bad_request("no parameters provided"));
    }

    query_builder.push(", updated_at = now() WHERE goal_id = ");
    query_builder.push_bind(current.goal_id);
    query_builder.push(" RETURNING *");

    let goal = query_builder
        .build_query_as::<Goal>()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to update goal", e))?;

    Ok(Json(json!({
        "success": true,
        "goal": goal,
    })))
}

/// Sign-off by the owner's manager or HR.
pub async fn approve_goal(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(goal_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let current = fetch_scoped_goal(&state, &user, goal_id).await?;

    let allowed = match user.role.scope() {
        Scope::Company => current.owner_id != user.user_id,
        Scope::Team => is_direct_report(&state.db, user.user_id, current.owner_id).await?,
        Scope::Own => false,
    };
    if !allowed {
        warn!("User {} attempted to approve goal {}", user.user_id, goal_id);
        return Err(AppError::forbidden("you do not have permission to approve this goal"));
    }

    let goal = sqlx::query_as::<_, Goal>(
        "UPDATE goals SET approved_by = $1, updated_at = now() WHERE goal_id = $2 RETURNING *",
    )
    .bind(user.user_id)
    .bind(goal_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to approve goal", e))?;

    info!("Goal {} approved by {}", goal_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "goal": goal,
    })))
}

pub async fn delete_goal(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(goal_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let current = fetch_scoped_goal(&state, &user, goal_id).await?;

    if current.owner_id != user.user_id && !user.role.is_hr() {
        return Err(AppError::forbidden("only the owner or HR can delete this goal"));
    }

    sqlx::query("DELETE FROM goals WHERE goal_id = $1")
        .bind(goal_id)
        .execute(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to delete goal", e))?;

    info!("Goal {} deleted by {}", goal_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "message": "goal deleted",
    })))
}
