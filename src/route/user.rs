use axum::{Json, extract::{Path, Query, State}};
use serde_json::{Value, json};
use sqlx::{Postgres, QueryBuilder};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::user::{Role, USER_COLUMNS, UpdateUserReq, User, UserQueryParams, UserStatus},
    state::AppState,
    utils::{
        access::{HR_ROLES, require_role},
        auth::CurrentUser,
        errorhandler::AppError,
        pagination::Page,
        validation::{MAX_NAME_LEN, validate_required_text},
    },
};

fn push_user_filters(qb: &mut QueryBuilder<'_, Postgres>, company_id: Uuid, params: &UserQueryParams) {
    qb.push(" WHERE company_id = ").push_bind(company_id);
    if let Some(role) = params.role {
        qb.push(" AND role = ").push_bind(role);
    }
    if let Some(status) = params.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(search) = params.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = format!("%{}%", search.trim());
        qb.push(" AND (first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn get_users(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<UserQueryParams>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, HR_ROLES, "list users")?;
    let page = Page::new(params.page, params.limit);

    let mut query_builder = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
    push_user_filters(&mut query_builder, user.company_id, &params);
    query_builder.push(" ORDER BY created_at DESC");
    page.push_limit(&mut query_builder);

    let users = query_builder
        .build_query_as::<User>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to fetch users", e))?;

    let mut count_builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
    push_user_filters(&mut count_builder, user.company_id, &params);
    let total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to count users", e))?;

    Ok(Json(json!({
        "success": true,
        "users": users,
        "pagination": page.meta(total),
    })))
}

pub async fn get_user_by_id(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, HR_ROLES, "view users")?;

    let found = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE user_id = $1 AND company_id = $2"
    ))
    .bind(user_id)
    .bind(user.company_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("user not found", e))?;

    Ok(Json(json!({
        "success": true,
        "user": found,
    })))
}

pub async fn update_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUserReq>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, &[Role::CompanyAdmin], "update users")?;

    if user_id == user.user_id {
        if payload.role.is_some_and(|r| r != Role::CompanyAdmin) {
            return Err(AppError::bad_request("you cannot change your own role"));
        }
        if payload.status.is_some_and(|s| s != UserStatus::Active) {
            return Err(AppError::bad_request("you cannot deactivate your own account"));
        }
    }

    let mut query_builder = QueryBuilder::<Postgres>::new("UPDATE users SET ");
    let mut separated = query_builder.separated(", ");
    let mut has_update = false;

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

    if let Some(role) = payload.role {
        separated.push("role = ");
        separated.push_bind_unseparated(role);
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

    query_builder.push(", updated_at = now() WHERE user_id = ");
    query_builder.push_bind(user_id);
    query_builder.push(" AND company_id = ");
    query_builder.push_bind(user.company_id);
    query_builder.push(format!(" RETURNING {USER_COLUMNS}"));

    let updated = query_builder
        .build_query_as::<User>()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("user not found", e))?;

    info!("User {} updated by {}", updated.user_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "user": updated,
    })))
}

/// Soft delete: the account is deactivated, its records stay.
pub async fn delete_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, &[Role::CompanyAdmin], "delete users")?;

    if user_id == user.user_id {
        warn!("Company admin {} attempted to delete their own account", user.user_id);
        return Err(AppError::bad_request("you cannot delete your own account"));
    }

    let result = sqlx::query(
        "UPDATE users SET status = 'inactive', updated_at = now() WHERE user_id = $1 AND company_id = $2",
    )
    .bind(user_id)
    .bind(user.company_id)
    .execute(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to delete user", e))?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("user not found"));
    }

    info!("User {} deactivated by {}", user_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "message": "user deactivated",
    })))
}
