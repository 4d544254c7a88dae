use axum::{Json, extract::{Path, Query, State}, http::StatusCode};
use serde_json::{Value, json};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use crate::{
    models::department::{CreateDepartmentReq, Department, DepartmentQueryParams, UpdateDepartmentReq},
    state::AppState,
    utils::{
        access::{HR_ROLES, ensure_in_company, require_role},
        auth::CurrentUser,
        errorhandler::AppError,
        pagination::Page,
        validation::{MAX_NAME_LEN, MAX_TEXT_LEN, validate_optional_text, validate_required_text},
    },
};

const DEPARTMENT_SELECT: &str = "SELECT d.department_id, d.company_id, d.name, d.description, d.head_id, d.is_active,
    (SELECT COUNT(*) FROM employees e WHERE e.department_id = d.department_id AND e.status <> 'terminated') AS employee_count,
    d.created_at, d.updated_at
    FROM departments d";

async fn fetch_department(pg: &PgPool, company_id: Uuid, department_id: Uuid) -> Result<Department, AppError> {
    sqlx::query_as::<_, Department>(&format!(
        "{DEPARTMENT_SELECT} WHERE d.department_id = $1 AND d.company_id = $2"
    ))
    .bind(department_id)
    .bind(company_id)
    .fetch_one(pg)
    .await
    .map_err(|e| AppError::from_db("department not found", e))
}

fn push_department_filters(qb: &mut QueryBuilder<'_, Postgres>, company_id: Uuid, params: &DepartmentQueryParams) {
    qb.push(" WHERE d.company_id = ").push_bind(company_id);
    if !params.include_inactive.unwrap_or(false) {
        qb.push(" AND d.is_active");
    }
    if let Some(search) = params.search.as_deref().filter(|s| !s.trim().is_empty()) {
        qb.push(" AND d.name ILIKE ").push_bind(format!("%{}%", search.trim()));
    }
}

pub async fn create_department(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateDepartmentReq>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_role(&user, HR_ROLES, "create departments")?;
    validate_required_text(&payload.name, "name", MAX_NAME_LEN)?;
    validate_optional_text(&payload.description, "description", MAX_TEXT_LEN)?;

    if let Some(head_id) = payload.head_id {
        ensure_in_company(&state.db, "users", "user_id", head_id, user.company_id, "department head").await?;
    }

    let department_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO departments (company_id, name, description, head_id) VALUES ($1, $2, $3, $4) RETURNING department_id",
    )
    .bind(user.company_id)
    .bind(payload.name.trim())
    .bind(&payload.description)
    .bind(payload.head_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::conflict("a department with this name already exists")
        }
        e => AppError::from_db("Failed to create department", e),
    })?;

    let department = fetch_department(&state.db, user.company_id, department_id).await?;
    info!("Department {} created by {}", department.name, user.user_id);

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "department": department,
    }))))
}

pub async fn get_departments(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<DepartmentQueryParams>,
) -> Result<Json<Value>, AppError> {
    let page = Page::new(params.page, params.limit);

    let mut query_builder = QueryBuilder::<Postgres>::new(DEPARTMENT_SELECT);
    push_department_filters(&mut query_builder, user.company_id, &params);
    query_builder.push(" ORDER BY d.name ASC");
    page.push_limit(&mut query_builder);

    let departments = query_builder
        .build_query_as::<Department>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to fetch departments", e))?;

    let mut count_builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM departments d");
    push_department_filters(&mut count_builder, user.company_id, &params);
    let total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to count departments", e))?;

    Ok(Json(json!({
        "success": true,
        "departments": departments,
        "pagination": page.meta(total),
    })))
}

pub async fn get_department_by_id(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(department_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let department = fetch_department(&state.db, user.company_id, department_id).await?;

    Ok(Json(json!({
        "success": true,
        "department": department,
    })))
}

pub async fn update_department(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(department_id): Path<Uuid>,
    Json(payload): Json<UpdateDepartmentReq>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, HR_ROLES, "update departments")?;

    if let Some(head_id) = payload.head_id {
        ensure_in_company(&state.db, "users", "user_id", head_id, user.company_id, "department head").await?;
    }

    let mut query_builder = QueryBuilder::<Postgres>::new("UPDATE departments SET ");
    let mut separated = query_builder.separated(", ");
    let mut has_update = false;

    if let Some(name) = payload.name {
        validate_required_text(&name, "name", MAX_NAME_LEN)?;
        separated.push("name = ");
        separated.push_bind_unseparated(name.trim().to_string());
        has_update = true;
    }

    if let Some(description) = payload.description {
        validate_optional_text(&Some(description.clone()), "description", MAX_TEXT_LEN)?;
        separated.push("description = ");
        separated.push_bind_unseparated(description);
        has_update = true;
    }

    if let Some(head_id) = payload.head_id {
        separated.push("head_id = ");
        separated.push_bind_unseparated(head_id);
        has_update = true;
    }

    if let Some(is_active) = payload.is_active {
        separated.push("is_active = ");
        separated.push_bind_unseparated(is_active);
        has_update = true;
    }

    if !has_update {
        return Err(AppError::bad_request("no parameters provided"));
    }

    query_builder.push(", updated_at = now() WHERE department_id = ");
    query_builder.push_bind(department_id);
    query_builder.push(" AND company_id = ");
    query_builder.push_bind(user.company_id);

    let result = query_builder
        .build()
        .execute(&state.db)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::conflict("a department with this name already exists")
            }
            e => AppError::from_db("Failed to update department", e),
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("department not found"));
    }

    let department = fetch_department(&state.db, user.company_id, department_id).await?;

    Ok(Json(json!({
        "success": true,
        "department": department,
    })))
}

/// Soft delete: the department is deactivated and keeps its history.
pub async fn delete_department(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(department_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, HR_ROLES, "delete departments")?;

    let result = sqlx::query(
        "UPDATE departments SET is_active = FALSE, updated_at = now() WHERE department_id = $1 AND company_id = $2",
    )
    .bind(department_id)
    .bind(user.company_id)
    .execute(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to delete department", e))?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("department not found"));
    }

    info!("Department {} deactivated by {}", department_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "message": "department deactivated",
    })))
}
