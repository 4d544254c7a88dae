use axum::{Json, extract::{Path, Query, State}, http::StatusCode};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::{
        employee::{CreateEmployeeReq, EmployeeQueryParams, EmployeeRecord, EmploymentType, UpdateEmployeeReq, next_employee_code},
        user::Role,
    },
    state::AppState,
    utils::{
        access::{HR_ROLES, ensure_in_company, in_scope, push_scope, require_role},
        auth::{CurrentUser, hash_password},
        errorhandler::AppError,
        pagination::Page,
        validation::{MAX_NAME_LEN, normalize_email, validate_password, validate_required_text},
    },
};

pub(crate) const EMPLOYEE_SELECT: &str = "SELECT e.employee_id, e.user_id, e.company_id, e.employee_code,
    u.first_name, u.last_name, u.email, u.role,
    e.department_id, d.name AS department_name,
    e.manager_id, m.first_name || ' ' || m.last_name AS manager_name,
    e.position, e.salary, e.employment_type, e.hire_date, e.status, e.created_at, e.updated_at
    FROM employees e
    JOIN users u ON u.user_id = e.user_id
    LEFT JOIN departments d ON d.department_id = e.department_id
    LEFT JOIN users m ON m.user_id = e.manager_id";

/// Fields of a new employee row, shared by direct creation and invitation
/// acceptance.
pub(crate) struct NewEmployee {
    pub user_id: Uuid,
    pub department_id: Option<Uuid>,
    pub manager_id: Option<Uuid>,
    pub position: String,
    pub salary: Option<Decimal>,
    pub employment_type: EmploymentType,
}

/// Inserts an employee row with the next free code. The company row stays
/// locked until the caller's transaction ends, so concurrent creations in
/// one company are serialised.
pub(crate) async fn insert_employee(
    conn: &mut PgConnection,
    company_id: Uuid,
    new: NewEmployee,
    hire_date: chrono::NaiveDate,
) -> Result<(Uuid, String), AppError> {
    let slug = sqlx::query_scalar::<_, String>("SELECT slug FROM companies WHERE company_id = $1 FOR UPDATE")
        .bind(company_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| AppError::from_db("company not found", e))?;

    let existing = sqlx::query_scalar::<_, String>("SELECT employee_code FROM employees WHERE company_id = $1")
        .bind(company_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AppError::from_db("Failed to assign employee code", e))?;

    let code = next_employee_code(&slug, existing.iter().map(String::as_str));

    let employee_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO employees (user_id, company_id, employee_code, department_id, manager_id, position, salary, employment_type, hire_date)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING employee_id",
    )
    .bind(new.user_id)
    .bind(company_id)
    .bind(&code)
    .bind(new.department_id)
    .bind(new.manager_id)
    .bind(&new.position)
    .bind(new.salary)
    .bind(new.employment_type)
    .bind(hire_date)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::from_db("Failed to create employee", e))?;

    Ok((employee_id, code))
}

async fn fetch_employee(pg: &PgPool, company_id: Uuid, employee_id: Uuid) -> Result<EmployeeRecord, AppError> {
    sqlx::query_as::<_, EmployeeRecord>(&format!(
        "{EMPLOYEE_SELECT} WHERE e.employee_id = $1 AND e.company_id = $2"
    ))
    .bind(employee_id)
    .bind(company_id)
    .fetch_one(pg)
    .await
    .map_err(|e| AppError::from_db("employee not found", e))
}

fn push_employee_filters(qb: &mut QueryBuilder<'_, Postgres>, user: &CurrentUser, params: &EmployeeQueryParams) {
    qb.push(" WHERE e.company_id = ").push_bind(user.company_id);
    push_scope(qb, "e.user_id", user);
    if let Some(department_id) = params.department_id {
        qb.push(" AND e.department_id = ").push_bind(department_id);
    }
    if let Some(status) = params.status {
        qb.push(" AND e.status = ").push_bind(status);
    }
    if let Some(search) = params.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = format!("%{}%", search.trim());
        qb.push(" AND (u.first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR u.last_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR u.email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR e.employee_code ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn create_employee(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateEmployeeReq>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_role(&user, HR_ROLES, "create employees")?;
    validate_required_text(&payload.first_name, "first_name", MAX_NAME_LEN)?;
    validate_required_text(&payload.last_name, "last_name", MAX_NAME_LEN)?;
    validate_required_text(&payload.position, "position", MAX_NAME_LEN)?;
    let email = normalize_email(&payload.email)?;

    let role = payload.role.unwrap_or(Role::Employee);
    if role == Role::CompanyAdmin && user.role != Role::CompanyAdmin {
        warn!("User {} attempted to create a company admin", user.user_id);
        return Err(AppError::forbidden("only a company admin can create another company admin"));
    }

    if payload.salary.is_some_and(|s| s < Decimal::ZERO) {
        return Err(AppError::validation("salary cannot be negative"));
    }

    let password_hash = match payload.password.as_deref() {
        Some(password) => {
            validate_password(password)?;
            Some(hash_password(password)?)
        }
        None => None,
    };

    if let Some(department_id) = payload.department_id {
        ensure_in_company(&state.db, "departments", "department_id", department_id, user.company_id, "department").await?;
    }
    if let Some(manager_id) = payload.manager_id {
        ensure_in_company(&state.db, "users", "user_id", manager_id, user.company_id, "manager").await?;
    }

    let mut tx = state.db.begin().await.map_err(|e| AppError::from_db("Failed to create employee", e))?;

    let user_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO users (company_id, email, password_hash, first_name, last_name, role)
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING user_id",
    )
    .bind(user.company_id)
    .bind(&email)
    .bind(&password_hash)
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(role)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::conflict("email is already registered"),
        e => AppError::from_db("Failed to create employee", e),
    })?;

    let new = NewEmployee {
        user_id,
        department_id: payload.department_id,
        manager_id: payload.manager_id,
        position: payload.position.trim().to_string(),
        salary: payload.salary,
        employment_type: payload.employment_type.unwrap_or(EmploymentType::FullTime),
    };
    let hire_date = payload.hire_date.unwrap_or_else(|| Utc::now().date_naive());
    let (employee_id, code) = insert_employee(&mut *tx, user.company_id, new, hire_date).await?;

    tx.commit().await.map_err(|e| AppError::from_db("Failed to create employee", e))?;
    info!("Employee {} ({}) created by {}", code, email, user.user_id);

    let employee = fetch_employee(&state.db, user.company_id, employee_id).await?;

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "employee": employee,
    }))))
}

pub async fn get_employees(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<EmployeeQueryParams>,
) -> Result<Json<Value>, AppError> {
    let page = Page::new(params.page, params.limit);

    let mut query_builder = QueryBuilder::<Postgres>::new(EMPLOYEE_SELECT);
    push_employee_filters(&mut query_builder, &user, &params);
    query_builder.push(" ORDER BY e.employee_code ASC");
    page.push_limit(&mut query_builder);

    let employees: Vec<EmployeeRecord> = query_builder
        .build_query_as::<EmployeeRecord>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to fetch employees", e))?
        .into_iter()
        .map(|rec| rec.redact_for(user.user_id, user.role))
        .collect();

    let mut count_builder = QueryBuilder::<Postgres>::new(
        "SELECT COUNT(*) FROM employees e JOIN users u ON u.user_id = e.user_id",
    );
    push_employee_filters(&mut count_builder, &user, &params);
    let total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to count employees", e))?;

    Ok(Json(json!({
        "success": true,
        "employees": employees,
        "pagination": page.meta(total),
    })))
}

pub async fn get_my_employee(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Value>, AppError> {
    let employee = sqlx::query_as::<_, EmployeeRecord>(&format!("{EMPLOYEE_SELECT} WHERE e.user_id = $1"))
        .bind(user.user_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("no employee record for this account", e))?;

    let monthly_salary = employee.monthly_salary();

    Ok(Json(json!({
        "success": true,
        "employee": employee,
        "monthly_salary": monthly_salary,
    })))
}

pub async fn get_employee_by_id(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(employee_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let employee = fetch_employee(&state.db, user.company_id, employee_id).await?;

    if !in_scope(&state.db, &user, employee.user_id).await? {
        warn!("User {} attempted to view employee {} outside their scope", user.user_id, employee_id);
        return Err(AppError::forbidden("you do not have permission to view this employee"));
    }

    Ok(Json(json!({
        "success": true,
        "employee": employee.redact_for(user.user_id, user.role),
    })))
}

pub async fn update_employee(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(employee_id): Path<Uuid>,
    Json(payload): Json<UpdateEmployeeReq>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, HR_ROLES, "update employees")?;

    if let Some(department_id) = payload.department_id {
        ensure_in_company(&state.db, "departments", "department_id", department_id, user.company_id, "department").await?;
    }
    if let Some(manager_id) = payload.manager_id {
        ensure_in_company(&state.db, "users", "user_id", manager_id, user.company_id, "manager").await?;
    }

    let mut query_builder = QueryBuilder::<Postgres>::new("UPDATE employees SET ");
    let mut separated = query_builder.separated(", ");
    let mut has_update = false;

    if let Some(department_id) = payload.department_id {
        separated.push("department_id = ");
        separated.push_bind_unseparated(department_id);
        has_update = true;
    }

    if let Some(manager_id) = payload.manager_id {
        separated.push("manager_id = ");
        separated.push_bind_unseparated(manager_id);
        has_update = true;
    }

    if let Some(position) = payload.position {
        validate_required_text(&position, "position", MAX_NAME_LEN)?;
        separated.push("position = ");
        separated.push_bind_unseparated(position.trim().to_string());
        has_update = true;
    }

    if let Some(salary) = payload.salary {
        if salary < Decimal::ZERO {
            return Err(AppError::validation("salary cannot be negative"));
        }
        separated.push("salary = ");
        separated.push_bind_unseparated(salary);
        has_update = true;
    }

    if let Some(employment_type) = payload.employment_type {
        separated.push("employment_type = ");
        separated.push_bind_unseparated(employment_type);
        has_update = true;
    }

    if let Some(hire_date) = payload.hire_date {
        separated.push("hire_date = ");
        separated.push_bind_unseparated(hire_date);
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

    query_builder.push(", updated_at = now() WHERE employee_id = ");
    query_builder.push_bind(employee_id);
    query_builder.push(" AND company_id = ");
    query_builder.push_bind(user.company_id);

    let result = query_builder
        .build()
        .execute(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to update employee", e))?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("employee not found"));
    }

    let employee = fetch_employee(&state.db, user.company_id, employee_id).await?;
    info!("Employee {} updated by {}", employee.employee_code, user.user_id);

    Ok(Json(json!({
        "success": true,
        "employee": employee,
    })))
}

/// Soft delete: the employee is terminated and the account deactivated.
pub async fn delete_employee(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(employee_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, HR_ROLES, "delete employees")?;

    let mut tx = state.db.begin().await.map_err(|e| AppError::from_db("Failed to delete employee", e))?;

    let target = sqlx::query_scalar::<_, Uuid>(
        "UPDATE employees SET status = 'terminated', updated_at = now()
         WHERE employee_id = $1 AND company_id = $2 RETURNING user_id",
    )
    .bind(employee_id)
    .bind(user.company_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| AppError::from_db("Failed to delete employee", e))?
    .ok_or_else(|| AppError::not_found("employee not found"))?;

    if target == user.user_id {
        return Err(AppError::bad_request("you cannot terminate your own employment"));
    }

    sqlx::query("UPDATE users SET status = 'inactive', updated_at = now() WHERE user_id = $1")
        .bind(target)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::from_db("Failed to delete employee", e))?;

    tx.commit().await.map_err(|e| AppError::from_db("Failed to delete employee", e))?;
    info!("Employee {} terminated by {}", employee_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "message": "employee terminated",
    })))
}
