use axum::{Json, body::Bytes, extract::{Path, Query, State}, http::StatusCode};
use chrono::{Datelike, Utc};
use serde_json::{Value, json};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::leave::{
        AllocateBalanceReq, BalanceQueryParams, CreateLeaveRequestReq, CreateLeaveTypeReq, LeaveBalance,
        LeaveBalanceView, LeaveRequest, LeaveRequestQueryParams, LeaveRequestView, LeaveStatus, LeaveType,
        ReviewLeaveReq, UpdateLeaveTypeReq, requested_days,
    },
    state::AppState,
    utils::{
        access::{HR_ROLES, Scope, in_scope, is_direct_report, push_scope, require_role},
        auth::CurrentUser,
        errorhandler::AppError,
        pagination::Page,
        validation::{MAX_NAME_LEN, MAX_TEXT_LEN, optional_body, validate_optional_text, validate_required_text},
    },
};

const REQUEST_SELECT: &str = "SELECT r.*, t.name AS leave_type_name, u.first_name, u.last_name
    FROM leave_requests r
    JOIN leave_types t ON t.leave_type_id = r.leave_type_id
    JOIN users u ON u.user_id = r.user_id";

fn validate_days(value: f64, field: &str) -> Result<(), AppError> {
    if !value.is_finite() || value < 0.0 {
        return Err(AppError::validation(format!("{field} must be zero or more")));
    }
    Ok(())
}

/// Loads the balance row for update, creating it from the type's default
/// allowance when the user has none for that year yet.
async fn lock_balance(
    conn: &mut PgConnection,
    company_id: Uuid,
    user_id: Uuid,
    leave_type_id: Uuid,
    year: i32,
) -> Result<LeaveBalance, AppError> {
    sqlx::query(
        "INSERT INTO leave_balances (company_id, user_id, leave_type_id, year, total_days)
         SELECT $1, $2, leave_type_id, $4, default_days FROM leave_types WHERE leave_type_id = $3
         ON CONFLICT (user_id, leave_type_id, year) DO NOTHING",
    )
    .bind(company_id)
    .bind(user_id)
    .bind(leave_type_id)
    .bind(year)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::from_db("Failed to prepare leave balance", e))?;

    sqlx::query_as::<_, LeaveBalance>(
        "SELECT * FROM leave_balances WHERE user_id = $1 AND leave_type_id = $2 AND year = $3 FOR UPDATE",
    )
    .bind(user_id)
    .bind(leave_type_id)
    .bind(year)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::from_db("leave balance not found", e))
}

async fn save_balance(conn: &mut PgConnection, balance: &LeaveBalance) -> Result<(), AppError> {
    sqlx::query("UPDATE leave_balances SET used_days = $1, pending_days = $2, updated_at = now() WHERE balance_id = $3")
        .bind(balance.used_days)
        .bind(balance.pending_days)
        .bind(balance.balance_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::from_db("Failed to update leave balance", e))?;
    Ok(())
}

async fn lock_request(conn: &mut PgConnection, company_id: Uuid, request_id: Uuid) -> Result<LeaveRequest, AppError> {
    sqlx::query_as::<_, LeaveRequest>(
        "SELECT * FROM leave_requests WHERE leave_request_id = $1 AND company_id = $2 FOR UPDATE",
    )
    .bind(request_id)
    .bind(company_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::from_db("leave request not found", e))
}

async fn finish_request(
    conn: &mut PgConnection,
    request_id: Uuid,
    status: LeaveStatus,
    reviewer: Option<Uuid>,
    comment: Option<String>,
) -> Result<LeaveRequest, AppError> {
    sqlx::query_as::<_, LeaveRequest>(
        "UPDATE leave_requests SET status = $1, reviewed_by = $2,
         reviewed_at = CASE WHEN $2::uuid IS NULL THEN NULL ELSE now() END,
         review_comment = $3, updated_at = now()
         WHERE leave_request_id = $4 RETURNING *",
    )
    .bind(status)
    .bind(reviewer)
    .bind(comment)
    .bind(request_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::from_db("Failed to update leave request", e))
}

// ---- leave types ----

pub async fn get_leave_types(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Value>, AppError> {
    let leave_types = sqlx::query_as::<_, LeaveType>(
        "SELECT * FROM leave_types WHERE company_id = $1 ORDER BY is_active DESC, name ASC",
    )
    .bind(user.company_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to fetch leave types", e))?;

    Ok(Json(json!({
        "success": true,
        "leave_types": leave_types,
    })))
}

pub async fn create_leave_type(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateLeaveTypeReq>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_role(&user, HR_ROLES, "manage leave types")?;
    validate_required_text(&payload.name, "name", MAX_NAME_LEN)?;
    validate_required_text(&payload.code, "code", 32)?;
    validate_days(payload.default_days, "default_days")?;
    let max_carry = payload.max_carry_forward_days.unwrap_or(0.0);
    validate_days(max_carry, "max_carry_forward_days")?;

    let leave_type = sqlx::query_as::<_, LeaveType>(
        "INSERT INTO leave_types (company_id, name, code, default_days, is_paid, carry_forward, max_carry_forward_days)
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
    )
    .bind(user.company_id)
    .bind(payload.name.trim())
    .bind(payload.code.trim().to_uppercase())
    .bind(payload.default_days)
    .bind(payload.is_paid.unwrap_or(true))
    .bind(payload.carry_forward.unwrap_or(false))
    .bind(max_carry)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::conflict("a leave type with this code already exists")
        }
        e => AppError::from_db("Failed to create leave type", e),
    })?;

    info!("Leave type {} created by {}", leave_type.code, user.user_id);

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "leave_type": leave_type,
    }))))
}

pub async fn update_leave_type(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(leave_type_id): Path<Uuid>,
    Json(payload): Json<UpdateLeaveTypeReq>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, HR_ROLES, "manage leave types")?;

    let mut query_builder = QueryBuilder::<Postgres>::new("UPDATE leave_types SET ");
    let mut separated = query_builder.separated(", ");
    let mut has_update = false;

    if let Some(name) = payload.name {
        validate_required_text(&name, "name", MAX_NAME_LEN)?;
        separated.push("name = ");
        separated.push_bind_unseparated(name.trim().to_string());
        has_update = true;
    }

    if let Some(default_days) = payload.default_days {
        validate_days(default_days, "default_days")?;
        separated.push("default_days = ");
        separated.push_bind_unseparated(default_days);
        has_update = true;
    }

    if let Some(is_paid) = payload.is_paid {
        separated.push("is_paid = ");
        separated.push_bind_unseparated(is_paid);
        has_update = true;
    }

    if let Some(carry_forward) = payload.carry_forward {
        separated.push("carry_forward = ");
        separated.push_bind_unseparated(carry_forward);
        has_update = true;
    }

    if let Some(max_carry) = payload.max_carry_forward_days {
        validate_days(max_carry, "max_carry_forward_days")?;
        separated.push("max_carry_forward_days = ");
        separated.push_bind_unseparated(max_carry);
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

    query_builder.push(", updated_at = now() WHERE leave_type_id = ");
    query_builder.push_bind(leave_type_id);
    query_builder.push(" AND company_id = ");
    query_builder.push_bind(user.company_id);
    query_builder.push(" RETURNING *");

    let leave_type = query_builder
        .build_query_as::<LeaveType>()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("leave type not found", e))?;

    Ok(Json(json!({
        "success": true,
        "leave_type": leave_type,
    })))
}

pub async fn delete_leave_type(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(leave_type_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, HR_ROLES, "manage leave types")?;

    let result = sqlx::query(
        "UPDATE leave_types SET is_active = FALSE, updated_at = now() WHERE leave_type_id = $1 AND company_id = $2",
    )
    .bind(leave_type_id)
    .bind(user.company_id)
    .execute(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to delete leave type", e))?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("leave type not found"));
    }

    Ok(Json(json!({
        "success": true,
        "message": "leave type deactivated",
    })))
}

// ---- balances ----

pub async fn get_balances(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<BalanceQueryParams>,
) -> Result<Json<Value>, AppError> {
    let target = params.user_id.unwrap_or(user.user_id);
    if !in_scope(&state.db, &user, target).await? {
        warn!("User {} attempted to view leave balances of {}", user.user_id, target);
        return Err(AppError::forbidden("you do not have permission to view these leave balances"));
    }
    let year = params.year.unwrap_or_else(|| Utc::now().year());

    let balances = sqlx::query_as::<_, LeaveBalanceView>(
        "SELECT b.*, t.name AS leave_type_name, t.code AS leave_type_code
         FROM leave_balances b JOIN leave_types t ON t.leave_type_id = b.leave_type_id
         WHERE b.company_id = $1 AND b.user_id = $2 AND b.year = $3
         ORDER BY t.name ASC",
    )
    .bind(user.company_id)
    .bind(target)
    .bind(year)
    .fetch_all(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to fetch leave balances", e))?;

    Ok(Json(json!({
        "success": true,
        "year": year,
        "balances": balances,
    })))
}

/// Sets the allowance for a user, type and year. Used and pending days are
/// left untouched.
pub async fn allocate_balance(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<AllocateBalanceReq>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, HR_ROLES, "allocate leave balances")?;
    validate_days(payload.total_days, "total_days")?;
    let carried = payload.carried_forward_days.unwrap_or(0.0);
    validate_days(carried, "carried_forward_days")?;

    let belongs = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE user_id = $1 AND company_id = $3)
            AND EXISTS(SELECT 1 FROM leave_types WHERE leave_type_id = $2 AND company_id = $3)",
    )
    .bind(payload.user_id)
    .bind(payload.leave_type_id)
    .bind(user.company_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to allocate leave balance", e))?;
    if !belongs {
        return Err(AppError::bad_request("user or leave type not found in your company"));
    }

    let balance = sqlx::query_as::<_, LeaveBalance>(
        "INSERT INTO leave_balances (company_id, user_id, leave_type_id, year, total_days, carried_forward_days)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (user_id, leave_type_id, year)
         DO UPDATE SET total_days = EXCLUDED.total_days, carried_forward_days = EXCLUDED.carried_forward_days, updated_at = now()
         RETURNING *",
    )
    .bind(user.company_id)
    .bind(payload.user_id)
    .bind(payload.leave_type_id)
    .bind(payload.year)
    .bind(payload.total_days)
    .bind(carried)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to allocate leave balance", e))?;

    info!(
        "Leave balance for user {} type {} year {} set to {} by {}",
        payload.user_id, payload.leave_type_id, payload.year, payload.total_days, user.user_id
    );

    Ok(Json(json!({
        "success": true,
        "balance": balance,
    })))
}

// ---- requests ----

pub async fn create_leave_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateLeaveRequestReq>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    validate_optional_text(&payload.reason, "reason", MAX_TEXT_LEN)?;
    let days = requested_days(payload.start_date, payload.end_date, payload.half_day)?;

    let active = sqlx::query_scalar::<_, bool>(
        "SELECT is_active FROM leave_types WHERE leave_type_id = $1 AND company_id = $2",
    )
    .bind(payload.leave_type_id)
    .bind(user.company_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to create leave request", e))?
    .ok_or_else(|| AppError::not_found("leave type not found"))?;
    if !active {
        return Err(AppError::bad_request("leave type is not active"));
    }

    let overlapping = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM leave_requests
         WHERE user_id = $1 AND status IN ('pending', 'approved')
         AND start_date <= $3 AND end_date >= $2)",
    )
    .bind(user.user_id)
    .bind(payload.start_date)
    .bind(payload.end_date)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to create leave request", e))?;
    if overlapping {
        return Err(AppError::conflict("you already have leave booked in this period"));
    }

    let mut tx = state.db.begin().await.map_err(|e| AppError::from_db("Failed to create leave request", e))?;

    let year = payload.start_date.year();
    let mut balance = lock_balance(&mut *tx, user.company_id, user.user_id, payload.leave_type_id, year).await?;
    balance.reserve(days)?;
    save_balance(&mut *tx, &balance).await?;

    let request = sqlx::query_as::<_, LeaveRequest>(
        "INSERT INTO leave_requests (company_id, user_id, leave_type_id, start_date, end_date, days, half_day, reason)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
    )
    .bind(user.company_id)
    .bind(user.user_id)
    .bind(payload.leave_type_id)
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(days)
    .bind(payload.half_day)
    .bind(&payload.reason)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| AppError::from_db("Failed to create leave request", e))?;

    tx.commit().await.map_err(|e| AppError::from_db("Failed to create leave request", e))?;
    info!("User {} requested {} days of leave ({})", user.user_id, days, request.leave_request_id);

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "leave_request": request,
        "balance": balance,
    }))))
}

fn push_request_filters(qb: &mut QueryBuilder<'_, Postgres>, user: &CurrentUser, params: &LeaveRequestQueryParams) {
    qb.push(" WHERE r.company_id = ").push_bind(user.company_id);
    push_scope(qb, "r.user_id", user);
    if let Some(status) = params.status {
        qb.push(" AND r.status = ").push_bind(status);
    }
    if let Some(user_id) = params.user_id {
        qb.push(" AND r.user_id = ").push_bind(user_id);
    }
}

pub async fn get_leave_requests(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<LeaveRequestQueryParams>,
) -> Result<Json<Value>, AppError> {
    let page = Page::new(params.page, params.limit);

    let mut query_builder = QueryBuilder::<Postgres>::new(REQUEST_SELECT);
    push_request_filters(&mut query_builder, &user, &params);
    query_builder.push(" ORDER BY r.created_at DESC");
    page.push_limit(&mut query_builder);

    let requests = query_builder
        .build_query_as::<LeaveRequestView>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to fetch leave requests", e))?;

    let mut count_builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM leave_requests r");
    push_request_filters(&mut count_builder, &user, &params);
    let total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to count leave requests", e))?;

    Ok(Json(json!({
        "success": true,
        "leave_requests": requests,
        "pagination": page.meta(total),
    })))
}

/// HR decides for the whole company, a manager for direct reports only.
/// Nobody decides on their own request.
/// Nobody decides on their own request; HR decides company-wide and a
/// manager only for direct reports.
fn review_scope(user: &CurrentUser, request: &LeaveRequest) -> Result<Scope, AppError> {
    if request.user_id == user.user_id {
        warn!("User {} attempted to review their own leave request", user.user_id);
        return Err(AppError::forbidden("you cannot review your own leave request"));
    }
    match user.role.scope() {
        Scope::Own => Err(review_denied(user, request)),
        scope => Ok(scope),
    }
}

fn review_denied(user: &CurrentUser, request: &LeaveRequest) -> AppError {
    warn!("User {} with role {} attempted to review leave request {}", user.user_id, user.role, request.leave_request_id);
    AppError::forbidden("you do not have permission to review this leave request")
}

async fn ensure_can_review(conn: &mut PgConnection, user: &CurrentUser, request: &LeaveRequest) -> Result<(), AppError> {
    if review_scope(user, request)? == Scope::Team && !is_direct_report(&mut *conn, user.user_id, request.user_id).await? {
        return Err(review_denied(user, request));
    }
    Ok(())
}

async fn review_leave_request(
    state: AppState,
    user: CurrentUser,
    request_id: Uuid,
    body: Bytes,
    decision: LeaveStatus,
) -> Result<Json<Value>, AppError> {
    let review: ReviewLeaveReq = optional_body(&body)?;
    validate_optional_text(&review.comment, "comment", MAX_TEXT_LEN)?;

    let mut tx = state.db.begin().await.map_err(|e| AppError::from_db("Failed to review leave request", e))?;

    let request = lock_request(&mut *tx, user.company_id, request_id).await?;
    ensure_can_review(&mut *tx, &user, &request).await?;
    request.status.ensure_pending()?;

    let year = request.start_date.year();
    let mut balance = lock_balance(&mut *tx, request.company_id, request.user_id, request.leave_type_id, year).await?;
    match decision {
        LeaveStatus::Approved => balance.approve(request.days),
        _ => balance.release(request.days),
    }
    save_balance(&mut *tx, &balance).await?;

    let updated = finish_request(&mut *tx, request_id, decision, Some(user.user_id), review.comment).await?;

    tx.commit().await.map_err(|e| AppError::from_db("Failed to review leave request", e))?;
    info!("Leave request {} {} by {}", request_id, decision.as_str(), user.user_id);

    Ok(Json(json!({
        "success": true,
        "leave_request": updated,
        "balance": balance,
    })))
}

pub async fn approve_leave_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(request_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    review_leave_request(state, user, request_id, body, LeaveStatus::Approved).await
}

pub async fn reject_leave_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(request_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    review_leave_request(state, user, request_id, body, LeaveStatus::Rejected).await
}

pub async fn cancel_leave_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let mut tx = state.db.begin().await.map_err(|e| AppError::from_db("Failed to cancel leave request", e))?;

    let request = lock_request(&mut *tx, user.company_id, request_id).await?;
    if request.user_id != user.user_id {
        return Err(AppError::forbidden("only the requester can cancel a leave request"));
    }
    request.status.ensure_pending()?;

    let year = request.start_date.year();
    let mut balance = lock_balance(&mut *tx, request.company_id, request.user_id, request.leave_type_id, year).await?;
    balance.release(request.days);
    save_balance(&mut *tx, &balance).await?;

    let updated = finish_request(&mut *tx, request_id, LeaveStatus::Cancelled, None, None).await?;

    tx.commit().await.map_err(|e| AppError::from_db("Failed to cancel leave request", e))?;
    info!("Leave request {} cancelled by {}", request_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "leave_request": updated,
        "balance": balance,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;

    fn user(role: Role) -> CurrentUser {
        CurrentUser {
            user_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            email: "lead@acme.io".into(),
            role,
        }
    }

    fn request_of(user_id: Uuid) -> LeaveRequest {
        let day = chrono::NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        LeaveRequest {
            leave_request_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            user_id,
            leave_type_id: Uuid::new_v4(),
            start_date: day,
            end_date: day,
            days: 1.0,
            half_day: false,
            reason: None,
            status: LeaveStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            review_comment: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_nobody_reviews_own_request() {
        let hr = user(Role::HrManager);
        let err = review_scope(&hr, &request_of(hr.user_id)).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_review_scope_by_role() {
        let request = request_of(Uuid::new_v4());
        assert_eq!(review_scope(&user(Role::CompanyAdmin), &request).unwrap(), Scope::Company);
        assert_eq!(review_scope(&user(Role::Manager), &request).unwrap(), Scope::Team);
        assert_eq!(
            review_scope(&user(Role::Employee), &request).unwrap_err().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            review_scope(&user(Role::Recruiter), &request).unwrap_err().status(),
            StatusCode::FORBIDDEN
        );
    }
}
