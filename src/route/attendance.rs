use axum::{Json, body::Bytes, extract::{Path, Query, State}, http::StatusCode};
use chrono::Utc;
use serde_json::{Value, json};
use sqlx::{Postgres, QueryBuilder};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::attendance::{
        Attendance, AttendanceQueryParams, AttendanceWithUser, ClockReq, UpdateAttendanceReq, clock_in_status,
        clock_out_status, work_hours,
    },
    state::AppState,
    utils::{
        access::{HR_ROLES, push_scope, require_role},
        auth::CurrentUser,
        errorhandler::AppError,
        pagination::Page,
        validation::{MAX_TEXT_LEN, optional_body, validate_optional_text},
    },
};

const ATTENDANCE_SELECT: &str = "SELECT a.*, u.first_name, u.last_name, u.email
    FROM attendance a JOIN users u ON u.user_id = a.user_id";

/// The open record of a user, whatever day it started on.
const OPEN_RECORD_SQL: &str =
    "SELECT * FROM attendance WHERE user_id = $1 AND clock_out IS NULL ORDER BY clock_in DESC LIMIT 1";

/// The `(user_id, date)` unique index turns a second clock-in into a 400.
fn clock_in_error(user_id: Uuid, e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            warn!("User {} attempted to clock in twice on the same day", user_id);
            AppError::bad_request("already clocked in today")
        }
        e => AppError::from_db("Failed to clock in", e),
    }
}

fn clock_body(body: &Bytes) -> Result<ClockReq, AppError> {
    let req: ClockReq = optional_body(body)?;
    validate_optional_text(&req.notes, "notes", MAX_TEXT_LEN)?;
    Ok(req)
}

fn push_attendance_filters(qb: &mut QueryBuilder<'_, Postgres>, user: &CurrentUser, params: &AttendanceQueryParams) {
    qb.push(" WHERE a.company_id = ").push_bind(user.company_id);
    push_scope(qb, "a.user_id", user);
    if let Some(user_id) = params.user_id {
        qb.push(" AND a.user_id = ").push_bind(user_id);
    }
    if let Some(from) = params.from {
        qb.push(" AND a.date >= ").push_bind(from);
    }
    if let Some(to) = params.to {
        qb.push(" AND a.date <= ").push_bind(to);
    }
    if let Some(status) = params.status {
        qb.push(" AND a.status = ").push_bind(status);
    }
}

pub async fn clock_in(
    State(state): State<AppState>,
    user: CurrentUser,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let req = clock_body(&body)?;
    let now = Utc::now();
    let status = clock_in_status(now, &state.config.attendance);

    let attendance = sqlx::query_as::<_, Attendance>(
        "INSERT INTO attendance (company_id, user_id, date, clock_in, status, notes)
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
    )
    .bind(user.company_id)
    .bind(user.user_id)
    .bind(now.date_naive())
    .bind(now)
    .bind(status)
    .bind(&req.notes)
    .fetch_one(&state.db)
    .await
    .map_err(|e| clock_in_error(user.user_id, e))?;

    info!("User {} clocked in ({:?})", user.user_id, attendance.status);

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "attendance": attendance,
    }))))
}

pub async fn clock_out(
    State(state): State<AppState>,
    user: CurrentUser,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let req = clock_body(&body)?;
    let now = Utc::now();

    let open = sqlx::query_as::<_, Attendance>(OPEN_RECORD_SQL)
        .bind(user.user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to clock out", e))?
        .ok_or_else(|| AppError::bad_request("you are not clocked in"))?;

    let hours = work_hours(open.clock_in, now);
    let status = clock_out_status(open.status, hours, &state.config.attendance);

    let attendance = sqlx::query_as::<_, Attendance>(
        "UPDATE attendance SET clock_out = $1, work_hours = $2, status = $3,
         notes = COALESCE($4, notes), updated_at = now()
         WHERE attendance_id = $5 AND clock_out IS NULL RETURNING *",
    )
    .bind(now)
    .bind(hours)
    .bind(status)
    .bind(&req.notes)
    .bind(open.attendance_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to clock out", e))?
    .ok_or_else(|| AppError::bad_request("you are not clocked in"))?;

    info!("User {} clocked out after {} hours", user.user_id, hours);

    Ok(Json(json!({
        "success": true,
        "attendance": attendance,
    })))
}

pub async fn get_today(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Value>, AppError> {
    let attendance = sqlx::query_as::<_, Attendance>("SELECT * FROM attendance WHERE user_id = $1 AND date = $2")
        .bind(user.user_id)
        .bind(Utc::now().date_naive())
        .fetch_optional(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to fetch attendance", e))?;

    Ok(Json(json!({
        "success": true,
        "attendance": attendance,
    })))
}

pub async fn get_attendance(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<AttendanceQueryParams>,
) -> Result<Json<Value>, AppError> {
    if let (Some(from), Some(to)) = (params.from, params.to)
        && from > to
    {
        return Err(AppError::bad_request("from must not be after to"));
    }
    let page = Page::new(params.page, params.limit);

    let mut query_builder = QueryBuilder::<Postgres>::new(ATTENDANCE_SELECT);
    push_attendance_filters(&mut query_builder, &user, &params);
    query_builder.push(" ORDER BY a.date DESC, a.clock_in DESC");
    page.push_limit(&mut query_builder);

    let records = query_builder
        .build_query_as::<AttendanceWithUser>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to fetch attendance", e))?;

    let mut count_builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM attendance a");
    push_attendance_filters(&mut count_builder, &user, &params);
    let total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to count attendance", e))?;

    Ok(Json(json!({
        "success": true,
        "attendance": records,
        "pagination": page.meta(total),
    })))
}

/// HR correction of a day's record. Work hours and, unless given, status
/// are derived again from the corrected times.
pub async fn update_attendance(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(attendance_id): Path<Uuid>,
    Json(payload): Json<UpdateAttendanceReq>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, HR_ROLES, "correct attendance")?;
    validate_optional_text(&payload.notes, "notes", MAX_TEXT_LEN)?;

    let current = sqlx::query_as::<_, Attendance>("SELECT * FROM attendance WHERE attendance_id = $1 AND company_id = $2")
        .bind(attendance_id)
        .bind(user.company_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("attendance record not found", e))?;

    let clock_in = payload.clock_in.unwrap_or(current.clock_in);
    let clock_out = payload.clock_out.or(current.clock_out);

    if clock_in.date_naive() != current.date {
        return Err(AppError::bad_request("clock_in must stay on the record's date"));
    }
    if let Some(out) = clock_out
        && out <= clock_in
    {
        return Err(AppError::bad_request("clock_out must be after clock_in"));
    }

    let hours = clock_out.map(|out| work_hours(clock_in, out));
    let rules = &state.config.attendance;
    let status = payload.status.unwrap_or_else(|| {
        let status = clock_in_status(clock_in, rules);
        match hours {
            Some(h) => clock_out_status(status, h, rules),
            None => status,
        }
    });

    let attendance = sqlx::query_as::<_, Attendance>(
        "UPDATE attendance SET clock_in = $1, clock_out = $2, work_hours = $3, status = $4,
         notes = COALESCE($5, notes), updated_at = now()
         WHERE attendance_id = $6 AND company_id = $7 RETURNING *",
    )
    .bind(clock_in)
    .bind(clock_out)
    .bind(hours)
    .bind(status)
    .bind(&payload.notes)
    .bind(attendance_id)
    .bind(user.company_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to update attendance", e))?;

    info!("Attendance {} corrected by {}", attendance_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "attendance": attendance,
    })))
}

#[cfg(test)]
mod tests {
    use std::{borrow::Cow, error::Error, fmt};

    use sqlx::error::{DatabaseError, ErrorKind};

    use super::*;

    #[derive(Debug)]
    struct FakeDbError(ErrorKind);

    impl fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fake database error")
        }
    }

    impl Error for FakeDbError {}

    impl DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            "fake database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            None
        }

        fn as_error(&self) -> &(dyn Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            match &self.0 {
                ErrorKind::UniqueViolation => ErrorKind::UniqueViolation,
                _ => ErrorKind::Other,
            }
        }
    }

    #[test]
    fn test_second_clock_in_is_bad_request() {
        let e = sqlx::Error::Database(Box::new(FakeDbError(ErrorKind::UniqueViolation)));
        let err = clock_in_error(Uuid::new_v4(), e);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Bad request: already clocked in today");
    }

    #[test]
    fn test_other_clock_in_failures_are_server_errors() {
        let e = sqlx::Error::Database(Box::new(FakeDbError(ErrorKind::Other)));
        assert_eq!(clock_in_error(Uuid::new_v4(), e).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            clock_in_error(Uuid::new_v4(), sqlx::Error::PoolTimedOut).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_clock_out_finds_shift_across_midnight() {
        assert!(OPEN_RECORD_SQL.contains("clock_out IS NULL"));
        assert!(!OPEN_RECORD_SQL.contains("date ="));
    }

    #[test]
    fn test_clock_body_limits_notes() {
        let long = format!(r#"{{"notes":"{}"}}"#, "x".repeat(MAX_TEXT_LEN + 1));
        let err = clock_body(&Bytes::from(long)).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(clock_body(&Bytes::new()).unwrap().notes.is_none());
    }
}
