use axum::{Json, extract::State};
use chrono::{Datelike, Utc};
use serde_json::{Value, json};
use sqlx::{Postgres, QueryBuilder};

use crate::{
    models::leave::LeaveBalanceView,
    state::AppState,
    utils::{access::push_scope, auth::CurrentUser, errorhandler::AppError},
};

async fn scoped_count(
    state: &AppState,
    user: &CurrentUser,
    from: &str,
    user_column: &str,
    condition: impl FnOnce(&mut QueryBuilder<'_, Postgres>),
) -> Result<i64, AppError> {
    let mut query_builder = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {from} WHERE company_id = "));
    query_builder.push_bind(user.company_id);
    push_scope(&mut query_builder, user_column, user);
    condition(&mut query_builder);

    query_builder
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to load dashboard", e))
}

pub async fn get_dashboard(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Value>, AppError> {
    let today = Utc::now().date_naive();

    let headcount = scoped_count(&state, &user, "employees", "user_id", |qb| {
        qb.push(" AND status <> 'terminated'");
    })
    .await?;

    let present_today = scoped_count(&state, &user, "attendance", "user_id", |qb| {
        qb.push(" AND date = ").push_bind(today);
    })
    .await?;

    let pending_leave_requests = scoped_count(&state, &user, "leave_requests", "user_id", |qb| {
        qb.push(" AND status = 'pending'");
    })
    .await?;

    let open_job_postings = if user.role.is_recruiting() {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM job_postings WHERE company_id = $1 AND status = 'open'",
        )
        .bind(user.company_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to load dashboard", e))?;
        Some(count)
    } else {
        None
    };

    let leave_balances = sqlx::query_as::<_, LeaveBalanceView>(
        "SELECT b.*, t.name AS leave_type_name, t.code AS leave_type_code
         FROM leave_balances b JOIN leave_types t ON t.leave_type_id = b.leave_type_id
         WHERE b.user_id = $1 AND b.year = $2 ORDER BY t.name ASC",
    )
    .bind(user.user_id)
    .bind(today.year())
    .fetch_all(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to load dashboard", e))?;

    Ok(Json(json!({
        "success": true,
        "dashboard": {
            "role": user.role,
            "headcount": headcount,
            "present_today": present_today,
            "pending_leave_requests": pending_leave_requests,
            "open_job_postings": open_job_postings,
            "leave_balances": leave_balances,
        },
    })))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "ok",
    }))
}
