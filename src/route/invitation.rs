use axum::{Json, extract::{Path, Query, State}, http::StatusCode};
use axum_extra::extract::cookie::CookieJar;
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::{
        employee::EmploymentType,
        invitation::{AcceptInvitationReq, CreateInvitationReq, Invitation, InvitationQueryParams, InvitationStatus},
        user::{Role, USER_COLUMNS, User},
    },
    route::{
        auth::{issue_session, session_user},
        employee::{NewEmployee, insert_employee},
    },
    state::AppState,
    utils::{
        access::{HR_ROLES, require_role},
        auth::{CurrentUser, hash_password},
        errorhandler::AppError,
        mailer::invitation_email,
        pagination::Page,
        token::{generate_token, hash_token},
        validation::{MAX_NAME_LEN, normalize_email, validate_password, validate_required_text},
    },
};

fn invitation_link(app_url: &str, token: &str) -> String {
    format!("{}/accept-invitation?token={}", app_url.trim_end_matches('/'), token)
}

/// Only a still-pending invitation gets a fresh token; expired ones stay expired.
const RESEND_SQL: &str = "UPDATE invitations SET token_hash = $1, expires_at = $2
     WHERE invitation_id = $3 AND company_id = $4 AND status = 'pending' AND expires_at > now() RETURNING *";

async fn expire_stale(pg: &PgPool, company_id: Uuid) -> Result<u64, AppError> {
    let result = sqlx::query(
        "UPDATE invitations SET status = 'expired' WHERE company_id = $1 AND status = 'pending' AND expires_at <= now()",
    )
    .bind(company_id)
    .execute(pg)
    .await
    .map_err(|e| AppError::from_db("Failed to expire invitations", e))?;
    Ok(result.rows_affected())
}

/// Looks an invitation up by its raw token. A pending invitation past its
/// expiry is marked expired on the way.
async fn find_by_token(pg: &PgPool, token: &str) -> Result<Invitation, AppError> {
    let mut invitation = sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE token_hash = $1")
        .bind(hash_token(token.trim()))
        .fetch_optional(pg)
        .await
        .map_err(|e| AppError::from_db("Failed to look up invitation", e))?
        .ok_or_else(|| AppError::not_found("invitation not found"))?;

    if invitation.needs_expiry(Utc::now()) {
        invitation = sqlx::query_as::<_, Invitation>(
            "UPDATE invitations SET status = 'expired' WHERE invitation_id = $1 RETURNING *",
        )
        .bind(invitation.invitation_id)
        .fetch_one(pg)
        .await
        .map_err(|e| AppError::from_db("Failed to expire invitation", e))?;
    }
    Ok(invitation)
}

async fn company_name(pg: &PgPool, company_id: Uuid) -> Result<String, AppError> {
    sqlx::query_scalar::<_, String>("SELECT name FROM companies WHERE company_id = $1")
        .bind(company_id)
        .fetch_one(pg)
        .await
        .map_err(|e| AppError::from_db("company not found", e))
}

pub async fn create_invitation(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateInvitationReq>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_role(&user, HR_ROLES, "send invitations")?;
    let email = normalize_email(&payload.email)?;

    if payload.role == Role::CompanyAdmin && user.role != Role::CompanyAdmin {
        warn!("User {} attempted to invite a company admin", user.user_id);
        return Err(AppError::forbidden("only a company admin can invite another company admin"));
    }

    let registered = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(&email)
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to create invitation", e))?;
    if registered {
        return Err(AppError::conflict("a user with this email already exists"));
    }

    expire_stale(&state.db, user.company_id).await?;
    let pending = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM invitations WHERE company_id = $1 AND email = $2 AND status = 'pending')",
    )
    .bind(user.company_id)
    .bind(&email)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to create invitation", e))?;
    if pending {
        return Err(AppError::conflict("a pending invitation already exists for this email"));
    }

    let token = generate_token();
    let expires_at = Utc::now() + Duration::hours(state.config.invitation_ttl_hours);

    let invitation = sqlx::query_as::<_, Invitation>(
        "INSERT INTO invitations (company_id, email, role, token_hash, invited_by, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
    )
    .bind(user.company_id)
    .bind(&email)
    .bind(payload.role)
    .bind(hash_token(&token))
    .bind(user.user_id)
    .bind(expires_at)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to create invitation", e))?;

    let company = company_name(&state.db, user.company_id).await?;
    let link = invitation_link(&state.config.app_url, &token);
    state.mailer.dispatch(invitation_email(
        &email,
        &company,
        payload.role.as_str(),
        &link,
        state.config.invitation_ttl_hours,
    ));
    info!("Invitation {} sent to {} by {}", invitation.invitation_id, email, user.user_id);

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "invitation": invitation,
        "token": token,
    }))))
}

pub async fn get_invitations(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<InvitationQueryParams>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, HR_ROLES, "view invitations")?;
    let page = Page::new(params.page, params.limit);

    let expired = expire_stale(&state.db, user.company_id).await?;
    if expired > 0 {
        info!("Expired {} stale invitations for company {}", expired, user.company_id);
    }

    let mut query_builder = QueryBuilder::<Postgres>::new("SELECT * FROM invitations WHERE company_id = ");
    query_builder.push_bind(user.company_id);
    if let Some(status) = params.status {
        query_builder.push(" AND status = ").push_bind(status);
    }
    query_builder.push(" ORDER BY created_at DESC");
    page.push_limit(&mut query_builder);

    let invitations = query_builder
        .build_query_as::<Invitation>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to fetch invitations", e))?;

    let mut count_builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM invitations WHERE company_id = ");
    count_builder.push_bind(user.company_id);
    if let Some(status) = params.status {
        count_builder.push(" AND status = ").push_bind(status);
    }
    let total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to count invitations", e))?;

    Ok(Json(json!({
        "success": true,
        "invitations": invitations,
        "pagination": page.meta(total),
    })))
}

/// Issues a fresh token and expiry for a pending invitation.
pub async fn resend_invitation(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(invitation_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, HR_ROLES, "resend invitations")?;
    expire_stale(&state.db, user.company_id).await?;

    let token = generate_token();
    let expires_at = Utc::now() + Duration::hours(state.config.invitation_ttl_hours);

    let invitation = sqlx::query_as::<_, Invitation>(RESEND_SQL)
        .bind(hash_token(&token))
        .bind(expires_at)
        .bind(invitation_id)
        .bind(user.company_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to resend invitation", e))?
        .ok_or_else(|| AppError::bad_request("only pending invitations can be resent"))?;

    let company = company_name(&state.db, user.company_id).await?;
    let link = invitation_link(&state.config.app_url, &token);
    state.mailer.dispatch(invitation_email(
        &invitation.email,
        &company,
        invitation.role.as_str(),
        &link,
        state.config.invitation_ttl_hours,
    ));
    info!("Invitation {} resent by {}", invitation_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "invitation": invitation,
        "token": token,
    })))
}

pub async fn cancel_invitation(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(invitation_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, HR_ROLES, "cancel invitations")?;

    let invitation = sqlx::query_as::<_, Invitation>(
        "UPDATE invitations SET status = 'cancelled'
         WHERE invitation_id = $1 AND company_id = $2 AND status = 'pending' RETURNING *",
    )
    .bind(invitation_id)
    .bind(user.company_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to cancel invitation", e))?
    .ok_or_else(|| AppError::bad_request("only pending invitations can be cancelled"))?;

    info!("Invitation {} cancelled by {}", invitation_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "invitation": invitation,
    })))
}

pub async fn verify_invitation(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Value>, AppError> {
    let invitation = find_by_token(&state.db, &token).await?;
    if invitation.status != InvitationStatus::Pending {
        return Err(AppError::bad_request(format!("invitation is {}", invitation.status.as_str())));
    }

    let company = company_name(&state.db, invitation.company_id).await?;

    Ok(Json(json!({
        "success": true,
        "invitation": {
            "email": invitation.email,
            "role": invitation.role,
            "company_name": company,
            "expires_at": invitation.expires_at,
        },
    })))
}

/// Creates the invited account and its employee record, then signs the new
/// user in.
pub async fn accept_invitation(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<AcceptInvitationReq>,
) -> Result<(StatusCode, CookieJar, Json<Value>), AppError> {
    validate_required_text(&payload.first_name, "first_name", MAX_NAME_LEN)?;
    validate_required_text(&payload.last_name, "last_name", MAX_NAME_LEN)?;
    validate_password(&payload.password)?;

    let invitation = find_by_token(&state.db, &payload.token).await?;
    if invitation.status != InvitationStatus::Pending {
        return Err(AppError::bad_request(format!("invitation is {}", invitation.status.as_str())));
    }

    let hashed = hash_password(&payload.password)?;

    let mut tx = state.db.begin().await.map_err(|e| AppError::from_db("Failed to accept invitation", e))?;

    let claimed = sqlx::query_scalar::<_, Uuid>(
        "UPDATE invitations SET status = 'accepted', accepted_at = now()
         WHERE invitation_id = $1 AND status = 'pending' AND expires_at > now() RETURNING invitation_id",
    )
    .bind(invitation.invitation_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| AppError::from_db("Failed to accept invitation", e))?;
    if claimed.is_none() {
        return Err(AppError::bad_request("invitation is no longer valid"));
    }

    let user = sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (company_id, email, password_hash, first_name, last_name, role)
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
    ))
    .bind(invitation.company_id)
    .bind(&invitation.email)
    .bind(&hashed)
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(invitation.role)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::conflict("email is already registered"),
        e => AppError::from_db("Failed to accept invitation", e),
    })?;

    let new = NewEmployee {
        user_id: user.user_id,
        department_id: None,
        manager_id: None,
        position: invitation.role.as_str().replace('_', " "),
        salary: None,
        employment_type: EmploymentType::FullTime,
    };
    let (_, code) = insert_employee(&mut *tx, invitation.company_id, new, Utc::now().date_naive()).await?;

    tx.commit().await.map_err(|e| AppError::from_db("Failed to accept invitation", e))?;
    info!("Invitation {} accepted by {} ({})", invitation.invitation_id, user.email, code);

    let (jar, access_token) = issue_session(&state, jar, &session_user(&user))?;

    Ok((StatusCode::CREATED, jar, Json(json!({
        "success": true,
        "user": user,
        "employee_code": code,
        "access_token": access_token,
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resend_skips_lapsed_invitations() {
        assert!(RESEND_SQL.contains("status = 'pending'"));
        assert!(RESEND_SQL.contains("expires_at > now()"));
        assert!(RESEND_SQL.contains("company_id = $4"));
    }

    #[test]
    fn test_invitation_link() {
        assert_eq!(
            invitation_link("https://hr.acme.io/", "abc123"),
            "https://hr.acme.io/accept-invitation?token=abc123"
        );
        assert_eq!(
            invitation_link("http://localhost:3000", "abc123"),
            "http://localhost:3000/accept-invitation?token=abc123"
        );
    }
}
