use axum::{Json, extract::State, http::StatusCode};
use axum_extra::extract::cookie::CookieJar;
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::{
        company::Company,
        user::{ChangePasswordReq, ForgotPasswordReq, LoginReq, RegisterCompanyReq, ResetPasswordReq, Role, USER_COLUMNS, User, UserStatus},
    },
    state::AppState,
    utils::{
        auth::{CurrentUser, REFRESH_COOKIE, clear_session_cookies, hash_password, load_session_user, set_session_cookies, verify_password},
        errorhandler::AppError,
        mailer::otp_email,
        token::{generate_otp, hash_token},
        validation::{MAX_NAME_LEN, normalize_email, slugify, validate_optional_text, validate_password, validate_required_text},
    },
};

/// Leave types every new company starts with: (name, code, days).
const DEFAULT_LEAVE_TYPES: &[(&str, &str, f64)] = &[
    ("Annual Leave", "ANNUAL", 20.0),
    ("Sick Leave", "SICK", 10.0),
    ("Unpaid Leave", "UNPAID", 0.0),
];

/// Wrong guesses a reset code survives before it is burned.
const MAX_RESET_ATTEMPTS: i32 = 5;

/// Whether the failed guess that brought the count to `attempts` burns the code.
fn reset_code_exhausted(attempts: i32) -> bool {
    attempts >= MAX_RESET_ATTEMPTS
}

pub(crate) fn session_user(user: &User) -> CurrentUser {
    CurrentUser {
        user_id: user.user_id,
        company_id: user.company_id,
        email: user.email.clone(),
        role: user.role,
    }
}

pub(crate) fn issue_session(state: &AppState, jar: CookieJar, user: &CurrentUser) -> Result<(CookieJar, String), AppError> {
    let pair = state.jwt.issue_pair(user).map_err(|e| {
        warn!("JWT encoding failed: {}", e);
        AppError::Unexpected
    })?;
    let jar = set_session_cookies(jar, &state.config, &pair);
    Ok((jar, pair.access_token))
}

/// Creates a company together with its first company admin.
pub async fn register_company(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<RegisterCompanyReq>,
) -> Result<(StatusCode, CookieJar, Json<Value>), AppError> {
    validate_required_text(&payload.company_name, "company_name", MAX_NAME_LEN)?;
    validate_required_text(&payload.first_name, "first_name", MAX_NAME_LEN)?;
    validate_required_text(&payload.last_name, "last_name", MAX_NAME_LEN)?;
    validate_optional_text(&payload.industry, "industry", MAX_NAME_LEN)?;
    let email = normalize_email(&payload.email)?;
    validate_password(&payload.password)?;

    let slug = slugify(payload.company_slug.as_deref().unwrap_or(&payload.company_name));
    if slug.is_empty() {
        return Err(AppError::validation("company slug must contain letters or digits"));
    }

    let email_taken = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(&email)
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to register company", e))?;
    if email_taken {
        return Err(AppError::conflict("email is already registered"));
    }

    let hashed = hash_password(&payload.password)?;

    let mut tx = state.db.begin().await.map_err(|e| AppError::from_db("Failed to register company", e))?;

    let company = sqlx::query_as::<_, Company>(
        "INSERT INTO companies (name, slug, industry) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(payload.company_name.trim())
    .bind(&slug)
    .bind(&payload.industry)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::conflict(format!("company slug '{slug}' is already taken"))
        }
        e => AppError::from_db("Failed to register company", e),
    })?;

    let user = sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (company_id, email, password_hash, first_name, last_name, role)
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
    ))
    .bind(company.company_id)
    .bind(&email)
    .bind(&hashed)
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(Role::CompanyAdmin)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| AppError::from_db("Failed to register company", e))?;

    for (name, code, days) in DEFAULT_LEAVE_TYPES {
        sqlx::query("INSERT INTO leave_types (company_id, name, code, default_days, is_paid) VALUES ($1, $2, $3, $4, $5)")
            .bind(company.company_id)
            .bind(*name)
            .bind(*code)
            .bind(*days)
            .bind(*code != "UNPAID")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::from_db("Failed to register company", e))?;
    }

    tx.commit().await.map_err(|e| AppError::from_db("Failed to register company", e))?;
    info!("Registered company {} ({}) with admin {}", company.name, company.slug, user.email);

    let (jar, access_token) = issue_session(&state, jar, &session_user(&user))?;

    Ok((StatusCode::CREATED, jar, Json(json!({
        "success": true,
        "message": "company registered",
        "company": company,
        "user": user,
        "access_token": access_token,
    }))))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginReq>,
) -> Result<(CookieJar, Json<Value>), AppError> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::bad_request("email and password are required"));
    }
    let email = normalize_email(&payload.email).map_err(|_| AppError::unauthorized("invalid credentials"))?;

    let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
        .bind(&email)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to log in", e))?;

    let Some(user) = user else {
        warn!("Failed login attempt: user not found for email: {}", email);
        return Err(AppError::unauthorized("invalid credentials"));
    };

    let Some(password_hash) = user.password_hash.as_deref() else {
        warn!("Failed login attempt: no password set for email: {}", email);
        return Err(AppError::unauthorized("no password set for this account, use password reset"));
    };

    if !verify_password(&payload.password, password_hash) {
        warn!("Failed login attempt: invalid password for email: {}", email);
        return Err(AppError::unauthorized("invalid credentials"));
    }

    if user.status != UserStatus::Active {
        warn!("Login attempt by inactive user: {}", email);
        return Err(AppError::forbidden("account is not active"));
    }

    sqlx::query("UPDATE users SET last_login_at = now() WHERE user_id = $1")
        .bind(user.user_id)
        .execute(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to log in", e))?;

    let (jar, access_token) = issue_session(&state, jar, &session_user(&user))?;
    info!("User {} logged in", user.user_id);

    Ok((jar, Json(json!({
        "success": true,
        "user": user,
        "access_token": access_token,
    }))))
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Value>), AppError> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| AppError::unauthorized("refresh token missing"))?;

    let claims = state.jwt.verify_refresh(&token).map_err(|e| {
        warn!("Explicit refresh rejected: {}", e);
        AppError::unauthorized("session expired, please log in again")
    })?;

    let user = load_session_user(&state, claims.sub).await?;
    let (jar, access_token) = issue_session(&state, jar, &user)?;

    Ok((jar, Json(json!({
        "success": true,
        "access_token": access_token,
    }))))
}

pub async fn logout(jar: CookieJar) -> (CookieJar, Json<Value>) {
    (clear_session_cookies(jar), Json(json!({
        "success": true,
        "message": "logged out",
    })))
}

pub async fn me(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Value>, AppError> {
    let profile = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1"))
        .bind(user.user_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("user not found", e))?;

    Ok(Json(json!({
        "success": true,
        "user": profile,
    })))
}

pub async fn change_password(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<ChangePasswordReq>,
) -> Result<Json<Value>, AppError> {
    validate_password(&payload.new_password)?;

    let current_hash = sqlx::query_scalar::<_, Option<String>>("SELECT password_hash FROM users WHERE user_id = $1")
        .bind(user.user_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("user not found", e))?;

    let valid = current_hash
        .as_deref()
        .is_some_and(|hash| verify_password(&payload.current_password, hash));
    if !valid {
        warn!("Password change with wrong current password by user {}", user.user_id);
        return Err(AppError::bad_request("current password is incorrect"));
    }

    let hashed = hash_password(&payload.new_password)?;
    sqlx::query("UPDATE users SET password_hash = $1, updated_at = now() WHERE user_id = $2")
        .bind(&hashed)
        .bind(user.user_id)
        .execute(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to change password", e))?;

    Ok(Json(json!({
        "success": true,
        "message": "password changed",
    })))
}

/// Emails a one-time reset code. Answers the same way whether or not the
/// address belongs to an account.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordReq>,
) -> Result<Json<Value>, AppError> {
    let email = normalize_email(&payload.email)?;

    let user_id = sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM users WHERE email = $1 AND status = 'active'")
        .bind(&email)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to start password reset", e))?;

    if let Some(user_id) = user_id {
        let code = generate_otp();
        let expires_at = Utc::now() + Duration::minutes(state.config.otp_ttl_minutes);

        let mut tx = state.db.begin().await.map_err(|e| AppError::from_db("Failed to start password reset", e))?;
        sqlx::query("UPDATE password_reset_codes SET consumed_at = now() WHERE user_id = $1 AND consumed_at IS NULL")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::from_db("Failed to start password reset", e))?;
        sqlx::query("INSERT INTO password_reset_codes (user_id, code_hash, expires_at) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(hash_token(&code))
            .bind(expires_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::from_db("Failed to start password reset", e))?;
        tx.commit().await.map_err(|e| AppError::from_db("Failed to start password reset", e))?;

        state.mailer.dispatch(otp_email(&email, &code, state.config.otp_ttl_minutes));
        info!("Password reset code issued for user {}", user_id);
    } else {
        warn!("Password reset requested for unknown or inactive email: {}", email);
    }

    Ok(Json(json!({
        "success": true,
        "message": "if the account exists, a reset code has been sent",
    })))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordReq>,
) -> Result<Json<Value>, AppError> {
    let email = normalize_email(&payload.email)?;
    validate_password(&payload.new_password)?;

    let row = sqlx::query_as::<_, (Uuid, String)>(
        "SELECT c.code_id, c.code_hash FROM password_reset_codes c
         JOIN users u ON u.user_id = c.user_id
         WHERE u.email = $1 AND c.consumed_at IS NULL AND c.expires_at > now()
         ORDER BY c.created_at DESC LIMIT 1",
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to reset password", e))?;

    let Some((code_id, code_hash)) = row else {
        warn!("Password reset without a live code for email: {}", email);
        return Err(AppError::bad_request("invalid or expired reset code"));
    };

    if code_hash != hash_token(payload.otp.trim()) {
        let attempts = sqlx::query_scalar::<_, i32>(
            "UPDATE password_reset_codes SET attempts = attempts + 1 WHERE code_id = $1 RETURNING attempts",
        )
        .bind(code_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to reset password", e))?;

        if reset_code_exhausted(attempts) {
            sqlx::query("UPDATE password_reset_codes SET consumed_at = now() WHERE code_id = $1 AND consumed_at IS NULL")
                .bind(code_id)
                .execute(&state.db)
                .await
                .map_err(|e| AppError::from_db("Failed to reset password", e))?;
            warn!("Reset code for {} burned after {} wrong attempts", email, attempts);
        } else {
            warn!("Invalid password reset code for email: {} (attempt {})", email, attempts);
        }
        return Err(AppError::bad_request("invalid or expired reset code"));
    }

    let hashed = hash_password(&payload.new_password)?;

    let mut tx = state.db.begin().await.map_err(|e| AppError::from_db("Failed to reset password", e))?;
    let consumed = sqlx::query(
        "UPDATE password_reset_codes SET consumed_at = now()
         WHERE code_id = $1 AND consumed_at IS NULL AND attempts < $2",
    )
    .bind(code_id)
    .bind(MAX_RESET_ATTEMPTS)
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::from_db("Failed to reset password", e))?;
    if consumed.rows_affected() == 0 {
        return Err(AppError::bad_request("invalid or expired reset code"));
    }
    sqlx::query("UPDATE users SET password_hash = $1, updated_at = now() WHERE email = $2")
        .bind(&hashed)
        .bind(&email)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::from_db("Failed to reset password", e))?;
    tx.commit().await.map_err(|e| AppError::from_db("Failed to reset password", e))?;

    Ok(Json(json!({
        "success": true,
        "message": "password has been reset",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_code_burns_after_limit() {
        for attempts in 1..MAX_RESET_ATTEMPTS {
            assert!(!reset_code_exhausted(attempts), "attempt {attempts}");
        }
        assert!(reset_code_exhausted(MAX_RESET_ATTEMPTS));
        assert!(reset_code_exhausted(MAX_RESET_ATTEMPTS + 3));
    }

    #[test]
    fn test_default_leave_types_are_unique() {
        let mut codes: Vec<_> = DEFAULT_LEAVE_TYPES.iter().map(|(_, code, _)| *code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), DEFAULT_LEAVE_TYPES.len());
    }
}
