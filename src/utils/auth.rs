//! Session handling: the `CurrentUser` extractor, the auth middleware that
//! silently reissues expired access tokens, and the auth cookies.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    extract::cookie::{Cookie, CookieJar, SameSite},
    headers::{Authorization, authorization::Bearer},
};
use serde::Serialize;
use sqlx::FromRow;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::user::{Role, UserStatus},
    state::AppState,
    utils::{
        config::Config,
        errorhandler::AppError,
        jwt::{Claims, JwtError, TokenPair},
    },
};

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Authenticated caller, placed in request extensions by [`require_auth`].
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl From<Claims> for CurrentUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            company_id: claims.company_id,
            email: claims.email,
            role: claims.role,
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized("authentication required"))
    }
}

#[derive(FromRow)]
struct SessionRow {
    user_id: Uuid,
    company_id: Uuid,
    email: String,
    role: Role,
    status: UserStatus,
}

/// Accepts a valid access token (bearer header or cookie). Otherwise falls
/// back to the refresh cookie: the user is reloaded, both tokens are
/// reissued and the new cookies are attached to the handler's response.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let access = bearer
        .map(|TypedHeader(auth)| auth.token().to_string())
        .or_else(|| jar.get(ACCESS_COOKIE).map(|c| c.value().to_string()));

    if let Some(token) = access {
        match state.jwt.verify_access(&token) {
            Ok(claims) => {
                req.extensions_mut().insert(CurrentUser::from(claims));
                return Ok(next.run(req).await);
            }
            Err(JwtError::Expired) => {}
            Err(e) => warn!("Rejected access token for {}: {}", req.uri(), e),
        }
    }

    let Some(refresh) = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()) else {
        warn!("Unauthenticated request to {}", req.uri());
        return Err(AppError::unauthorized("authentication required"));
    };

    let claims = state.jwt.verify_refresh(&refresh).map_err(|e| {
        warn!("Rejected refresh token for {}: {}", req.uri(), e);
        AppError::unauthorized("session expired, please log in again")
    })?;

    let user = load_session_user(&state, claims.sub).await?;
    let pair = state.jwt.issue_pair(&user).map_err(|e| {
        warn!("Token reissue failed: {}", e);
        AppError::Unexpected
    })?;
    info!("Reissued session tokens for user {}", user.user_id);

    req.extensions_mut().insert(user);
    let response = next.run(req).await;
    let jar = set_session_cookies(CookieJar::new(), &state.config, &pair);
    Ok((jar, response).into_response())
}

/// Reloads a user for token reissue; only active users get new tokens.
pub async fn load_session_user(state: &AppState, user_id: Uuid) -> Result<CurrentUser, AppError> {
    let row = sqlx::query_as::<_, SessionRow>(
        "SELECT user_id, company_id, email, role, status FROM users WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to load session", e))?
    .ok_or_else(|| AppError::unauthorized("session expired, please log in again"))?;

    if row.status != UserStatus::Active {
        warn!("Inactive user {} attempted to refresh session", row.user_id);
        return Err(AppError::unauthorized("account is not active"));
    }

    Ok(CurrentUser {
        user_id: row.user_id,
        company_id: row.company_id,
        email: row.email,
        role: row.role,
    })
}

pub const BCRYPT_COST: u32 = 12;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    bcrypt::hash(password, BCRYPT_COST).map_err(|e| {
        warn!("Password hashing failed: {}", e);
        AppError::Unexpected
    })
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

fn session_cookie(name: &'static str, value: String, secure: bool, max_age_secs: i64) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(secure)
        .max_age(time::Duration::seconds(max_age_secs))
        .build()
}

pub fn set_session_cookies(jar: CookieJar, config: &Config, pair: &TokenPair) -> CookieJar {
    let access_secs = config.jwt.access_ttl_minutes * 60;
    let refresh_secs = config.jwt.refresh_ttl_days * 24 * 3600;
    jar.add(session_cookie(ACCESS_COOKIE, pair.access_token.clone(), config.cookie_secure, access_secs))
        .add(session_cookie(REFRESH_COOKIE, pair.refresh_token.clone(), config.cookie_secure, refresh_secs))
}

pub fn clear_session_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookies_are_http_only() {
        let config = Config::for_tests();
        let pair = TokenPair {
            access_token: "a.b.c".into(),
            refresh_token: "d.e.f".into(),
        };
        let jar = set_session_cookies(CookieJar::new(), &config, &pair);

        let access = jar.get(ACCESS_COOKIE).unwrap();
        assert_eq!(access.value(), "a.b.c");
        assert_eq!(access.http_only(), Some(true));
        assert_eq!(access.path(), Some("/"));
        assert_eq!(access.max_age(), Some(time::Duration::minutes(15)));

        let refresh = jar.get(REFRESH_COOKIE).unwrap();
        assert_eq!(refresh.max_age(), Some(time::Duration::days(7)));
    }

    #[test]
    fn test_verify_password() {
        let hash = bcrypt::hash("correct horse", 4).unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-bcrypt-hash"));
    }

    #[test]
    fn test_clear_session_cookies() {
        let config = Config::for_tests();
        let pair = TokenPair {
            access_token: "a".into(),
            refresh_token: "b".into(),
        };
        let jar = clear_session_cookies(set_session_cookies(CookieJar::new(), &config, &pair));
        assert!(jar.get(ACCESS_COOKIE).is_none());
        assert!(jar.get(REFRESH_COOKIE).is_none());
    }
}
