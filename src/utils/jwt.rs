use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{models::user::Role, utils::{auth::CurrentUser, config::JwtSettings}};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub company_id: Uuid,
    pub email: String,
    pub role: Role,
    pub token_type: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("token expired")]
    Expired,

    #[error("invalid token")]
    Invalid,

    #[error("wrong token type")]
    WrongType,

    #[error("token encoding failed: {0}")]
    Encoding(String),
}

pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Signs and verifies the access/refresh token pair. Each kind has its own
/// secret so a refresh token can never pass as an access token.
#[derive(Clone)]
pub struct JwtService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl JwtService {
    pub fn new(settings: &JwtSettings) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(settings.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(settings.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(settings.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(settings.refresh_secret.as_bytes()),
            access_ttl: Duration::minutes(settings.access_ttl_minutes),
            refresh_ttl: Duration::days(settings.refresh_ttl_days),
        }
    }

    pub fn issue_pair(&self, user: &CurrentUser) -> Result<TokenPair, JwtError> {
        Ok(TokenPair {
            access_token: self.issue(user, TokenKind::Access, self.access_ttl)?,
            refresh_token: self.issue(user, TokenKind::Refresh, self.refresh_ttl)?,
        })
    }

    fn issue(&self, user: &CurrentUser, kind: TokenKind, ttl: Duration) -> Result<String, JwtError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.user_id,
            company_id: user.company_id,
            email: user.email.clone(),
            role: user.role,
            token_type: kind,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        let key = match kind {
            TokenKind::Access => &self.access_encoding,
            TokenKind::Refresh => &self.refresh_encoding,
        };
        encode(&Header::new(Algorithm::HS256), &claims, key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify(token, TokenKind::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify(token, TokenKind::Refresh)
    }

    fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, JwtError> {
        let key = match kind {
            TokenKind::Access => &self.access_decoding,
            TokenKind::Refresh => &self.refresh_decoding,
        };
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<Claims>(token, key, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            _ => JwtError::Invalid,
        })?;

        if data.claims.token_type != kind {
            return Err(JwtError::WrongType);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::Config;

    fn service() -> JwtService {
        JwtService::new(&Config::for_tests().jwt)
    }

    fn user() -> CurrentUser {
        CurrentUser {
            user_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            email: "lead@acme.io".into(),
            role: Role::Manager,
        }
    }

    #[test]
    fn test_issue_and_verify_pair() {
        let svc = service();
        let user = user();
        let pair = svc.issue_pair(&user).unwrap();

        let access = svc.verify_access(&pair.access_token).unwrap();
        assert_eq!(access.sub, user.user_id);
        assert_eq!(access.company_id, user.company_id);
        assert_eq!(access.role, Role::Manager);
        assert_eq!(access.token_type, TokenKind::Access);

        let refresh = svc.verify_refresh(&pair.refresh_token).unwrap();
        assert_eq!(refresh.token_type, TokenKind::Refresh);
        assert!(refresh.exp > access.exp);
    }

    #[test]
    fn test_refresh_token_rejected_as_access() {
        let svc = service();
        let pair = svc.issue_pair(&user()).unwrap();
        assert!(svc.verify_access(&pair.refresh_token).is_err());
        assert!(svc.verify_refresh(&pair.access_token).is_err());
    }

    #[test]
    fn test_expired_token() {
        let svc = service();
        let token = svc.issue(&user(), TokenKind::Access, Duration::minutes(-5)).unwrap();
        assert!(matches!(svc.verify_access(&token), Err(JwtError::Expired)));
    }

    #[test]
    fn test_tampered_token() {
        let svc = service();
        let pair = svc.issue_pair(&user()).unwrap();
        let tampered = format!("{}x", pair.access_token);
        assert!(matches!(svc.verify_access(&tampered), Err(JwtError::Invalid)));
    }
}
