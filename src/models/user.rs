use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Type, prelude::FromRow};
use uuid::Uuid;

/// Explicit column list for `User` rows.
pub const USER_COLUMNS: &str = "user_id, company_id, email, password_hash, first_name, last_name, role, status, last_login_at, created_at, updated_at";

#[derive(Debug, Type, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    CompanyAdmin,
    HrManager,
    Recruiter,
    Manager,
    Employee,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::CompanyAdmin => "company_admin",
            Role::HrManager => "hr_manager",
            Role::Recruiter => "recruiter",
            Role::Manager => "manager",
            Role::Employee => "employee",
        }
    }

    /// Company admins and HR managers administer people records.
    pub fn is_hr(&self) -> bool {
        matches!(self, Role::CompanyAdmin | Role::HrManager)
    }

    pub fn is_recruiting(&self) -> bool {
        matches!(self, Role::CompanyAdmin | Role::HrManager | Role::Recruiter)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Type, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "user_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
}

#[derive(Debug, Serialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub status: UserStatus,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct LoginReq {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RegisterCompanyReq {
    pub company_name: String,
    pub company_slug: Option<String>,
    pub industry: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordReq {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordReq {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordReq {
    pub email: String,
    pub otp: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct UserQueryParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub search: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateUserReq {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_wire_names() {
        let role: Role = serde_json::from_str("\"hr_manager\"").unwrap();
        assert_eq!(role, Role::HrManager);
        assert_eq!(serde_json::to_string(&Role::CompanyAdmin).unwrap(), "\"company_admin\"");
        assert_eq!(Role::Recruiter.to_string(), "recruiter");
    }

    #[test]
    fn test_role_groups() {
        assert!(Role::CompanyAdmin.is_hr());
        assert!(Role::HrManager.is_hr());
        assert!(!Role::Manager.is_hr());
        assert!(Role::Recruiter.is_recruiting());
        assert!(!Role::Employee.is_recruiting());
    }

    #[test]
    fn test_password_hash_never_serialized() {
        let user = User {
            user_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            email: "ana@acme.io".into(),
            password_hash: Some("$2b$12$secret".into()),
            first_name: "Ana".into(),
            last_name: "Silva".into(),
            role: Role::Employee,
            status: UserStatus::Active,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let value = serde_json::to_value(&user).unwrap();
        assert!(value.get("password_hash").is_none());
        assert_eq!(value["role"], "employee");
    }
}
