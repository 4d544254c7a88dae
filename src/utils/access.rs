//! Role checks and visibility scopes.
//!
//! Personal records (attendance, leave, reviews, goals) are visible to the
//! owner, to the owner's manager and to company-wide HR roles.

use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};
use tracing::warn;
use uuid::Uuid;

use crate::{
    models::user::Role,
    utils::{auth::CurrentUser, errorhandler::AppError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Own,
    Team,
    Company,
}

impl Role {
    pub fn scope(&self) -> Scope {
        match self {
            Role::CompanyAdmin | Role::HrManager => Scope::Company,
            Role::Manager => Scope::Team,
            Role::Recruiter | Role::Employee => Scope::Own,
        }
    }
}

pub const HR_ROLES: &[Role] = &[Role::CompanyAdmin, Role::HrManager];
pub const RECRUITING_ROLES: &[Role] = &[Role::CompanyAdmin, Role::HrManager, Role::Recruiter];
pub const REVIEWER_ROLES: &[Role] = &[Role::CompanyAdmin, Role::HrManager, Role::Manager];

pub fn require_role(user: &CurrentUser, allowed: &[Role], action: &str) -> Result<(), AppError> {
    if allowed.contains(&user.role) {
        return Ok(());
    }
    warn!("User {} with role {} attempted to {}", user.user_id, user.role, action);
    Err(AppError::forbidden(format!("you do not have permission to {action}")))
}

/// Restricts `column` (a user id column) to what the caller may see.
/// The company filter is pushed separately by every query.
pub fn push_scope(qb: &mut QueryBuilder<'_, Postgres>, column: &str, user: &CurrentUser) {
    match user.role.scope() {
        Scope::Company => {}
        Scope::Team => {
            qb.push(" AND (")
                .push(column)
                .push(" = ")
                .push_bind(user.user_id)
                .push(" OR ")
                .push(column)
                .push(" IN (SELECT user_id FROM employees WHERE manager_id = ")
                .push_bind(user.user_id)
                .push("))");
        }
        Scope::Own => {
            qb.push(" AND ").push(column).push(" = ").push_bind(user.user_id);
        }
    }
}

/// Runs on a pool or on an open transaction's connection.
pub async fn is_direct_report<'e>(pg: impl PgExecutor<'e>, manager_id: Uuid, user_id: Uuid) -> Result<bool, AppError> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM employees WHERE user_id = $1 AND manager_id = $2)",
    )
    .bind(user_id)
    .bind(manager_id)
    .fetch_one(pg)
    .await
    .map_err(|e| AppError::from_db("Failed to check reporting line", e))
}

/// Whether `target` lies inside the caller's visibility scope.
pub async fn in_scope(pg: &PgPool, user: &CurrentUser, target: Uuid) -> Result<bool, AppError> {
    if target == user.user_id {
        return Ok(true);
    }
    match user.role.scope() {
        Scope::Own => Ok(false),
        Scope::Team => is_direct_report(pg, user.user_id, target).await,
        Scope::Company => sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE user_id = $1 AND company_id = $2)",
        )
        .bind(target)
        .bind(user.company_id)
        .fetch_one(pg)
        .await
        .map_err(|e| AppError::from_db("Failed to check user scope", e)),
    }
}

/// Rejects references (department, manager, posting, ...) that do not
/// belong to the caller's company.
pub async fn ensure_in_company(
    pg: &PgPool,
    table: &str,
    column: &str,
    id: Uuid,
    company_id: Uuid,
    label: &str,
) -> Result<(), AppError> {
    let exists = sqlx::query_scalar::<_, bool>(&format!(
        "SELECT EXISTS(SELECT 1 FROM {table} WHERE {column} = $1 AND company_id = $2)"
    ))
    .bind(id)
    .bind(company_id)
    .fetch_one(pg)
    .await
    .map_err(|e| AppError::from_db("Failed to validate references", e))?;

    if !exists {
        return Err(AppError::bad_request(format!("{label} not found in your company")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> CurrentUser {
        CurrentUser {
            user_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            email: "someone@acme.io".into(),
            role,
        }
    }

    fn scoped_sql(role: Role) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM attendance WHERE company_id = ");
        qb.push_bind(Uuid::nil());
        push_scope(&mut qb, "a.user_id", &user(role));
        qb.sql().to_string()
    }

    #[test]
    fn test_scope_by_role() {
        assert_eq!(Role::CompanyAdmin.scope(), Scope::Company);
        assert_eq!(Role::HrManager.scope(), Scope::Company);
        assert_eq!(Role::Manager.scope(), Scope::Team);
        assert_eq!(Role::Recruiter.scope(), Scope::Own);
        assert_eq!(Role::Employee.scope(), Scope::Own);
    }

    #[test]
    fn test_employee_scope_limits_to_self() {
        let sql = scoped_sql(Role::Employee);
        assert!(sql.ends_with(" AND a.user_id = $2"), "{sql}");
    }

    #[test]
    fn test_manager_scope_includes_reports() {
        let sql = scoped_sql(Role::Manager);
        assert!(sql.contains("a.user_id = $2 OR a.user_id IN (SELECT user_id FROM employees WHERE manager_id = $3)"), "{sql}");
    }

    #[test]
    fn test_hr_scope_adds_nothing() {
        let sql = scoped_sql(Role::HrManager);
        assert_eq!(sql, "SELECT * FROM attendance WHERE company_id = $1");
    }

    #[test]
    fn test_require_role() {
        assert!(require_role(&user(Role::HrManager), HR_ROLES, "create departments").is_ok());
        let err = require_role(&user(Role::Employee), HR_ROLES, "create departments").unwrap_err();
        assert_eq!(err.to_string(), "Forbidden: you do not have permission to create departments");
    }
}
