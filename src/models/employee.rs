use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Type, prelude::FromRow};
use uuid::Uuid;

use crate::models::user::Role;

#[derive(Debug, Type, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "employment_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EmploymentType {
    FullTime,
    PartTime,
    Contract,
    Intern,
}

#[derive(Debug, Type, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "employee_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EmployeeStatus {
    Active,
    OnLeave,
    Terminated,
}

/// Employee joined with its user, department and manager names.
#[derive(Serialize, Debug, FromRow)]
pub struct EmployeeRecord {
    pub employee_id: Uuid,
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub employee_code: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub department_id: Option<Uuid>,
    pub department_name: Option<String>,
    pub manager_id: Option<Uuid>,
    pub manager_name: Option<String>,
    pub position: String,
    pub salary: Option<Decimal>,
    pub employment_type: EmploymentType,
    pub hire_date: NaiveDate,
    pub status: EmployeeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmployeeRecord {
    /// Salary is payroll data: HR roles and the employee themself only.
    pub fn redact_for(mut self, viewer_id: Uuid, viewer_role: Role) -> Self {
        if !viewer_role.is_hr() && viewer_id != self.user_id {
            self.salary = None;
        }
        self
    }

    pub fn monthly_salary(&self) -> Option<Decimal> {
        self.salary.map(|s| (s / Decimal::from(12)).round_dp(2))
    }
}

#[derive(Deserialize)]
pub struct CreateEmployeeReq {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Option<Role>,
    pub password: Option<String>,
    pub department_id: Option<Uuid>,
    pub manager_id: Option<Uuid>,
    pub position: String,
    pub salary: Option<Decimal>,
    pub employment_type: Option<EmploymentType>,
    pub hire_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct UpdateEmployeeReq {
    pub department_id: Option<Uuid>,
    pub manager_id: Option<Uuid>,
    pub position: Option<String>,
    pub salary: Option<Decimal>,
    pub employment_type: Option<EmploymentType>,
    pub hire_date: Option<NaiveDate>,
    pub status: Option<EmployeeStatus>,
}

#[derive(Deserialize)]
pub struct EmployeeQueryParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub department_id: Option<Uuid>,
    pub status: Option<EmployeeStatus>,
    pub search: Option<String>,
}

fn code_sequence(slug: &str, code: &str) -> Option<u32> {
    code.strip_prefix(slug)?.strip_prefix("-EMP")?.parse().ok()
}

/// Next `{slug}-EMP{seq}` code: one past the highest sequence already used
/// by the company, zero padded to three digits.
pub fn next_employee_code<'a>(slug: &str, existing: impl IntoIterator<Item = &'a str>) -> String {
    let next = existing
        .into_iter()
        .filter_map(|code| code_sequence(slug, code))
        .max()
        .unwrap_or(0)
        + 1;
    format!("{slug}-EMP{next:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_code() {
        assert_eq!(next_employee_code("acme", []), "acme-EMP001");
    }

    #[test]
    fn test_increments_max_not_count() {
        let existing = ["acme-EMP001", "acme-EMP007", "acme-EMP003"];
        assert_eq!(next_employee_code("acme", existing), "acme-EMP008");
    }

    #[test]
    fn test_ignores_foreign_and_malformed_codes() {
        let existing = ["globex-EMP050", "acme-EMPxyz", "acme-EMP002", "acme-corp-EMP090"];
        assert_eq!(next_employee_code("acme", existing), "acme-EMP003");
    }

    #[test]
    fn test_widens_past_three_digits() {
        assert_eq!(next_employee_code("acme", ["acme-EMP999"]), "acme-EMP1000");
    }

    fn record(salary: Option<Decimal>) -> EmployeeRecord {
        EmployeeRecord {
            employee_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            employee_code: "acme-EMP001".into(),
            first_name: "Ana".into(),
            last_name: "Silva".into(),
            email: "ana@acme.io".into(),
            role: Role::Employee,
            department_id: None,
            department_name: None,
            manager_id: None,
            manager_name: None,
            position: "Engineer".into(),
            salary,
            employment_type: EmploymentType::FullTime,
            hire_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            status: EmployeeStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_salary_visibility() {
        let salary = Some(Decimal::from(60_000));

        let rec = record(salary);
        let owner = rec.user_id;
        assert_eq!(rec.redact_for(owner, Role::Employee).salary, salary);

        assert_eq!(record(salary).redact_for(Uuid::new_v4(), Role::HrManager).salary, salary);
        assert_eq!(record(salary).redact_for(Uuid::new_v4(), Role::Manager).salary, None);
    }

    #[test]
    fn test_monthly_salary() {
        let rec = record(Some(Decimal::from(50_000)));
        assert_eq!(rec.monthly_salary(), Some(Decimal::new(416_667, 2)));
        assert_eq!(record(None).monthly_salary(), None);
    }
}
