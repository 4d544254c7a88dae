use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;

#[derive(Serialize, Debug, FromRow)]
pub struct Department {
    pub department_id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub head_id: Option<Uuid>,
    pub is_active: bool,
    pub employee_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct CreateDepartmentReq {
    pub name: String,
    pub description: Option<String>,
    pub head_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateDepartmentReq {
    pub name: Option<String>,
    pub description: Option<String>,
    pub head_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct DepartmentQueryParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub include_inactive: Option<bool>,
    pub search: Option<String>,
}
