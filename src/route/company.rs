use axum::{Json, extract::State};
use serde_json::{Value, json};
use sqlx::{Postgres, QueryBuilder};
use tracing::info;

use crate::{
    models::{company::{Company, UpdateCompanyReq}, user::Role},
    state::AppState,
    utils::{
        access::require_role,
        auth::CurrentUser,
        errorhandler::AppError,
        validation::{MAX_NAME_LEN, MAX_TEXT_LEN, validate_optional_text, validate_required_text},
    },
};

pub async fn get_my_company(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Value>, AppError> {
    let company = sqlx::query_as::<_, Company>("SELECT * FROM companies WHERE company_id = $1")
        .bind(user.company_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("company not found", e))?;

    Ok(Json(json!({
        "success": true,
        "company": company,
    })))
}

pub async fn update_my_company(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<UpdateCompanyReq>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, &[Role::CompanyAdmin], "update company details")?;

    let mut query_builder = QueryBuilder::<Postgres>::new("UPDATE companies SET ");
    let mut separated = query_builder.separated(", ");
    let mut has_update = false;

    if let Some(name) = payload.name {
        validate_required_text(&name, "name", MAX_NAME_LEN)?;
        separated.push("name = ");
        separated.push_bind_unseparated(name.trim().to_string());
        has_update = true;
    }

    if let Some(industry) = payload.industry {
        validate_optional_text(&Some(industry.clone()), "industry", MAX_NAME_LEN)?;
        separated.push("industry = ");
        separated.push_bind_unseparated(industry);
        has_update = true;
    }

    if let Some(address) = payload.address {
        validate_optional_text(&Some(address.clone()), "address", MAX_TEXT_LEN)?;
        separated.push("address = ");
        separated.push_bind_unseparated(address);
        has_update = true;
    }

    if !has_update {
        return Err(AppError::bad_request("no parameters provided"));
    }

    query_builder.push(", updated_at = now() WHERE company_id = ");
    query_builder.push_bind(user.company_id);
    query_builder.push(" RETURNING *");

    let company = query_builder
        .build_query_as::<Company>()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to update company", e))?;

    info!("Company {} updated by {}", company.company_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "company": company,
    })))
}
