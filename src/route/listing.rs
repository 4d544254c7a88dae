use axum::{Json, extract::{Path, Query, State}, http::StatusCode};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use sqlx::{Postgres, QueryBuilder};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::listing::{CreateListingReq, Listing, ListingQueryParams, ListingStatus, ListingView, UpdateListingReq},
    state::AppState,
    utils::{
        auth::CurrentUser,
        errorhandler::AppError,
        pagination::Page,
        validation::{MAX_NAME_LEN, MAX_TEXT_LEN, validate_optional_text, validate_required_text},
    },
};

const LISTING_SELECT: &str = "SELECT l.*, u.first_name || ' ' || u.last_name AS seller_name
    FROM listings l JOIN users u ON u.user_id = l.seller_id";

fn validate_price(price: Decimal) -> Result<(), AppError> {
    if price.is_sign_negative() {
        return Err(AppError::validation("price must not be negative"));
    }
    Ok(())
}

fn push_listing_filters(qb: &mut QueryBuilder<'_, Postgres>, params: &ListingQueryParams) {
    qb.push(" WHERE l.status = ").push_bind(ListingStatus::Active);
    if let Some(category) = params.category.as_deref().filter(|c| !c.trim().is_empty()) {
        qb.push(" AND l.category = ").push_bind(category.trim().to_string());
    }
    if let Some(search) = params.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = format!("%{}%", search.trim());
        qb.push(" AND (l.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR l.description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(min_price) = params.min_price {
        qb.push(" AND l.price >= ").push_bind(min_price);
    }
    if let Some(max_price) = params.max_price {
        qb.push(" AND l.price <= ").push_bind(max_price);
    }
}

async fn fetch_own_listing(state: &AppState, user: &CurrentUser, listing_id: Uuid) -> Result<Listing, AppError> {
    let listing = sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE listing_id = $1 AND status <> 'removed'")
        .bind(listing_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("listing not found", e))?;

    if listing.seller_id != user.user_id {
        warn!("User {} attempted to modify listing {} owned by {}", user.user_id, listing_id, listing.seller_id);
        return Err(AppError::forbidden("only the seller can modify this listing"));
    }
    Ok(listing)
}

pub async fn create_listing(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateListingReq>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    validate_required_text(&payload.title, "title", MAX_NAME_LEN)?;
    validate_required_text(&payload.category, "category", MAX_NAME_LEN)?;
    validate_optional_text(&payload.description, "description", MAX_TEXT_LEN)?;
    validate_optional_text(&payload.condition, "condition", MAX_NAME_LEN)?;
    validate_price(payload.price)?;

    let listing = sqlx::query_as::<_, Listing>(
        "INSERT INTO listings (seller_id, title, description, price, category, condition)
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
    )
    .bind(user.user_id)
    .bind(payload.title.trim())
    .bind(&payload.description)
    .bind(payload.price)
    .bind(payload.category.trim())
    .bind(&payload.condition)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to create listing", e))?;

    info!("Listing {} created by {}", listing.listing_id, user.user_id);

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "listing": listing,
    }))))
}

pub async fn get_listings(
    State(state): State<AppState>,
    Query(params): Query<ListingQueryParams>,
) -> Result<Json<Value>, AppError> {
    if let (Some(min), Some(max)) = (params.min_price, params.max_price)
        && min > max
    {
        return Err(AppError::bad_request("min_price must not exceed max_price"));
    }
    let page = Page::new(params.page, params.limit);

    let mut query_builder = QueryBuilder::<Postgres>::new(LISTING_SELECT);
    push_listing_filters(&mut query_builder, &params);
    query_builder.push(" ORDER BY l.created_at DESC");
    page.push_limit(&mut query_builder);

    let listings = query_builder
        .build_query_as::<ListingView>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to fetch listings", e))?;

    let mut count_builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM listings l");
    push_listing_filters(&mut count_builder, &params);
    let total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to count listings", e))?;

    Ok(Json(json!({
        "success": true,
        "listings": listings,
        "pagination": page.meta(total),
    })))
}

pub async fn get_my_listings(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Value>, AppError> {
    let listings = sqlx::query_as::<_, Listing>(
        "SELECT * FROM listings WHERE seller_id = $1 AND status <> 'removed' ORDER BY created_at DESC",
    )
    .bind(user.user_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| AppError::from_db("Failed to fetch listings", e))?;

    Ok(Json(json!({
        "success": true,
        "listings": listings,
    })))
}

pub async fn get_listing_by_id(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let listing = sqlx::query_as::<_, ListingView>(&format!(
        "{LISTING_SELECT} WHERE l.listing_id = $1 AND l.status <> 'removed'"
    ))
    .bind(listing_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_db("listing not found", e))?;

    Ok(Json(json!({
        "success": true,
        "listing": listing,
    })))
}

pub async fn update_listing(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(listing_id): Path<Uuid>,
    Json(payload): Json<UpdateListingReq>,
) -> Result<Json<Value>, AppError> {
    fetch_own_listing(&state, &user, listing_id).await?;

    let mut query_builder = QueryBuilder::<Postgres>::new("UPDATE listings SET ");
    let mut separated = query_builder.separated(", ");
    let mut has_update = false;

    if let Some(title) = payload.title {
        validate_required_text(&title, "title", MAX_NAME_LEN)?;
        separated.push("title = ");
        separated.push_bind_unseparated(title.trim().to_string());
        has_update = true;
    }

    if let Some(description) = payload.description {
        validate_optional_text(&Some(description.clone()), "description", MAX_TEXT_LEN)?;
        separated.push("description = ");
        separated.push_bind_unseparated(description);
        has_update = true;
    }

    if let Some(price) = payload.price {
        validate_price(price)?;
        separated.push("price = ");
        separated.push_bind_unseparated(price);
        has_update = true;
    }

    if let Some(category) = payload.category {
        validate_required_text(&category, "category", MAX_NAME_LEN)?;
        separated.push("category = ");
        separated.push_bind_unseparated(category.trim().to_string());
        has_update = true;
    }

    if let Some(condition) = payload.condition {
        validate_optional_text(&Some(condition.clone()), "condition", MAX_NAME_LEN)?;
        separated.push("condition = ");
        separated.push_bind_unseparated(condition);
        has_update = true;
    }

    if let Some(status) = payload.status {
        if status == ListingStatus::Removed {
            return Err(AppError::bad_request("use DELETE to remove a listing"));
        }
        separated.push("status = ");
        separated.push_bind_unseparated(status);
        has_update = true;
    }

    if !has_update {
        return Err(AppError::bad_request("no parameters provided"));
    }

    query_builder.push(", updated_at = now() WHERE listing_id = ");
    query_builder.push_bind(listing_id);
    query_builder.push(" RETURNING *");

    let listing = query_builder
        .build_query_as::<Listing>()
        .fetch_one(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to update listing", e))?;

    Ok(Json(json!({
        "success": true,
        "listing": listing,
    })))
}

/// Soft delete: the listing is marked removed.
pub async fn delete_listing(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(listing_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    fetch_own_listing(&state, &user, listing_id).await?;

    sqlx::query("UPDATE listings SET status = 'removed', updated_at = now() WHERE listing_id = $1")
        .bind(listing_id)
        .execute(&state.db)
        .await
        .map_err(|e| AppError::from_db("Failed to delete listing", e))?;

    info!("Listing {} removed by {}", listing_id, user.user_id);

    Ok(Json(json!({
        "success": true,
        "message": "listing removed",
    })))
}
