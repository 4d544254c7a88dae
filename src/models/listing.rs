use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Type, prelude::FromRow};
use uuid::Uuid;

#[derive(Debug, Type, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "listing_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    Sold,
    Removed,
}

#[derive(Serialize, Debug, FromRow)]
pub struct Listing {
    pub listing_id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub category: String,
    pub condition: Option<String>,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, FromRow)]
pub struct ListingView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub listing: Listing,
    pub seller_name: String,
}

#[derive(Deserialize)]
pub struct CreateListingReq {
    pub title: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub category: String,
    pub condition: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateListingReq {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub category: Option<String>,
    pub condition: Option<String>,
    pub status: Option<ListingStatus>,
}

#[derive(Deserialize)]
pub struct ListingQueryParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub category: Option<String>,
    pub search: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}
