//! Data models for tracked products, tracking rows and price alerts

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A product catalog entry, one per canonical URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub current_price: Decimal,
}

/// A user's tracking relationship with a product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrackedItem {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub target_price: Decimal,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

/// One point of a product's price log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceHistoryEntry {
    pub product_id: i64,
    pub recorded_price: Decimal,
    pub recorded_at: DateTime<Utc>,
}

/// Name and price read from a product page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub name: String,
    pub price: Decimal,
}

/// A tracked item whose product has reached its target and still needs a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PriceAlert {
    pub item_id: i64,
    pub recipient: String,
    pub product_name: String,
    pub product_url: String,
    pub target_price: Decimal,
    pub current_price: Decimal,
}

/// Dashboard row: a tracked item joined with its product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TrackedProduct {
    pub item_id: i64,
    pub product_id: i64,
    pub url: String,
    pub name: String,
    pub current_price: Decimal,
    pub target_price: Decimal,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

/// A point on a product's price graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PricePoint {
    pub recorded_at: DateTime<Utc>,
    pub price: Decimal,
}

/// Input to the tracking upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRequest {
    pub user_id: i64,
    pub url: String,
    pub name: String,
    pub price: Decimal,
    pub target_price: Decimal,
}
