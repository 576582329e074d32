use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::error::Result;
use crate::models::{
    PriceAlert, PricePoint, Product, ProductSnapshot, TrackRequest, TrackedItem, TrackedProduct,
};

/// Persistence contract used by the jobs and the engine facade.
///
/// Every write is a single statement or a single transaction, so callers never
/// observe a half-applied operation.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Insert the user if the address is new; returns the user id either way.
    async fn register_user(&self, email: &str) -> Result<i64>;

    /// Add or update a tracked item: upsert the product by URL, upsert the
    /// tracking row by (user, product) with `notified` cleared, and seed the
    /// product's price history if it has none. A known product whose price
    /// moved gets a history entry for the new price. All writes commit together.
    async fn track(&self, request: &TrackRequest) -> Result<TrackedItem>;

    /// Every product in the catalog.
    async fn products(&self) -> Result<Vec<Product>>;

    /// Store a freshly read snapshot. Writes (price, name and a history entry)
    /// only when the price differs; returns whether anything changed.
    async fn record_price(&self, product_id: i64, snapshot: &ProductSnapshot) -> Result<bool>;

    /// Tracked items at or below target that have not been notified yet.
    async fn pending_alerts(&self) -> Result<Vec<PriceAlert>>;

    /// Set `notified` on one item, provided it still carries the target the
    /// alert was sent for. Returns false if it was already set or the item was
    /// re-tracked in the meantime.
    async fn mark_notified(&self, item_id: i64, target_price: Decimal) -> Result<bool>;

    /// Clear `notified` wherever the price has risen back above target.
    /// Returns the number of re-armed items.
    async fn reset_recovered(&self) -> Result<u64>;

    async fn tracked_items_for_user(&self, user_id: i64) -> Result<Vec<TrackedProduct>>;

    /// Price history in time order, closed by the current price stamped now.
    async fn price_series(&self, product_id: i64) -> Result<Vec<PricePoint>>;

    /// Remove a user's tracking row. Products are never deleted.
    async fn untrack(&self, user_id: i64, product_id: i64) -> Result<bool>;
}

pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TrackingStore for Database {
    async fn register_user(&self, email: &str) -> Result<i64> {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO users (email) VALUES ($1)
            ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
            RETURNING id
            ",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn track(&self, request: &TrackRequest) -> Result<TrackedItem> {
        let mut tx = self.pool.begin().await?;

        // The CTE reads the row as it was before this statement's upsert.
        let (product_id, previous_price): (i64, Option<Decimal>) = sqlx::query_as(
            r"
            WITH previous AS (SELECT current_price FROM products WHERE url = $1)
            INSERT INTO products (url, name, current_price)
            VALUES ($1, $2, $3)
            ON CONFLICT (url) DO UPDATE
                SET name = EXCLUDED.name, current_price = EXCLUDED.current_price
            RETURNING id, (SELECT current_price FROM previous)
            ",
        )
        .bind(&request.url)
        .bind(&request.name)
        .bind(request.price)
        .fetch_one(&mut *tx)
        .await?;

        let item = sqlx::query_as::<_, TrackedItem>(
            r"
            INSERT INTO tracked_items (user_id, product_id, target_price, notified)
            VALUES ($1, $2, $3, FALSE)
            ON CONFLICT (user_id, product_id) DO UPDATE
                SET target_price = EXCLUDED.target_price, notified = FALSE
            RETURNING id, user_id, product_id, target_price, notified, created_at
            ",
        )
        .bind(request.user_id)
        .bind(product_id)
        .bind(request.target_price)
        .fetch_one(&mut *tx)
        .await?;

        let history = if previous_price.is_some_and(|previous| previous != request.price) {
            "INSERT INTO price_history (product_id, recorded_price) VALUES ($1, $2)"
        } else {
            r"
            INSERT INTO price_history (product_id, recorded_price)
            SELECT $1, $2
            WHERE NOT EXISTS (SELECT 1 FROM price_history WHERE product_id = $1)
            "
        };

        sqlx::query(history)
            .bind(product_id)
            .bind(request.price)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(item)
    }

    async fn products(&self) -> Result<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT id, url, name, current_price FROM products ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    async fn record_price(&self, product_id: i64, snapshot: &ProductSnapshot) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated: Option<i64> = sqlx::query_scalar(
            r"
            UPDATE products SET current_price = $2, name = $3
            WHERE id = $1 AND current_price <> $2
            RETURNING id
            ",
        )
        .bind(product_id)
        .bind(snapshot.price)
        .bind(&snapshot.name)
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("INSERT INTO price_history (product_id, recorded_price) VALUES ($1, $2)")
            .bind(product_id)
            .bind(snapshot.price)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn pending_alerts(&self) -> Result<Vec<PriceAlert>> {
        let alerts = sqlx::query_as::<_, PriceAlert>(
            r"
            SELECT t.id AS item_id,
                   u.email AS recipient,
                   p.name AS product_name,
                   p.url AS product_url,
                   t.target_price,
                   p.current_price
            FROM tracked_items t
            JOIN products p ON p.id = t.product_id
            JOIN users u ON u.id = t.user_id
            WHERE t.notified = FALSE AND p.current_price <= t.target_price
            ORDER BY t.id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(alerts)
    }

    async fn mark_notified(&self, item_id: i64, target_price: Decimal) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE tracked_items SET notified = TRUE
            WHERE id = $1 AND target_price = $2 AND notified = FALSE
            ",
        )
        .bind(item_id)
        .bind(target_price)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reset_recovered(&self) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE tracked_items t SET notified = FALSE
            FROM products p
            WHERE p.id = t.product_id
              AND t.notified = TRUE
              AND t.target_price < p.current_price
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn tracked_items_for_user(&self, user_id: i64) -> Result<Vec<TrackedProduct>> {
        let items = sqlx::query_as::<_, TrackedProduct>(
            r"
            SELECT t.id AS item_id,
                   p.id AS product_id,
                   p.url,
                   p.name,
                   p.current_price,
                   t.target_price,
                   t.notified,
                   t.created_at
            FROM tracked_items t
            JOIN products p ON p.id = t.product_id
            WHERE t.user_id = $1
            ORDER BY t.created_at DESC, t.id DESC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    async fn price_series(&self, product_id: i64) -> Result<Vec<PricePoint>> {
        let points = sqlx::query_as::<_, PricePoint>(
            r"
            SELECT recorded_at, recorded_price AS price
            FROM price_history WHERE product_id = $1
            UNION ALL
            SELECT now() AS recorded_at, current_price AS price
            FROM products WHERE id = $1
            ORDER BY recorded_at ASC
            ",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(points)
    }

    async fn untrack(&self, user_id: i64, product_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tracked_items WHERE user_id = $1 AND product_id = $2")
            .bind(user_id)
            .bind(product_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}
