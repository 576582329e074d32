use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::info;

use crate::database::TrackingStore;
use crate::error::{Error, Result};
use crate::jobs::{Job, NotificationResetter, PriceRefresher, TargetNotifier};
use crate::lock::LockManager;
use crate::models::{PricePoint, TrackRequest, TrackedItem, TrackedProduct};
use crate::scheduler::{PriceScheduler, ScheduleConfig};
use crate::traits::{Notifier, PriceExtractor};

/// Entry point tying the store, the page extractor, the notifier and the
/// lock manager together.
#[derive(Clone)]
pub struct PriceEngine {
    store: Arc<dyn TrackingStore>,
    extractor: Arc<dyn PriceExtractor>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<dyn LockManager>,
}

impl PriceEngine {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        extractor: Arc<dyn PriceExtractor>,
        notifier: Arc<dyn Notifier>,
        locks: Arc<dyn LockManager>,
    ) -> Self {
        Self {
            store,
            extractor,
            notifier,
            locks,
        }
    }

    pub async fn register_user(&self, email: &str) -> Result<i64> {
        self.store.register_user(email).await
    }

    /// Start tracking `url` for `user_id`, or update an existing target.
    ///
    /// The page is read first so the product is stored under its real name
    /// and price. A target that is not strictly below that price is refused.
    pub async fn track(&self, user_id: i64, url: &str, target_price: Decimal) -> Result<TrackedItem> {
        let snapshot = self.extractor.fetch(url).await?;

        if target_price >= snapshot.price {
            return Err(Error::TargetNotBelowPrice {
                target: target_price,
                current: snapshot.price,
            });
        }

        let item = self
            .store
            .track(&TrackRequest {
                user_id,
                url: url.to_string(),
                name: snapshot.name,
                price: snapshot.price,
                target_price,
            })
            .await?;

        info!(
            "User {} tracking {} at {} (target {})",
            user_id, url, snapshot.price, target_price
        );
        Ok(item)
    }

    pub async fn tracked_items_for_user(&self, user_id: i64) -> Result<Vec<TrackedProduct>> {
        self.store.tracked_items_for_user(user_id).await
    }

    pub async fn price_series(&self, product_id: i64) -> Result<Vec<PricePoint>> {
        self.store.price_series(product_id).await
    }

    pub async fn untrack(&self, user_id: i64, product_id: i64) -> Result<bool> {
        let removed = self.store.untrack(user_id, product_id).await?;
        if removed {
            info!("User {} stopped tracking product {}", user_id, product_id);
        }
        Ok(removed)
    }

    /// Build the scheduler for the refresh, notify and reset jobs, in that order.
    pub fn scheduler(&self, config: &ScheduleConfig) -> PriceScheduler {
        let jobs: Vec<(Arc<dyn Job>, Duration)> = vec![
            (
                Arc::new(PriceRefresher::new(
                    Arc::clone(&self.store),
                    Arc::clone(&self.extractor),
                )),
                config.refresh_interval,
            ),
            (
                Arc::new(TargetNotifier::new(
                    Arc::clone(&self.store),
                    Arc::clone(&self.notifier),
                )),
                config.notify_interval,
            ),
            (
                Arc::new(NotificationResetter::new(Arc::clone(&self.store))),
                config.reset_interval,
            ),
        ];

        PriceScheduler::new(Arc::clone(&self.locks), jobs, config.misfire_grace)
    }
}
