use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Job, JobReport, PRICE_REFRESHER_LOCK};
use crate::database::TrackingStore;
use crate::error::Result;
use crate::traits::PriceExtractor;

/// Re-reads every tracked product's page and stores prices that moved.
pub struct PriceRefresher {
    store: Arc<dyn TrackingStore>,
    extractor: Arc<dyn PriceExtractor>,
}

impl PriceRefresher {
    pub fn new(store: Arc<dyn TrackingStore>, extractor: Arc<dyn PriceExtractor>) -> Self {
        Self { store, extractor }
    }
}

#[async_trait]
impl Job for PriceRefresher {
    fn name(&self) -> &'static str {
        "price refresher"
    }

    fn lock_name(&self) -> &'static str {
        PRICE_REFRESHER_LOCK
    }

    async fn run(&self) -> Result<JobReport> {
        let products = self.store.products().await?;
        let mut report = JobReport::default();

        for product in products {
            report.examined += 1;

            let snapshot = match self.extractor.fetch(&product.url).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Skipping product {}: {}", product.id, e);
                    report.failed += 1;
                    continue;
                }
            };

            if snapshot.price == product.current_price {
                continue;
            }

            if self.store.record_price(product.id, &snapshot).await? {
                info!(
                    "Price updated for {}: {} -> {}",
                    product.url, product.current_price, snapshot.price
                );
                report.changed += 1;
            }
        }

        Ok(report)
    }
}
