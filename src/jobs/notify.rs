use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Job, JobReport, NOTIFY_TARGETS_LOCK};
use crate::database::TrackingStore;
use crate::error::Result;
use crate::traits::Notifier;

/// Sends one alert per tracked item that reached its target.
///
/// Each item is marked notified right after its own send succeeds, so a crash
/// mid-run can at worst repeat the single in-flight alert. A failed send leaves
/// the item armed and the next run retries it; if the transport delivered but
/// reported failure, that retry is a duplicate.
pub struct TargetNotifier {
    store: Arc<dyn TrackingStore>,
    notifier: Arc<dyn Notifier>,
}

impl TargetNotifier {
    pub fn new(store: Arc<dyn TrackingStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }
}

#[async_trait]
impl Job for TargetNotifier {
    fn name(&self) -> &'static str {
        "target notifier"
    }

    fn lock_name(&self) -> &'static str {
        NOTIFY_TARGETS_LOCK
    }

    async fn run(&self) -> Result<JobReport> {
        let alerts = self.store.pending_alerts().await?;
        let mut report = JobReport::default();

        for alert in alerts {
            report.examined += 1;

            if let Err(e) = self.notifier.notify(&alert).await {
                warn!(
                    "Alert for item {} to {} not delivered: {}",
                    alert.item_id, alert.recipient, e
                );
                report.failed += 1;
                continue;
            }

            if self
                .store
                .mark_notified(alert.item_id, alert.target_price)
                .await?
            {
                info!(
                    "Notified {} that {} is at {} (target {})",
                    alert.recipient, alert.product_name, alert.current_price, alert.target_price
                );
                report.changed += 1;
            } else {
                warn!(
                    "Item {} changed while its alert was sent, leaving it armed",
                    alert.item_id
                );
            }
        }

        Ok(report)
    }
}
