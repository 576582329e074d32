use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{Job, JobReport, RESET_NOTIFIED_LOCK};
use crate::database::TrackingStore;
use crate::error::Result;

/// Re-arms alerts whose price has climbed back above target.
pub struct NotificationResetter {
    store: Arc<dyn TrackingStore>,
}

impl NotificationResetter {
    pub fn new(store: Arc<dyn TrackingStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Job for NotificationResetter {
    fn name(&self) -> &'static str {
        "notification resetter"
    }

    fn lock_name(&self) -> &'static str {
        RESET_NOTIFIED_LOCK
    }

    async fn run(&self) -> Result<JobReport> {
        // A row count; never near usize::MAX.
        let reset = self.store.reset_recovered().await? as usize;

        if reset > 0 {
            info!("Re-armed {} tracked items", reset);
        }

        Ok(JobReport {
            examined: reset,
            changed: reset,
            failed: 0,
        })
    }
}
