//! The three recurring jobs and the lock-guarded runner that executes them.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use crate::error::Result;
use crate::lock::{self, LockManager};

mod notify;
mod refresh;
mod reset;

pub use notify::TargetNotifier;
pub use refresh::PriceRefresher;
pub use reset::NotificationResetter;

pub const PRICE_REFRESHER_LOCK: &str = "price_refresher_lock";
pub const NOTIFY_TARGETS_LOCK: &str = "notify_targets_lock";
pub const RESET_NOTIFIED_LOCK: &str = "reset_notified_lock";

/// Counters for one job run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    /// Rows the job looked at.
    pub examined: usize,
    /// Rows the job wrote.
    pub changed: usize,
    /// Rows skipped because a collaborator failed.
    pub failed: usize,
}

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cross-process lock that must be held while the job runs.
    fn lock_name(&self) -> &'static str;

    async fn run(&self) -> Result<JobReport>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(JobReport),
    /// Another holder had the job lock; nothing was done.
    Skipped,
}

/// Run `job` only if its lock can be taken right now. The lock is released on
/// every exit path, including errors.
pub async fn run_exclusive(job: &dyn Job, locks: &Arc<dyn LockManager>) -> Result<RunOutcome> {
    let Some(held) = lock::acquire(locks, job.lock_name()).await else {
        info!("Skipping {}: {} is held elsewhere", job.name(), job.lock_name());
        return Ok(RunOutcome::Skipped);
    };

    let result = job.run().await;
    held.release().await;

    match result {
        Ok(report) => {
            info!(
                "{} finished: {} examined, {} changed, {} failed",
                job.name(),
                report.examined,
                report.changed,
                report.failed
            );
            Ok(RunOutcome::Completed(report))
        }
        Err(e) => {
            error!("{} aborted: {}", job.name(), e);
            Err(e)
        }
    }
}
