//! # Recurring job scheduler
//!
//! Drives the refresher, the target notifier and the resetter on their own
//! cadences with [`tokio_cron_scheduler`]. Each firing is spawned onto the
//! runtime so a slow job never holds up the timer.
//!
//! Inside one process a [`Trigger`] per job lets at most one run be in flight
//! and drops firings that arrive past the misfire grace window. Across
//! processes the scheduler does nothing itself: every run goes through
//! [`run_exclusive`], which takes the job's named lock or skips.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{info, warn};

use crate::error::Result;
use crate::jobs::{run_exclusive, Job, RunOutcome};
use crate::lock::LockManager;

mod trigger;

pub use trigger::{Firing, InFlight, LastFiring, Trigger};

/// Cadences for the three jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub refresh_interval: Duration,
    pub notify_interval: Duration,
    pub reset_interval: Duration,
    pub misfire_grace: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30 * 60),
            notify_interval: Duration::from_secs(30 * 60),
            reset_interval: Duration::from_secs(60 * 60),
            misfire_grace: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of one scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub name: &'static str,
    pub interval_secs: u64,
    pub in_flight: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub last: Option<LastFiring>,
}

struct ScheduledJob {
    job: Arc<dyn Job>,
    trigger: Arc<Trigger>,
}

/// Owns the process's recurring timer. Construct once at startup and share by
/// reference; `start` is idempotent.
pub struct PriceScheduler {
    jobs: Vec<ScheduledJob>,
    locks: Arc<dyn LockManager>,
    timer: tokio::sync::Mutex<Option<JobScheduler>>,
}

impl PriceScheduler {
    /// Jobs run in the given order when triggered together by [`run_all_now`](Self::run_all_now).
    pub fn new(
        locks: Arc<dyn LockManager>,
        jobs: Vec<(Arc<dyn Job>, Duration)>,
        misfire_grace: Duration,
    ) -> Self {
        let jobs = jobs
            .into_iter()
            .map(|(job, interval)| ScheduledJob {
                job,
                trigger: Arc::new(Trigger::new(interval, misfire_grace)),
            })
            .collect();

        Self {
            jobs,
            locks,
            timer: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut timer = self.timer.lock().await;
        if timer.is_some() {
            info!("Scheduler already running");
            return Ok(());
        }

        let sched = JobScheduler::new().await?;

        for scheduled in &self.jobs {
            let job = Arc::clone(&scheduled.job);
            let trigger = Arc::clone(&scheduled.trigger);
            let locks = Arc::clone(&self.locks);

            sched
                .add(CronJob::new_repeated_async(
                    trigger.interval(),
                    move |_uuid, _l| {
                        let job = Arc::clone(&job);
                        let trigger = Arc::clone(&trigger);
                        let locks = Arc::clone(&locks);
                        Box::pin(async move {
                            tokio::spawn(fire(job, trigger, locks, Utc::now()));
                        })
                    },
                )?)
                .await?;

            info!(
                "Scheduled {} every {}s",
                scheduled.job.name(),
                scheduled.trigger.interval().as_secs()
            );
        }

        sched.start().await?;
        *timer = Some(sched);

        info!("Scheduler started with {} jobs", self.jobs.len());
        Ok(())
    }

    /// Run every job once, in registration order, outside the timer's cadence.
    /// Jobs already in flight in this process are skipped.
    pub async fn run_all_now(&self) {
        for scheduled in &self.jobs {
            let Some(in_flight) = scheduled.trigger.claim() else {
                info!("{} already running, not starting another", scheduled.job.name());
                continue;
            };
            execute(&scheduled.job, &scheduled.trigger, &self.locks, Utc::now()).await;
            drop(in_flight);
        }
    }

    /// Stop the timer. A run already in progress finishes on its own.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(mut sched) = self.timer.lock().await.take() else {
            return Ok(());
        };

        sched.shutdown().await?;
        info!("Scheduler stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.timer.lock().await.is_some()
    }

    pub fn status(&self) -> Vec<JobStatus> {
        self.jobs
            .iter()
            .map(|scheduled| {
                let last = scheduled.trigger.last();
                JobStatus {
                    name: scheduled.job.name(),
                    interval_secs: scheduled.trigger.interval().as_secs(),
                    in_flight: scheduled.trigger.is_in_flight(),
                    last_fired_at: last.as_ref().map(|(at, _)| *at),
                    last: last.map(|(_, firing)| firing),
                }
            })
            .collect()
    }
}

async fn fire(
    job: Arc<dyn Job>,
    trigger: Arc<Trigger>,
    locks: Arc<dyn LockManager>,
    now: DateTime<Utc>,
) {
    match trigger.fire(now) {
        Firing::Misfired { late_by } => {
            warn!(
                "Dropping {} firing: {}s late, past the grace window",
                job.name(),
                late_by.as_secs()
            );
            trigger.record(
                now,
                LastFiring::Misfired {
                    late_by_secs: late_by.as_secs(),
                },
            );
        }
        Firing::Overlapping => {
            info!("Previous {} run still in progress, skipping", job.name());
            trigger.record(now, LastFiring::SkippedOverlap);
        }
        Firing::Run(in_flight) => {
            execute(&job, &trigger, &locks, now).await;
            drop(in_flight);
        }
    }
}

async fn execute(
    job: &Arc<dyn Job>,
    trigger: &Trigger,
    locks: &Arc<dyn LockManager>,
    now: DateTime<Utc>,
) {
    let firing = match run_exclusive(job.as_ref(), locks).await {
        Ok(RunOutcome::Completed(report)) => LastFiring::Ran { report },
        Ok(RunOutcome::Skipped) => LastFiring::SkippedLocked,
        Err(e) => LastFiring::Failed {
            error: e.to_string(),
        },
    };
    trigger.record(now, firing);
}
