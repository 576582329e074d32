use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::jobs::JobReport;

/// What happened the last time a job's timer fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LastFiring {
    Ran { report: JobReport },
    /// Another process held the job lock.
    SkippedLocked,
    /// The previous run in this process was still going.
    SkippedOverlap,
    Misfired { late_by_secs: u64 },
    Failed { error: String },
}

/// Decision for one timer firing.
#[derive(Debug)]
pub enum Firing {
    Run(InFlight),
    Overlapping,
    Misfired { late_by: Duration },
}

/// Marks a job as running in this process until dropped.
#[derive(Debug)]
pub struct InFlight {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Per-job firing gate: drops firings that arrive too late and coalesces
/// firings that overlap a run still in progress.
#[derive(Debug)]
pub struct Trigger {
    interval: Duration,
    grace: Duration,
    next_due: Mutex<Option<DateTime<Utc>>>,
    in_flight: Arc<AtomicBool>,
    last: Mutex<Option<(DateTime<Utc>, LastFiring)>>,
}

impl Trigger {
    pub fn new(interval: Duration, grace: Duration) -> Self {
        Self {
            interval,
            grace,
            next_due: Mutex::new(None),
            in_flight: Arc::new(AtomicBool::new(false)),
            last: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Decide what to do with a firing observed at `now`.
    ///
    /// The first firing is always on time. Afterwards each firing is expected
    /// one interval after the previous one; arriving early is fine, arriving
    /// later than the grace window is a misfire.
    pub fn fire(&self, now: DateTime<Utc>) -> Firing {
        let late_by = {
            let mut next_due = self.next_due.lock().unwrap_or_else(PoisonError::into_inner);
            let late_by = (*next_due)
                .and_then(|due| (now - due).to_std().ok())
                .unwrap_or(Duration::ZERO);
            *next_due = chrono::Duration::from_std(self.interval)
                .ok()
                .and_then(|interval| now.checked_add_signed(interval));
            late_by
        };

        if late_by > self.grace {
            return Firing::Misfired { late_by };
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Firing::Overlapping;
        }

        Firing::Run(InFlight {
            flag: Arc::clone(&self.in_flight),
        })
    }

    /// Claim the job for an unscheduled run, ignoring cadence.
    pub fn claim(&self) -> Option<InFlight> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight {
                flag: Arc::clone(&self.in_flight),
            })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn record(&self, at: DateTime<Utc>, firing: LastFiring) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some((at, firing));
    }

    pub fn last(&self) -> Option<(DateTime<Utc>, LastFiring)> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn on_time_and_slightly_late_firings_run() {
        let trigger = Trigger::new(30 * MINUTE, MINUTE);

        assert!(matches!(trigger.fire(at(0)), Firing::Run(_)));
        assert!(matches!(trigger.fire(at(1800)), Firing::Run(_)));
        assert!(matches!(trigger.fire(at(3600 + 59)), Firing::Run(_)));
    }

    #[test]
    fn early_firing_runs() {
        let trigger = Trigger::new(30 * MINUTE, MINUTE);

        drop(trigger.fire(at(0)));
        assert!(matches!(trigger.fire(at(1790)), Firing::Run(_)));
    }

    #[test]
    fn firing_past_the_grace_window_is_dropped() {
        let trigger = Trigger::new(30 * MINUTE, MINUTE);

        drop(trigger.fire(at(0)));
        match trigger.fire(at(1800 + 61)) {
            Firing::Misfired { late_by } => assert_eq!(late_by, Duration::from_secs(61)),
            other => panic!("expected misfire, got {other:?}"),
        }

        // The schedule re-anchors on the dropped firing.
        assert!(matches!(trigger.fire(at(1861 + 1800)), Firing::Run(_)));
    }

    #[test]
    fn overlapping_firing_is_coalesced() {
        let trigger = Trigger::new(MINUTE, MINUTE);

        let running = trigger.fire(at(0));
        assert!(matches!(running, Firing::Run(_)));
        assert!(trigger.is_in_flight());
        assert!(matches!(trigger.fire(at(60)), Firing::Overlapping));
        assert!(trigger.claim().is_none());

        drop(running);
        assert!(!trigger.is_in_flight());
        assert!(matches!(trigger.fire(at(120)), Firing::Run(_)));
    }

    #[test]
    fn records_last_firing() {
        let trigger = Trigger::new(MINUTE, MINUTE);
        assert!(trigger.last().is_none());

        trigger.record(at(5), LastFiring::SkippedLocked);

        assert_eq!(trigger.last(), Some((at(5), LastFiring::SkippedLocked)));
    }
}
