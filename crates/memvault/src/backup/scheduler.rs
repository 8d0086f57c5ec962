//! Periodic snapshot scheduling
//!
//! The scheduler is a small state machine, `Idle -> Running -> Idle`. A run
//! starts when the interval has elapsed since the start of the last
//! successful snapshot, or when triggered manually. Failures are logged and
//! leave the scheduler idle; the loop tries again one interval later.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, watch};

use crate::backup::snapshot::{SnapshotInfo, SnapshotOutcome, SnapshotWriter, list_snapshots};
use crate::clock::SharedClock;
use crate::error::{MemvaultError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub last_success: Option<DateTime<Utc>>,
    /// Time and message of the most recent failed run
    pub last_failure: Option<(DateTime<Utc>, String)>,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            last_success: None,
            last_failure: None,
        }
    }
}

pub struct BackupScheduler {
    writer: SnapshotWriter,
    interval: StdDuration,
    clock: SharedClock,
    status: Mutex<SchedulerStatus>,
    trigger: Notify,
}

impl BackupScheduler {
    pub fn new(writer: SnapshotWriter, interval: StdDuration, clock: SharedClock) -> Self {
        Self {
            writer,
            interval,
            clock,
            status: Mutex::new(SchedulerStatus::default()),
            trigger: Notify::new(),
        }
    }

    /// Seed `last_success` from the newest snapshot already on disk, so a
    /// restart does not immediately snapshot again.
    pub async fn resume(&self) -> Result<()> {
        let newest = list_snapshots(self.writer.backup_root()).await?.into_iter().next();
        if let Some(snapshot) = newest {
            tracing::debug!("Resuming backup schedule after {}", snapshot.name);
            self.status_mut().last_success = Some(snapshot.metadata.created_at);
        }
        Ok(())
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status_mut().clone()
    }

    /// Whether a periodic run is due at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.time_until_due(now).is_zero()
    }

    /// How long after `now` the next periodic run falls due.
    ///
    /// A `last_success` in the future (the clock stepped back) counts as
    /// zero elapsed time.
    pub fn time_until_due(&self, now: DateTime<Utc>) -> StdDuration {
        let Some(last) = self.status_mut().last_success else {
            return StdDuration::ZERO;
        };
        let elapsed = (now - last).to_std().unwrap_or(StdDuration::ZERO);
        self.interval.saturating_sub(elapsed)
    }

    /// Request a run on the next turn of the loop regardless of the interval.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Perform one snapshot and update the status.
    ///
    /// `last_success` becomes the snapshot's creation time, so the schedule
    /// is measured from the start of each run. A second call while a run is
    /// in flight is refused.
    pub async fn run_once(&self, shutdown: &watch::Receiver<bool>) -> Result<Option<SnapshotInfo>> {
        {
            let mut status = self.status_mut();
            if status.state == SchedulerState::Running {
                return Err(MemvaultError::Write("a snapshot is already running".to_string()));
            }
            status.state = SchedulerState::Running;
        }

        let result = self.writer.create(shutdown).await;

        let mut status = self.status_mut();
        status.state = SchedulerState::Idle;
        match result {
            Ok(SnapshotOutcome::Completed(info)) => {
                status.last_success = Some(info.metadata.created_at);
                Ok(Some(info))
            }
            Ok(SnapshotOutcome::Aborted) => Ok(None),
            Err(e) => {
                tracing::warn!("Backup failed, will retry in {}s: {}", self.interval.as_secs(), e);
                status.last_failure = Some((self.clock.now(), e.to_string()));
                Err(e)
            }
        }
    }

    /// Run until `shutdown` becomes `true`.
    ///
    /// Each turn sleeps until the next run is due. After a failed run the
    /// loop waits one full interval before trying again.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Backup scheduler started (interval {}s, root {})",
            self.interval.as_secs(),
            self.writer.backup_root().display()
        );

        let mut failed = false;
        loop {
            let wait = if failed {
                self.interval
            } else {
                self.time_until_due(self.clock.now())
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    failed = self.run_once(&shutdown).await.is_err();
                }
                _ = self.trigger.notified() => {
                    tracing::info!("Manual backup requested");
                    failed = self.run_once(&shutdown).await.is_err();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }

        tracing::info!("Backup scheduler stopped");
    }

    fn status_mut(&self) -> std::sync::MutexGuard<'_, SchedulerStatus> {
        self.status.lock().unwrap_or_else(|p| p.into_inner())
    }
}
