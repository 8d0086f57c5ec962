//! Snapshots and their schedule

pub mod scheduler;
pub mod snapshot;

pub use scheduler::{BackupScheduler, SchedulerState, SchedulerStatus};
pub use snapshot::{
    SnapshotInfo, SnapshotMetadata, SnapshotOutcome, SnapshotWriter, list_snapshots, prune,
    restore,
};
