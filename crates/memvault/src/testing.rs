//! Test utilities for memvault - a controllable clock and store fixtures
//!
//! This module provides utilities shared by unit and integration tests:
//! - A manually advanced clock so ranking and scheduling are deterministic
//! - Helpers for writing legacy-generation files straight into a store root

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::clock::Clock;
use crate::storage::StoreLayout;

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// A clock fixed at 2024-06-01T12:00:00Z
    pub fn fixed() -> Self {
        Self::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
                .single()
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        )
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Write a raw legacy unit for `id` under `root`, bypassing the store.
///
/// Reopen the store (or rebuild its index) afterwards to pick it up.
pub fn write_legacy_file(root: &Path, id: &str, body: &Value) -> std::io::Result<()> {
    let layout = StoreLayout::new(root);
    std::fs::create_dir_all(layout.records_dir())?;
    std::fs::write(layout.record_path(id), body.to_string())
}
