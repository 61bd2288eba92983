use chrono::{DateTime, FixedOffset, NaiveTime};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use crate::domain::ProductionState;

/// Latest known facts, mirrored for the command loop. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub battery_pct: f64,
    pub power_w: f64,
    pub state: ProductionState,
    pub condition: String,
    pub sunrise: Option<NaiveTime>,
    pub sunset: Option<NaiveTime>,
    pub cloud_pct: f64,
    pub outdoor_temperature_c: Option<f64>,
    pub outdoor_humidity_pct: Option<f64>,
    pub ambient_temperature_c: Option<f64>,
    pub ambient_humidity_pct: Option<f64>,
    pub updated_at: Option<DateTime<FixedOffset>>,
}

/// Single-writer, single-reader board; whole records are swapped under the lock
#[derive(Debug, Clone, Default)]
pub struct SnapshotBoard {
    inner: Arc<Mutex<Snapshot>>,
}

impl SnapshotBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: Snapshot) {
        *self.inner.lock() = snapshot;
    }

    pub fn read(&self) -> Snapshot {
        self.inner.lock().clone()
    }
}
