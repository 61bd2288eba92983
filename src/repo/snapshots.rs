use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::domain::{DeviceSnapshot, PhasePowers};

use super::store::JsonFileStore;

const PHASE_POWERS_KEY: &str = "phasePowers";

#[derive(Debug, Deserialize)]
struct StoredPhases {
    #[serde(rename = "phasePowers")]
    phase_powers: PhasePowers,
}

/// Last raw device payload, annotated with the derived per-phase powers
#[derive(Debug, Clone)]
pub struct TelemetrySnapshotRepository {
    store: JsonFileStore,
}

impl TelemetrySnapshotRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonFileStore::new(path),
        }
    }

    pub async fn save(&self, snapshot: &DeviceSnapshot) -> Result<()> {
        let phases = snapshot.reading.phase_power_w;
        let mut document = match &snapshot.raw {
            Value::Object(_) => snapshot.raw.clone(),
            other => json!({ "payload": other }),
        };
        if let Value::Object(map) = &mut document {
            map.insert(
                PHASE_POWERS_KEY.to_string(),
                json!({
                    "L1": phases.l1,
                    "L2": phases.l2,
                    "L3": phases.l3,
                    "total": phases.total,
                    "unit": "W",
                }),
            );
        }
        self.store.save(&document).await
    }

    /// `None` before the first active cycle ever wrote a snapshot
    pub async fn last_phase_powers(&self) -> Option<PhasePowers> {
        match self.store.load::<StoredPhases>().await {
            Ok(Some(stored)) => Some(stored.phase_powers),
            _ => None,
        }
    }
}
