use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use std::path::PathBuf;
use tracing::warn;

use crate::domain::{PersistedDecision, ProductionState};

use super::store::JsonFileStore;

/// Durable `{state, since}` record
#[derive(Debug, Clone)]
pub struct DecisionRepository {
    store: JsonFileStore,
}

impl DecisionRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonFileStore::new(path),
        }
    }

    /// Last persisted decision, or `stop` since `now` when none is usable
    pub async fn load(&self, now: DateTime<FixedOffset>) -> PersistedDecision {
        match self.store.load::<PersistedDecision>().await {
            Ok(Some(decision)) => decision,
            Ok(None) => PersistedDecision::new(ProductionState::Stop, now),
            Err(e) => {
                warn!("Ignoring unreadable decision record: {:#}", e);
                PersistedDecision::new(ProductionState::Stop, now)
            }
        }
    }

    pub async fn save(&self, decision: &PersistedDecision) -> Result<()> {
        self.store.save(decision).await
    }
}
