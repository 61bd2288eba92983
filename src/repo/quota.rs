use anyhow::Result;
use std::path::PathBuf;

use crate::domain::QuotaCounter;

use super::store::JsonFileStore;

/// Yearly call counter for the telemetry API
#[derive(Debug, Clone)]
pub struct QuotaRepository {
    store: JsonFileStore,
    limit: u64,
}

impl QuotaRepository {
    pub fn new(path: impl Into<PathBuf>, limit: u64) -> Self {
        Self {
            store: JsonFileStore::new(path),
            limit,
        }
    }

    /// The configured limit always replaces whatever was stored
    pub async fn load(&self) -> QuotaCounter {
        let mut counter: QuotaCounter = self.store.load_or_default().await;
        counter.limit = self.limit;
        counter
    }

    pub async fn save(&self, counter: &QuotaCounter) -> Result<()> {
        self.store.save(counter).await
    }
}
