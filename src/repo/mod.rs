use crate::config::Config;

pub mod decisions;
pub mod quota;
pub mod snapshots;
pub mod store;

pub use decisions::DecisionRepository;
pub use quota::QuotaRepository;
pub use snapshots::TelemetrySnapshotRepository;
pub use store::JsonFileStore;

/// File-backed state; the crash-recovery boundary of the controller
#[derive(Debug, Clone)]
pub struct Repositories {
    pub decisions: DecisionRepository,
    pub quota: QuotaRepository,
    pub telemetry: TelemetrySnapshotRepository,
}

impl Repositories {
    pub fn new(cfg: &Config) -> Self {
        Self {
            decisions: DecisionRepository::new(&cfg.storage.decision_file),
            quota: QuotaRepository::new(&cfg.storage.quota_file, cfg.quota.limit),
            telemetry: TelemetrySnapshotRepository::new(&cfg.storage.telemetry_file),
        }
    }
}
