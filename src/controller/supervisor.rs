//! # Uptime Supervisor
//!
//! Corrects drift between the decided state and whether the load actually
//! answers on the network. Only acts once the decided state has been stable
//! for a minimum age, so a freshly toggled load gets time to boot or halt.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::{
    ActuationStep, ActuatorHandle, PersistedDecision, ProductionState, PulseKind, ReachabilityProbe,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub min_state_age_seconds: u64,
    /// Pause between the long and the short press of a restart
    pub restart_wait_seconds: u64,
    pub shutdown_wait_seconds: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            min_state_age_seconds: 180,
            restart_wait_seconds: 15,
            shutdown_wait_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    /// State too young to judge
    Skipped,
    Consistent,
    Restarted,
    ForcedShutdown,
}

impl SupervisorAction {
    /// Whether an actuation happened and `since` must be reset
    pub fn actuated(self) -> bool {
        matches!(self, Self::Restarted | Self::ForcedShutdown)
    }
}

pub struct UptimeSupervisor {
    config: SupervisorConfig,
    probe: Arc<dyn ReachabilityProbe>,
    actuator: ActuatorHandle,
}

impl UptimeSupervisor {
    pub fn new(config: SupervisorConfig, probe: Arc<dyn ReachabilityProbe>, actuator: ActuatorHandle) -> Self {
        Self {
            config,
            probe,
            actuator,
        }
    }

    pub fn restart_sequence(&self) -> [ActuationStep; 3] {
        [
            ActuationStep::Press(PulseKind::Long),
            ActuationStep::Wait(Duration::from_secs(self.config.restart_wait_seconds)),
            ActuationStep::Press(PulseKind::Short),
        ]
    }

    pub fn shutdown_sequence(&self) -> [ActuationStep; 2] {
        [
            ActuationStep::Press(PulseKind::Long),
            ActuationStep::Wait(Duration::from_secs(self.config.shutdown_wait_seconds)),
        ]
    }

    /// Probe the load once and actuate if it disagrees with `decision`.
    ///
    /// The caller persists a fresh `since` when the returned action actuated.
    pub async fn check(
        &self,
        now: DateTime<FixedOffset>,
        decision: &PersistedDecision,
    ) -> anyhow::Result<SupervisorAction> {
        let age = decision.age(now);
        if age.num_seconds() <= self.config.min_state_age_seconds as i64 {
            debug!(age_s = age.num_seconds(), "state too young for uptime check");
            return Ok(SupervisorAction::Skipped);
        }

        let reachable = match self.probe.is_reachable().await {
            Ok(reachable) => reachable,
            Err(e) => {
                warn!("Reachability probe failed: {}", e);
                return Ok(SupervisorAction::Consistent);
            }
        };

        match (decision.state, reachable) {
            (ProductionState::Production, false) => {
                info!("load unreachable while in production, restarting");
                self.actuator.run(&self.restart_sequence()).await?;
                Ok(SupervisorAction::Restarted)
            }
            (ProductionState::Stop, true) => {
                info!("load reachable while stopped, forcing shutdown");
                self.actuator.run(&self.shutdown_sequence()).await?;
                Ok(SupervisorAction::ForcedShutdown)
            }
            _ => Ok(SupervisorAction::Consistent),
        }
    }
}
