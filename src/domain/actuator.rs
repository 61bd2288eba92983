use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use super::providers::ReachabilityProbe;

/// Power-button actuator - abstraction for a GPIO line or a simulated button
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Hold the button for `duration`, then release it
    async fn pulse(&self, duration: Duration) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseKind {
    /// Toggles run/stop
    Short,
    /// Forces a hard stop (or the first half of a restart)
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuationStep {
    Press(PulseKind),
    Wait(Duration),
}

/// Shared, serialized access to the actuator.
///
/// Both the decision loop and the command loop press the button; the lock is
/// held for a whole press sequence so presses never interleave.
#[derive(Clone)]
pub struct ActuatorHandle {
    actuator: Arc<dyn Actuator>,
    lock: Arc<tokio::sync::Mutex<()>>,
    short_pulse: Duration,
    long_pulse: Duration,
}

impl ActuatorHandle {
    pub fn new(actuator: Arc<dyn Actuator>, short_pulse: Duration, long_pulse: Duration) -> Self {
        Self {
            actuator,
            lock: Arc::new(tokio::sync::Mutex::new(())),
            short_pulse,
            long_pulse,
        }
    }

    pub fn pulse_duration(&self, kind: PulseKind) -> Duration {
        match kind {
            PulseKind::Short => self.short_pulse,
            PulseKind::Long => self.long_pulse,
        }
    }

    pub async fn press(&self, kind: PulseKind) -> Result<()> {
        self.run(&[ActuationStep::Press(kind)]).await
    }

    pub async fn run(&self, steps: &[ActuationStep]) -> Result<()> {
        let _guard = self.lock.lock().await;
        for step in steps {
            match *step {
                ActuationStep::Press(kind) => {
                    let duration = self.pulse_duration(kind);
                    info!(?kind, duration_ms = duration.as_millis() as u64, "pressing power button");
                    self.actuator.pulse(duration).await?;
                }
                ActuationStep::Wait(duration) => {
                    debug!(wait_ms = duration.as_millis() as u64, "waiting between presses");
                    sleep(duration).await;
                }
            }
        }
        Ok(())
    }
}

/// Simulated load behind the power button, for development and testing.
///
/// Remembers every pulse. A pulse shorter than the hold threshold toggles the
/// load, a longer one forces it off; the resulting run state doubles as a
/// reachability probe.
#[derive(Debug)]
pub struct SimulatedActuator {
    pulses: Mutex<Vec<Duration>>,
    running: AtomicBool,
    hold_threshold: Duration,
}

impl Default for SimulatedActuator {
    fn default() -> Self {
        Self::with_hold_threshold(Duration::from_secs(4))
    }
}

impl SimulatedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hold_threshold(hold_threshold: Duration) -> Self {
        Self {
            pulses: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            hold_threshold,
        }
    }

    pub fn pulses(&self) -> Vec<Duration> {
        self.pulses.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

#[async_trait]
impl Actuator for SimulatedActuator {
    async fn pulse(&self, duration: Duration) -> Result<()> {
        self.pulses.lock().push(duration);
        if duration >= self.hold_threshold {
            self.running.store(false, Ordering::SeqCst);
        } else {
            self.running.fetch_xor(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl ReachabilityProbe for SimulatedActuator {
    async fn is_reachable(&self) -> Result<bool> {
        Ok(self.is_running())
    }
}
