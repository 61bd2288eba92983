pub mod anomaly;
pub mod clock;
pub mod commands;
pub mod engine;
pub mod scheduler;
pub mod snapshot;
pub mod supervisor;

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::domain::{ActuatorHandle, DeviceTelemetryProvider, WeatherProvider};
use crate::error::ControllerError;
use crate::forecast::{GeoLocation, OpenWeatherClient};
use crate::hardware::{DeviceFactory, Devices, SolarmanClient};
use crate::messaging::{MessageTransport, Notifier, TelegramTransport};
use crate::repo::Repositories;

pub use clock::{Clock, ManualClock, SystemClock};
pub use commands::{Command, CommandChannel, CommandKeywords};
pub use engine::{Decision, DecisionEngine, DecisionThresholds};
pub use scheduler::{CycleOutcome, CycleReport, Scheduler, Window};
pub use snapshot::{Snapshot, SnapshotBoard};

const RESTART_DELAY: Duration = Duration::from_secs(5);

/// External collaborators the controller talks to
pub struct Collaborators {
    pub weather: Arc<dyn WeatherProvider>,
    pub telemetry: Arc<dyn DeviceTelemetryProvider>,
    pub transport: Arc<dyn MessageTransport>,
    pub devices: Devices,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub location: GeoLocation,
    pub chat_id: i64,
    pub clock: Arc<dyn Clock>,
    pub weather: Arc<dyn WeatherProvider>,
    pub telemetry: Arc<dyn DeviceTelemetryProvider>,
    pub devices: Devices,
    pub actuator: ActuatorHandle,
    pub notifier: Notifier,
    pub board: SnapshotBoard,
    pub repos: Repositories,
}

impl AppState {
    /// Wire the real HTTP clients and the devices selected by `hardware.mode`
    pub fn new(cfg: Config) -> Result<Self> {
        let tz = cfg.location.tz()?;
        let collaborators = Collaborators {
            weather: Arc::new(OpenWeatherClient::new(&cfg.weather, tz)?),
            telemetry: Arc::new(SolarmanClient::new(&cfg.solarman)?),
            transport: Arc::new(TelegramTransport::new(&cfg.telegram, &cfg.commands)?),
            devices: DeviceFactory::new(cfg.hardware.clone()).create(),
            clock: Arc::new(SystemClock::new(tz)),
        };
        Self::with_collaborators(cfg, collaborators)
    }

    pub fn with_collaborators(cfg: Config, collaborators: Collaborators) -> Result<Self> {
        let location = cfg.location.geo()?;
        let chat_id = cfg
            .telegram
            .chat_id
            .ok_or_else(|| ControllerError::Config("telegram.chat_id must be set".to_string()))?;
        let actuator = ActuatorHandle::new(
            collaborators.devices.actuator.clone(),
            cfg.hardware.short_pulse(),
            cfg.hardware.long_pulse(),
        );

        Ok(Self {
            repos: Repositories::new(&cfg),
            location,
            chat_id,
            clock: collaborators.clock,
            weather: collaborators.weather,
            telemetry: collaborators.telemetry,
            devices: collaborators.devices,
            actuator,
            notifier: Notifier::new(collaborators.transport),
            board: SnapshotBoard::new(),
            cfg: Arc::new(cfg),
        })
    }

    pub fn command_channel(&self) -> CommandChannel {
        CommandChannel::new(
            self.notifier.clone(),
            self.chat_id,
            self.cfg.commands.clone(),
            self.board.clone(),
            self.actuator.clone(),
            self.repos.telemetry.clone(),
            self.cfg.telegram.poll_timeout(),
            Duration::from_secs(self.cfg.telegram.poll_error_backoff_seconds),
        )
    }
}

/// Start the decision loop and the command loop; both stop on `cancel`
pub fn spawn_controller_tasks(state: AppState, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let decision_state = state.clone();
    let decision_cancel = cancel.clone();
    let decision = spawn_supervised("decision-loop", cancel.clone(), move || {
        Scheduler::new(&decision_state).run(decision_cancel.clone())
    });

    let command_cancel = cancel.clone();
    let commands = spawn_supervised("command-loop", cancel, move || {
        state.command_channel().run(command_cancel.clone())
    });

    vec![decision, commands]
}

/// Run the task built by `make`, building and starting a fresh one whenever it panics
pub fn spawn_supervised<F, Fut>(name: &'static str, cancel: CancellationToken, mut make: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match tokio::spawn(make()).await {
                Ok(()) => {
                    info!(task = name, "task finished");
                    break;
                }
                Err(e) if e.is_panic() => {
                    error!(task = name, "task panicked, restarting");
                }
                Err(e) => {
                    warn!(task = name, error = %e, "task aborted");
                    break;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RESTART_DELAY) => {}
            }
        }
    })
}
