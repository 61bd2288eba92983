//! # Command Channel
//!
//! Operator commands arrive over the chat transport. Start/stop presses here
//! are manual overrides: they go straight to the actuator and leave the
//! persisted decision untouched.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{ActuatorHandle, PhasePowers, PulseKind};
use crate::messaging::{InboundMessage, MessageTransport, Notifier};
use crate::repo::TelemetrySnapshotRepository;
use crate::utils::SystemMetrics;

use super::snapshot::{Snapshot, SnapshotBoard};

/// Keyword for each command, matched exactly after trimming
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandKeywords {
    pub status: String,
    pub start: String,
    pub stop: String,
    pub force_stop: String,
    pub phases: String,
}

impl Default for CommandKeywords {
    fn default() -> Self {
        Self {
            status: "/now".to_string(),
            start: "/start".to_string(),
            stop: "/stop".to_string(),
            force_stop: "/force_stop".to_string(),
            phases: "/phases".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Status,
    Start,
    Stop,
    ForceStop,
    Phases,
}

impl CommandKeywords {
    /// `/now@SomeBot` addresses the same command as `/now`
    pub fn parse(&self, text: &str) -> Option<Command> {
        let word = text.trim();
        let word = word.split_once('@').map_or(word, |(head, _)| head);
        [
            (&self.status, Command::Status),
            (&self.start, Command::Start),
            (&self.stop, Command::Stop),
            (&self.force_stop, Command::ForceStop),
            (&self.phases, Command::Phases),
        ]
        .into_iter()
        .find(|(keyword, _)| keyword.as_str() == word)
        .map(|(_, command)| command)
    }
}

pub struct CommandChannel {
    transport: Arc<dyn MessageTransport>,
    notifier: Notifier,
    chat_id: i64,
    keywords: CommandKeywords,
    board: SnapshotBoard,
    actuator: ActuatorHandle,
    telemetry: TelemetrySnapshotRepository,
    poll_timeout: Duration,
    error_backoff: Duration,
    last_update_id: Option<i64>,
}

impl CommandChannel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        notifier: Notifier,
        chat_id: i64,
        keywords: CommandKeywords,
        board: SnapshotBoard,
        actuator: ActuatorHandle,
        telemetry: TelemetrySnapshotRepository,
        poll_timeout: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            transport: notifier.transport().clone(),
            notifier,
            chat_id,
            keywords,
            board,
            actuator,
            telemetry,
            poll_timeout,
            error_backoff,
            last_update_id: None,
        }
    }

    pub fn last_update_id(&self) -> Option<i64> {
        self.last_update_id
    }

    /// Long-poll until cancelled. Transport errors only delay the next poll.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Command channel started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.poll_once() => {
                    if let Err(e) = result {
                        warn!("Polling for commands failed: {:#}", e);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(self.error_backoff) => {}
                        }
                    }
                }
            }
        }
        info!("Command channel stopped");
    }

    /// One long-poll round; returns how many commands were handled
    pub async fn poll_once(&mut self) -> Result<usize> {
        let updates = self
            .transport
            .poll_updates(self.last_update_id, self.poll_timeout)
            .await?;

        let mut handled = 0;
        for update in updates {
            self.last_update_id = Some(self.last_update_id.map_or(update.id, |last| last.max(update.id)));
            if let Some(command) = self.accept(&update) {
                self.handle(command).await;
                handled += 1;
            }
        }
        Ok(handled)
    }

    fn accept(&self, update: &InboundMessage) -> Option<Command> {
        if update.chat_id != Some(self.chat_id) {
            debug!(update_id = update.id, chat_id = ?update.chat_id, "ignoring update from another chat");
            return None;
        }
        let text = update.text.as_deref()?;
        let command = self.keywords.parse(text);
        if command.is_none() {
            debug!(update_id = update.id, "ignoring unrecognized message");
        }
        command
    }

    pub async fn handle(&self, command: Command) {
        info!(?command, "Handling operator command");
        let reply = match command {
            Command::Status => {
                let metrics = SystemMetrics::collect().await;
                let phases = self.telemetry.last_phase_powers().await;
                status_report(&self.board.read(), &metrics, phases.as_ref())
            }
            Command::Phases => phases_report(self.telemetry.last_phase_powers().await.as_ref()),
            Command::Start => self.press(PulseKind::Short, "Production started manually. Pressed power button.").await,
            Command::Stop => self.press(PulseKind::Short, "Production stopped manually. Pressed power button.").await,
            Command::ForceStop => {
                let secs = self.actuator.pulse_duration(PulseKind::Long).as_secs();
                self.press(
                    PulseKind::Long,
                    &format!("Production force stopped. Held power button for {secs} seconds."),
                )
                .await
            }
        };
        self.notifier.notify(&reply).await;
    }

    async fn press(&self, kind: PulseKind, done: &str) -> String {
        match self.actuator.press(kind).await {
            Ok(()) => done.to_string(),
            Err(e) => {
                warn!("Manual actuation failed: {:#}", e);
                format!("Pressing the power button failed: {e}")
            }
        }
    }
}

fn opt(value: Option<f64>, unit: &str) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v:.1}{unit}"))
}

fn hhmm(time: Option<chrono::NaiveTime>) -> String {
    time.map_or_else(|| "N/A".to_string(), |t| t.format("%H:%M").to_string())
}

pub fn status_report(snapshot: &Snapshot, metrics: &SystemMetrics, phases: Option<&PhasePowers>) -> String {
    let mut lines = vec![
        format!("Battery: {:.0}%", snapshot.battery_pct),
        format!("Power: {:.0}W", snapshot.power_w),
        format!("State: {}", snapshot.state),
        format!("Condition: {}", if snapshot.condition.is_empty() { "N/A" } else { &snapshot.condition }),
        format!("Temperature: {}", opt(snapshot.outdoor_temperature_c, "C")),
        format!("Humidity: {}", opt(snapshot.outdoor_humidity_pct, "%")),
        format!("Sunrise: {}", hhmm(snapshot.sunrise)),
        format!("Sunset: {}", hhmm(snapshot.sunset)),
        format!("Clouds: {:.0}%", snapshot.cloud_pct),
        format!("Ambient Temp: {}", opt(snapshot.ambient_temperature_c, "C")),
        format!("Ambient Humidity: {}", opt(snapshot.ambient_humidity_pct, "%")),
    ];
    lines.extend(metrics.lines());
    lines.push(phases_report(phases));
    lines.join("\n")
}

pub fn phases_report(phases: Option<&PhasePowers>) -> String {
    match phases {
        Some(p) => format!(
            "Phases: L1 {:.0}W | L2 {:.0}W | L3 {:.0}W | Total {:.0}W",
            p.l1, p.l2, p.l3, p.total
        ),
        None => "Phases: N/A".to_string(),
    }
}
