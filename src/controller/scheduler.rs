//! # Decision loop
//!
//! Wakes on a fixed cadence aligned to the top of the hour. Inside the active
//! window (adjusted sunrise..sunset) it fans out the independent fetches to a
//! bounded worker pool, runs the decision engine and drives the actuator.
//! Outside it the telemetry API is never called; the loop only refreshes the
//! weather and makes sure the load is not left running.

use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveTime, Timelike};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::domain::{
    AccessToken, ActuatorHandle, AmbientSample, DeviceReading, DeviceTelemetryProvider, DisplayFrame,
    DisplayRenderer, PersistedDecision, ProductionState, PulseKind, SensorProvider, WeatherFacts,
    WeatherProvider,
};
use crate::error::Fetched;
use crate::forecast::GeoLocation;
use crate::messaging::Notifier;
use crate::repo::Repositories;

use super::anomaly::AnomalyDetector;
use super::clock::Clock;
use super::engine::{Decision, DecisionEngine};
use super::snapshot::{Snapshot, SnapshotBoard};
use super::supervisor::{SupervisorAction, UptimeSupervisor};
use super::AppState;

/// Delay until the next slot boundary (counted from the top of the hour) plus `offset`
pub fn next_wake_delay(now: DateTime<FixedOffset>, slot: Duration, offset: Duration) -> Duration {
    let slot = slot.as_secs().max(1);
    let since_hour = u64::from(now.minute() * 60 + now.second());
    let target = (since_hour / slot + 1) * slot + offset.as_secs();
    Duration::from_secs(target - since_hour)
        .saturating_sub(Duration::from_nanos(u64::from(now.nanosecond() % 1_000_000_000)))
}

/// Sunrise..sunset inclusive, compared at minute granularity
pub fn in_active_window(now: DateTime<FixedOffset>, weather: &WeatherFacts) -> bool {
    let minute = |t: NaiveTime| (t.hour(), t.minute());
    let now = (now.hour(), now.minute());
    minute(weather.sunrise) <= now && now <= minute(weather.sunset)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Active,
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The engine ran; the decision may or may not have changed the state
    Decided(Decision),
    /// No token or reading this cycle, state kept
    TelemetryUnavailable,
    /// Idle window; `forced_stop` when the load had been left in production
    Idle { forced_stop: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub window: Window,
    pub state: ProductionState,
    pub outcome: CycleOutcome,
}

pub struct Scheduler {
    cfg: SchedulerConfig,
    location: GeoLocation,
    clock: Arc<dyn Clock>,
    weather_provider: Arc<dyn WeatherProvider>,
    telemetry: Arc<dyn DeviceTelemetryProvider>,
    sensor: Arc<dyn SensorProvider>,
    display: Arc<dyn DisplayRenderer>,
    actuator: ActuatorHandle,
    supervisor: UptimeSupervisor,
    engine: DecisionEngine,
    repos: Repositories,
    board: SnapshotBoard,
    notifier: Notifier,
    workers: Arc<Semaphore>,
    detector: AnomalyDetector,
    weather: WeatherFacts,
    ambient: Option<AmbientSample>,
    reading: Option<DeviceReading>,
    state: ProductionState,
}

impl Scheduler {
    pub fn new(app: &AppState) -> Self {
        let cfg = &app.cfg;
        Self {
            cfg: cfg.scheduler.clone(),
            location: app.location.clone(),
            clock: app.clock.clone(),
            weather_provider: app.weather.clone(),
            telemetry: app.telemetry.clone(),
            sensor: app.devices.sensor.clone(),
            display: app.devices.display.clone(),
            actuator: app.actuator.clone(),
            supervisor: UptimeSupervisor::new(cfg.supervisor.clone(), app.devices.probe.clone(), app.actuator.clone()),
            engine: DecisionEngine::new(&cfg.thresholds),
            repos: app.repos.clone(),
            board: app.board.clone(),
            notifier: app.notifier.clone(),
            workers: Arc::new(Semaphore::new(cfg.scheduler.fetch_workers.max(1))),
            detector: AnomalyDetector::new(cfg.anomaly.clone()),
            weather: WeatherFacts::fallback(),
            ambient: None,
            reading: None,
            state: ProductionState::Stop,
        }
    }

    /// Initial weather fetch (for the first window check) and last durable decision
    pub async fn start(&mut self) {
        let now = self.clock.now();
        self.weather = self.fetch_weather().await;
        self.state = self.repos.decisions.load(now).await.state;
        info!(
            state = %self.state,
            sunrise = %self.weather.sunrise,
            sunset = %self.weather.sunset,
            "Decision loop started"
        );
    }

    /// Run until cancelled. A failing cycle is logged and the next one still runs.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.start().await;
        loop {
            match self.run_cycle().await {
                Ok(report) => debug!(?report, "cycle complete"),
                Err(e) => error!("Cycle failed: {:#}", e),
            }

            let delay = next_wake_delay(self.clock.now(), self.cfg.slot(), self.cfg.offset());
            info!(sleep_s = delay.as_secs(), "Sleeping until next slot");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("Decision loop stopped");
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let now = self.clock.now();
        self.reset_quota_if_new_year(now).await?;

        if in_active_window(now, &self.weather) {
            self.active_cycle(now).await
        } else {
            self.idle_cycle(now).await
        }
    }

    async fn reset_quota_if_new_year(&self, now: DateTime<FixedOffset>) -> Result<()> {
        let mut quota = self.repos.quota.load().await;
        if quota.reset_for_new_year(now.date_naive()) {
            info!("New year, resetting telemetry call quota");
            self.repos.quota.save(&quota).await?;
        }
        Ok(())
    }

    async fn active_cycle(&mut self, now: DateTime<FixedOffset>) -> Result<CycleReport> {
        info!(time = %now.format("%Y-%m-%d %H:%M:%S"), "Starting active cycle");

        let mut quota = self.repos.quota.load().await;
        quota.increment();
        self.repos.quota.save(&quota).await?;

        let (weather, token, ambient) = self.fetch_concurrently().await;
        self.weather = weather;
        self.observe_ambient(ambient).await;

        let snapshot = match token {
            Some(token) => self.fetch_reading(&token).await,
            None => None,
        };

        let outcome = match snapshot {
            Some(reading) => {
                self.reading = Some(reading);
                let decision = self.decide(now, &reading).await?;
                CycleOutcome::Decided(decision)
            }
            None => {
                warn!(state = %self.state, "No device reading this cycle, keeping state");
                CycleOutcome::TelemetryUnavailable
            }
        };

        self.publish(now);
        let reading = self.reading.unwrap_or_default();
        self.display
            .render(&DisplayFrame {
                state_text: self.state.to_string(),
                battery_pct: reading.battery_pct,
                power_w: reading.pv_power_w,
                caption: self.weather.current_condition.clone(),
                temperature_c: self.ambient.map(|a| a.temperature_c),
                humidity_pct: self.ambient.map(|a| a.humidity_pct),
            })
            .await;

        info!(
            used = quota.used,
            limit = quota.limit,
            "Quota usage {:.2}%",
            quota.usage_percent()
        );

        Ok(CycleReport {
            window: Window::Active,
            state: self.state,
            outcome,
        })
    }

    async fn idle_cycle(&mut self, now: DateTime<FixedOffset>) -> Result<CycleReport> {
        info!(
            sunrise = %self.weather.sunrise.format("%H:%M"),
            sunset = %self.weather.sunset.format("%H:%M"),
            "Outside active hours"
        );

        self.weather = self.fetch_weather().await;
        let ambient = self.sensor.read().await;
        self.observe_ambient(ambient).await;

        let persisted = self.repos.decisions.load(now).await;
        let forced_stop = persisted.state == ProductionState::Production;
        if forced_stop {
            warn!("Load still in production outside the active window, stopping it");
            self.repos
                .decisions
                .save(&PersistedDecision::new(ProductionState::Stop, now))
                .await?;
            let pressed = self.actuator.press(PulseKind::Short).await;
            if let Err(e) = &pressed {
                error!("Stop press failed: {:#}", e);
            }
            self.notifier
                .notify(&format!(
                    "Load was still in production outside the active window. {}",
                    match pressed {
                        Ok(()) => "Pressed power button to stop it.".to_string(),
                        Err(e) => format!("Pressing the power button failed: {e}"),
                    }
                ))
                .await;
        }
        self.state = ProductionState::Stop;

        self.publish(now);
        self.display
            .render(&DisplayFrame {
                state_text: "sleep".to_string(),
                battery_pct: 0.0,
                power_w: 0.0,
                caption: format!("Sunrise: {}", self.weather.sunrise.format("%H:%M")),
                temperature_c: self.ambient.map(|a| a.temperature_c),
                humidity_pct: self.ambient.map(|a| a.humidity_pct),
            })
            .await;

        Ok(CycleReport {
            window: Window::Idle,
            state: self.state,
            outcome: CycleOutcome::Idle { forced_stop },
        })
    }

    /// Drift check, uptime supervision, then the engine and its side effects
    async fn decide(&mut self, now: DateTime<FixedOffset>, reading: &DeviceReading) -> Result<Decision> {
        let mut persisted = self.repos.decisions.load(now).await;
        if persisted.state != self.state {
            warn!(
                in_memory = %self.state,
                persisted = %persisted.state,
                "Persisted decision drifted, adopting it"
            );
            self.state = persisted.state;
        }

        match self.supervisor.check(now, &persisted).await {
            Ok(action) if action.actuated() => {
                persisted.since = now;
                self.repos.decisions.save(&persisted).await?;
                let text = match action {
                    SupervisorAction::Restarted => "Load did not answer while in production. Restarted it.",
                    _ => "Load answered while stopped. Forced a shutdown.",
                };
                self.notifier.notify(text).await;
            }
            Ok(_) => {}
            Err(e) => error!("Uptime supervision failed: {:#}", e),
        }

        let decision = self.engine.evaluate(self.state, reading, &self.weather, now);
        info!(
            previous = %decision.previous,
            state = %decision.state,
            rule = decision.rule.as_deref().unwrap_or("none"),
            "Decision evaluated"
        );

        if decision.changed() {
            self.repos
                .decisions
                .save(&PersistedDecision::new(decision.state, now))
                .await?;
            self.state = decision.state;
            let pressed = self.actuator.press(PulseKind::Short).await;
            if let Err(e) = &pressed {
                error!("Transition press failed: {:#}", e);
            }
            self.notifier
                .notify(&self.transition_summary(&decision, reading, pressed.is_ok()))
                .await;
        }
        Ok(decision)
    }

    fn transition_summary(&self, decision: &Decision, reading: &DeviceReading, pressed: bool) -> String {
        let headline = match decision.state {
            ProductionState::Production => "Production started!",
            ProductionState::Stop => "Production stopped!",
        };
        let phases = reading.phase_power_w;
        let mut lines = vec![
            headline.to_string(),
            format!("Battery: {:.0}%", reading.battery_pct),
            format!("Power: {:.0}W", reading.pv_power_w),
            format!(
                "Phases: L1 {:.0}W | L2 {:.0}W | L3 {:.0}W | Total {:.0}W",
                phases.l1, phases.l2, phases.l3, phases.total
            ),
            format!(
                "Weather: {} (1h: {}, 3h: {})",
                self.weather.current_condition,
                self.weather.forecast_1h_condition,
                self.weather.forecast_3h_condition
            ),
            format!("Clouds: {:.0}%", self.weather.cloud_pct),
        ];
        if let Some(ambient) = self.ambient {
            lines.push(format!(
                "Ambient: {:.1}C / {:.1}%",
                ambient.temperature_c, ambient.humidity_pct
            ));
        }
        if let Some(reason) = decision.reasons.first() {
            lines.push(format!("Reason: {reason}"));
        }
        if !pressed {
            lines.push("Pressing the power button failed!".to_string());
        }
        lines.join("\n")
    }

    async fn fetch_weather(&self) -> WeatherFacts {
        log_fallback("weather", self.weather_provider.current_and_forecast(&self.location).await)
    }

    async fn fetch_token(&self) -> Option<AccessToken> {
        log_fallback("token", self.telemetry.authenticate().await)
    }

    async fn fetch_reading(&self, token: &AccessToken) -> Option<DeviceReading> {
        let snapshot = log_fallback("reading", self.telemetry.current_reading(token).await)?;
        if let Err(e) = self.repos.telemetry.save(&snapshot).await {
            warn!("Could not store telemetry snapshot: {:#}", e);
        }
        Some(snapshot.reading)
    }

    fn spawn_limited<F, T>(&self, fut: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let workers = self.workers.clone();
        tokio::spawn(async move {
            let _permit = workers.acquire_owned().await.ok();
            fut.await
        })
    }

    /// Weather, token and sensor in parallel under one deadline. A piece that
    /// misses the deadline is detached and fetched again inline.
    async fn fetch_concurrently(&self) -> (WeatherFacts, Option<AccessToken>, Result<AmbientSample>) {
        let deadline = Instant::now() + self.cfg.fetch_timeout();

        let weather_task = {
            let provider = self.weather_provider.clone();
            let location = self.location.clone();
            self.spawn_limited(async move { provider.current_and_forecast(&location).await })
        };
        let token_task = {
            let provider = self.telemetry.clone();
            self.spawn_limited(async move { provider.authenticate().await })
        };
        let sensor_task = {
            let sensor = self.sensor.clone();
            self.spawn_limited(async move { sensor.read().await })
        };

        let weather = match joined("weather", deadline, weather_task).await {
            Some(fetched) => log_fallback("weather", fetched),
            None => self.fetch_weather().await,
        };
        let token = match joined("token", deadline, token_task).await {
            Some(fetched) => log_fallback("token", fetched),
            None => self.fetch_token().await,
        };
        let ambient = match joined("sensor", deadline, sensor_task).await {
            Some(sample) => sample,
            None => self.sensor.read().await,
        };
        (weather, token, ambient)
    }

    async fn observe_ambient(&mut self, sample: Result<AmbientSample>) {
        match sample {
            Ok(sample) => self.ambient = Some(sample),
            Err(e) => warn!("Sensor read failed: {:#}", e),
        }
        let Some(sample) = self.ambient else {
            return;
        };
        info!(
            temperature = sample.temperature_c,
            humidity = sample.humidity_pct,
            "Ambient sample"
        );
        for alert in self.detector.observe(sample) {
            warn!(?alert, "Ambient anomaly");
            self.notifier.notify(&alert.message()).await;
        }
    }

    fn publish(&self, now: DateTime<FixedOffset>) {
        let reading = self.reading.unwrap_or_default();
        self.board.publish(Snapshot {
            battery_pct: reading.battery_pct,
            power_w: reading.pv_power_w,
            state: self.state,
            condition: self.weather.current_condition.clone(),
            sunrise: Some(self.weather.sunrise),
            sunset: Some(self.weather.sunset),
            cloud_pct: self.weather.cloud_pct,
            outdoor_temperature_c: self.weather.temperature_c,
            outdoor_humidity_pct: self.weather.humidity_pct,
            ambient_temperature_c: self.ambient.map(|a| a.temperature_c),
            ambient_humidity_pct: self.ambient.map(|a| a.humidity_pct),
            updated_at: Some(now),
        });
    }
}

/// Join a pooled fetch before `deadline`; `None` when it timed out or panicked
async fn joined<T>(what: &'static str, deadline: Instant, task: JoinHandle<T>) -> Option<T> {
    match timeout_at(deadline, task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(fetch = what, "Pooled fetch failed, fetching inline: {}", e);
            None
        }
        Err(_) => {
            warn!(fetch = what, "Pooled fetch timed out, fetching inline");
            None
        }
    }
}

fn log_fallback<T>(what: &'static str, fetched: Fetched<T>) -> T {
    if let Some(cause) = fetched.cause() {
        warn!(fetch = what, "Using fallback: {}", cause);
    }
    fetched.into_value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(7200)
            .unwrap()
            .with_ymd_and_hms(2024, 7, 1, hour, minute, second)
            .unwrap()
    }

    #[rstest]
    #[case(at(10, 0, 0), 360)]
    #[case(at(10, 1, 0), 300)]
    #[case(at(10, 4, 59), 61)]
    #[case(at(10, 5, 30), 330)]
    #[case(at(10, 58, 0), 180)]
    fn test_next_wake_delay(#[case] now: DateTime<FixedOffset>, #[case] expected_s: u64) {
        let delay = next_wake_delay(now, Duration::from_secs(300), Duration::from_secs(60));
        assert_eq!(delay, Duration::from_secs(expected_s));
    }

    #[test]
    fn test_wake_lands_on_slot_plus_offset() {
        for minute in 0..60 {
            let now = at(9, minute, 17);
            let delay = next_wake_delay(now, Duration::from_secs(300), Duration::from_secs(60));
            let wake = now + chrono::Duration::from_std(delay).unwrap();
            assert_eq!(wake.second(), 0);
            assert_eq!(wake.minute() % 5, 1);
        }
    }

    #[rstest]
    #[case(at(4, 49, 59), false)]
    #[case(at(4, 50, 0), true)]
    #[case(at(12, 0, 0), true)]
    #[case(at(19, 0, 59), true)]
    #[case(at(19, 1, 0), false)]
    fn test_active_window_is_inclusive_by_minute(#[case] now: DateTime<FixedOffset>, #[case] active: bool) {
        let weather = WeatherFacts {
            sunrise: NaiveTime::from_hms_opt(4, 50, 0).unwrap(),
            sunset: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            ..WeatherFacts::fallback()
        };
        assert_eq!(in_active_window(now, &weather), active);
    }
}
