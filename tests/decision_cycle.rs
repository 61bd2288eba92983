use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone};
use figment::providers::{Format, Toml};
use figment::Figment;
use parking_lot::Mutex;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use solar_miner_controller::config::Config;
use solar_miner_controller::controller::{
    AppState, Collaborators, CycleOutcome, ManualClock, Scheduler, Window,
};
use solar_miner_controller::domain::{
    AccessToken, AmbientSample, DeviceReading, DeviceSnapshot, DeviceTelemetryProvider,
    PersistedDecision, PhasePowers, ProductionState, SensorProvider, SimulatedActuator, WeatherFacts,
    WeatherProvider,
};
use solar_miner_controller::error::Fetched;
use solar_miner_controller::forecast::GeoLocation;
use solar_miner_controller::hardware::{Devices, LogDisplay};
use solar_miner_controller::messaging::{InboundMessage, MessageTransport};
use solar_miner_controller::repo::{DecisionRepository, QuotaRepository};

const SHORT: Duration = Duration::from_millis(550);
const LONG: Duration = Duration::from_millis(10_000);

/// Counts calls and never returns from the `hang_on`-th one (1-based)
#[derive(Default)]
struct Stall {
    calls: AtomicUsize,
    hang_on: Option<usize>,
}

impl Stall {
    fn on_call(n: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            hang_on: Some(n),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang_on == Some(call) {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Default)]
struct FixedWeather {
    stall: Stall,
}

#[async_trait]
impl WeatherProvider for FixedWeather {
    async fn current_and_forecast(&self, _location: &GeoLocation) -> Fetched<WeatherFacts> {
        self.stall.enter().await;
        Fetched::Fresh(sunny())
    }
}

#[derive(Default)]
struct FixedSensor {
    stall: Stall,
}

#[async_trait]
impl SensorProvider for FixedSensor {
    async fn read(&self) -> Result<AmbientSample> {
        self.stall.enter().await;
        Ok(AmbientSample {
            temperature_c: 22.0,
            humidity_pct: 45.0,
        })
    }
}

struct FakeTelemetry {
    token: bool,
    reading: Mutex<DeviceReading>,
    auth: Stall,
}

impl FakeTelemetry {
    fn new(token: bool, reading: DeviceReading) -> Self {
        Self {
            token,
            reading: Mutex::new(reading),
            auth: Stall::default(),
        }
    }

    fn stalling_auth(mut self, on_call: usize) -> Self {
        self.auth = Stall::on_call(on_call);
        self
    }
}

#[async_trait]
impl DeviceTelemetryProvider for FakeTelemetry {
    async fn authenticate(&self) -> Fetched<Option<AccessToken>> {
        self.auth.enter().await;
        if self.token {
            Fetched::Fresh(Some(AccessToken("tok".to_string())))
        } else {
            Fetched::fallback(None, "auth rejected")
        }
    }

    async fn current_reading(&self, _token: &AccessToken) -> Fetched<Option<DeviceSnapshot>> {
        let reading = *self.reading.lock();
        Fetched::Fresh(Some(DeviceSnapshot {
            raw: json!({ "deviceSn": "SN", "dataList": [] }),
            reading,
        }))
    }
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn send(&self, text: &str) -> Result<()> {
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    async fn poll_updates(&self, _after: Option<i64>, _timeout: Duration) -> Result<Vec<InboundMessage>> {
        Ok(Vec::new())
    }
}

struct Rig {
    dir: PathBuf,
    scheduler: Scheduler,
    clock: Arc<ManualClock>,
    load: Arc<SimulatedActuator>,
    weather: Arc<FixedWeather>,
    sensor: Arc<FixedSensor>,
    telemetry: Arc<FakeTelemetry>,
    transport: Arc<RecordingTransport>,
}

fn local(month: u32, day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(3600)
        .unwrap()
        .with_ymd_and_hms(2025, month, day, hour, minute, 0)
        .unwrap()
}

fn sunny() -> WeatherFacts {
    WeatherFacts {
        current_condition: "clear sky".to_string(),
        forecast_1h_condition: "few clouds".to_string(),
        forecast_3h_condition: "few clouds".to_string(),
        cloud_pct: 10.0,
        sunrise: NaiveTime::from_hms_opt(5, 0, 0).unwrap(),
        sunset: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        temperature_c: Some(25.0),
        humidity_pct: Some(40.0),
    }
}

fn reading(battery_pct: f64, pv_power_w: f64) -> DeviceReading {
    DeviceReading {
        battery_pct,
        pv_power_w,
        ..Default::default()
    }
}

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("smc-cycle-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config(dir: &Path) -> Config {
    let toml = format!(
        r#"
        [location]
        latitude = 47.4979
        longitude = 19.0402

        [weather]
        api_key = "weather-key"

        [solarman]
        app_id = "app"
        app_secret = "secret"
        email = "owner@example.invalid"
        password = "pw"
        device_sn = "SN"

        [telegram]
        bot_token = "1:abc"
        chat_id = 42

        [storage]
        quota_file = "{quota}"
        decision_file = "{decision}"
        telemetry_file = "{telemetry}"

        [scheduler]
        fetch_timeout_seconds = 5

        [supervisor]
        restart_wait_seconds = 0
        shutdown_wait_seconds = 0
        "#,
        quota = dir.join("quota.json").display(),
        decision = dir.join("state.json").display(),
        telemetry = dir.join("solarman.json").display(),
    );
    Config::from_figment(Figment::new().merge(Toml::string(&toml))).unwrap()
}

async fn rig(now: DateTime<FixedOffset>, telemetry: FakeTelemetry, prepare: impl FnOnce(&Path)) -> Rig {
    rig_with(now, FixedWeather::default(), FixedSensor::default(), telemetry, prepare).await
}

async fn rig_with(
    now: DateTime<FixedOffset>,
    weather: FixedWeather,
    sensor: FixedSensor,
    telemetry: FakeTelemetry,
    prepare: impl FnOnce(&Path),
) -> Rig {
    let dir = temp_dir();
    prepare(&dir);

    let clock = Arc::new(ManualClock::new(now));
    let load = Arc::new(SimulatedActuator::with_hold_threshold(LONG));
    let weather = Arc::new(weather);
    let sensor = Arc::new(sensor);
    let telemetry = Arc::new(telemetry);
    let transport = Arc::new(RecordingTransport::default());

    let state = AppState::with_collaborators(
        config(&dir),
        Collaborators {
            weather: weather.clone(),
            telemetry: telemetry.clone(),
            transport: transport.clone(),
            devices: Devices {
                actuator: load.clone(),
                probe: load.clone(),
                sensor: sensor.clone(),
                display: Arc::new(LogDisplay),
            },
            clock: clock.clone(),
        },
    )
    .unwrap();

    let mut scheduler = Scheduler::new(&state);
    scheduler.start().await;
    Rig {
        dir,
        scheduler,
        clock,
        load,
        weather,
        sensor,
        telemetry,
        transport,
    }
}

fn write_decision(dir: &Path, state: &str, since: &str) {
    std::fs::write(
        dir.join("state.json"),
        format!(r#"{{"state": "{state}", "since": "{since}"}}"#),
    )
    .unwrap();
}

#[tokio::test]
async fn test_sunny_morning_with_full_battery_starts_production_once() {
    let mut rig = rig(local(6, 3, 9, 1), FakeTelemetry::new(true, reading(95.0, 3000.0)), |_| {}).await;

    let report = rig.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.window, Window::Active);
    assert_eq!(report.state, ProductionState::Production);
    assert!(matches!(report.outcome, CycleOutcome::Decided(ref d) if d.changed()));
    assert_eq!(rig.load.pulses(), vec![SHORT]);
    let sent = rig.transport.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Production started"));
    assert!(sent[0].contains("Battery: 95%"));

    let persisted = DecisionRepository::new(rig.dir.join("state.json"))
        .load(local(6, 3, 9, 1))
        .await;
    assert_eq!(persisted, PersistedDecision::new(ProductionState::Production, local(6, 3, 9, 1)));

    // Same inputs five minutes later: no second press, no second message
    rig.clock.advance(chrono::Duration::minutes(5));
    let report = rig.scheduler.run_cycle().await.unwrap();
    assert!(matches!(report.outcome, CycleOutcome::Decided(ref d) if !d.changed()));
    assert_eq!(rig.load.pulses(), vec![SHORT]);
    assert_eq!(rig.transport.sent.lock().len(), 1);

    let quota = QuotaRepository::new(rig.dir.join("quota.json"), 200_000).load().await;
    assert_eq!(quota.used, 2);
}

#[tokio::test]
async fn test_overcurrent_stops_immediately() {
    let overloaded = DeviceReading {
        battery_pct: 99.0,
        pv_power_w: 4000.0,
        phase_power_w: PhasePowers {
            l1: 1700.0,
            l2: 1700.0,
            l3: 1800.0,
            total: 5200.0,
        },
        ..Default::default()
    };
    let mut rig = rig(local(6, 3, 11, 6), FakeTelemetry::new(true, overloaded), |dir| {
        write_decision(dir, "production", "2025-06-03T10:00:00+01:00");
    })
    .await;
    rig.load.set_running(true);

    let report = rig.scheduler.run_cycle().await.unwrap();
    match report.outcome {
        CycleOutcome::Decided(decision) => {
            assert_eq!(decision.state, ProductionState::Stop);
            assert_eq!(decision.rule.as_deref(), Some("safety-overcurrent"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(rig.load.pulses(), vec![SHORT]);
    assert!(!rig.load.is_running());

    let stored: serde_json::Value =
        serde_json::from_slice(&std::fs::read(rig.dir.join("solarman.json")).unwrap()).unwrap();
    assert_eq!(stored["phasePowers"]["total"], 5200.0);
}

#[tokio::test]
async fn test_production_left_on_after_sunset_is_forced_off() {
    let mut rig = rig(local(6, 3, 22, 1), FakeTelemetry::new(true, reading(50.0, 0.0)), |dir| {
        write_decision(dir, "production", "2025-06-03T12:00:00+01:00");
    })
    .await;
    rig.load.set_running(true);

    let report = rig.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.window, Window::Idle);
    assert_eq!(report.outcome, CycleOutcome::Idle { forced_stop: true });
    assert_eq!(rig.load.pulses(), vec![SHORT]);
    assert_eq!(rig.telemetry.auth.calls(), 0);

    let sent = rig.transport.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("outside the active window"));

    let persisted = DecisionRepository::new(rig.dir.join("state.json"))
        .load(local(6, 3, 22, 1))
        .await;
    assert_eq!(persisted.state, ProductionState::Stop);

    // The guard only fires once
    rig.clock.advance(chrono::Duration::minutes(5));
    let report = rig.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Idle { forced_stop: false });
    assert_eq!(rig.load.pulses(), vec![SHORT]);
}

#[tokio::test]
async fn test_missing_token_keeps_state() {
    let mut rig = rig(local(6, 3, 9, 1), FakeTelemetry::new(false, reading(95.0, 3000.0)), |_| {}).await;

    let report = rig.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::TelemetryUnavailable);
    assert_eq!(report.state, ProductionState::Stop);
    assert!(rig.load.pulses().is_empty());
    assert!(rig.transport.sent.lock().is_empty());
}

#[tokio::test]
async fn test_quota_resets_once_on_new_year() {
    let mut rig = rig(local(1, 1, 3, 1), FakeTelemetry::new(true, reading(10.0, 0.0)), |dir| {
        std::fs::write(dir.join("quota.json"), r#"{"used": 500}"#).unwrap();
    })
    .await;
    let quota = || QuotaRepository::new(rig.dir.join("quota.json"), 200_000);

    rig.scheduler.run_cycle().await.unwrap();
    assert_eq!(quota().load().await.used, 0);

    // Active cycles later that day count calls again without another reset
    rig.clock.set(local(1, 1, 9, 1));
    rig.scheduler.run_cycle().await.unwrap();
    rig.clock.advance(chrono::Duration::minutes(5));
    rig.scheduler.run_cycle().await.unwrap();
    assert_eq!(quota().load().await.used, 2);
}

#[tokio::test]
async fn test_persisted_decision_wins_over_memory() {
    let mut rig = rig(local(6, 3, 13, 1), FakeTelemetry::new(true, reading(95.0, 600.0)), |_| {}).await;

    // Record rewritten behind the running loop
    write_decision(&rig.dir, "production", "2025-06-03T09:00:00+01:00");
    rig.load.set_running(true);

    let report = rig.scheduler.run_cycle().await.unwrap();
    match report.outcome {
        CycleOutcome::Decided(decision) => {
            assert_eq!(decision.previous, ProductionState::Production);
            assert!(!decision.changed());
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(report.state, ProductionState::Production);
    assert!(rig.load.pulses().is_empty());
    assert!(rig.transport.sent.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_token_fetch_is_retried_inline() {
    let telemetry = FakeTelemetry::new(true, reading(95.0, 3000.0)).stalling_auth(1);
    let mut rig = rig(local(6, 3, 9, 1), telemetry, |_| {}).await;

    let report = rig.scheduler.run_cycle().await.unwrap();
    assert_eq!(rig.telemetry.auth.calls(), 2);
    assert!(matches!(report.outcome, CycleOutcome::Decided(ref d) if d.state == ProductionState::Production));
    assert_eq!(rig.load.pulses(), vec![SHORT]);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_weather_fetch_is_retried_inline() {
    // Call 1 is the startup fetch, call 2 the pooled one
    let weather = FixedWeather {
        stall: Stall::on_call(2),
    };
    let telemetry = FakeTelemetry::new(true, reading(95.0, 3000.0));
    let mut rig = rig_with(local(6, 3, 9, 1), weather, FixedSensor::default(), telemetry, |_| {}).await;

    let report = rig.scheduler.run_cycle().await.unwrap();
    assert_eq!(rig.weather.stall.calls(), 3);
    assert_eq!(report.state, ProductionState::Production);
    assert_eq!(rig.telemetry.auth.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_sensor_read_is_retried_inline() {
    let sensor = FixedSensor {
        stall: Stall::on_call(1),
    };
    let telemetry = FakeTelemetry::new(true, reading(95.0, 3000.0));
    let mut rig = rig_with(local(6, 3, 9, 1), FixedWeather::default(), sensor, telemetry, |_| {}).await;

    let report = rig.scheduler.run_cycle().await.unwrap();
    assert_eq!(rig.sensor.stall.calls(), 2);
    assert_eq!(report.state, ProductionState::Production);
    assert!(rig.transport.sent.lock()[0].contains("Ambient: 22.0C / 45.0%"));
}
