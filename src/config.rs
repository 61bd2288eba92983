use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

use crate::controller::anomaly::AnomalyConfig;
use crate::controller::commands::CommandKeywords;
use crate::controller::engine::DecisionThresholds;
use crate::controller::supervisor::SupervisorConfig;
use crate::error::ControllerError;
use crate::forecast::GeoLocation;
use crate::hardware::HardwareMode;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const ENV_PREFIX: &str = "SMC__";

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub location: LocationConfig,
    #[validate(nested)]
    pub weather: WeatherConfig,
    #[validate(nested)]
    pub solarman: SolarmanConfig,
    #[validate(nested)]
    pub telegram: TelegramConfig,
    pub storage: StorageConfig,
    pub quota: QuotaConfig,
    #[validate(nested)]
    pub scheduler: SchedulerConfig,
    pub hardware: HardwareConfig,
    pub supervisor: SupervisorConfig,
    #[validate(nested)]
    pub thresholds: DecisionThresholds,
    pub anomaly: AnomalyConfig,
    pub commands: CommandKeywords,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct LocationConfig {
    #[validate(required)]
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[validate(required)]
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    pub timezone: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: None,
            longitude: None,
            timezone: "Europe/Budapest".to_string(),
        }
    }
}

impl LocationConfig {
    pub fn tz(&self) -> Result<Tz, ControllerError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| ControllerError::Config(format!("invalid timezone {:?}: {}", self.timezone, e)))
    }

    pub fn geo(&self) -> Result<GeoLocation, ControllerError> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Ok(GeoLocation {
                latitude,
                longitude,
                name: None,
            }),
            _ => Err(ControllerError::Config(
                "location.latitude and location.longitude are required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct WeatherConfig {
    #[validate(length(min = 1, message = "weather.api_key must be set"))]
    pub api_key: String,
    pub base_url: String,
    /// Shift applied to the reported sunrise before it opens the active window
    pub sunrise_offset_minutes: i64,
    /// Shift applied to the reported sunset before it closes the active window
    pub sunset_offset_minutes: i64,
    pub http_timeout_seconds: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openweathermap.org".to_string(),
            sunrise_offset_minutes: -10,
            sunset_offset_minutes: -120,
            http_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct SolarmanConfig {
    #[validate(length(min = 1, message = "solarman.app_id must be set"))]
    pub app_id: String,
    #[validate(length(min = 1, message = "solarman.app_secret must be set"))]
    pub app_secret: String,
    #[validate(length(min = 1, message = "solarman.email must be set"))]
    pub email: String,
    #[validate(length(min = 1, message = "solarman.password must be set"))]
    pub password: String,
    #[validate(length(min = 1, message = "solarman.device_sn must be set"))]
    pub device_sn: String,
    pub base_url: String,
    pub http_timeout_seconds: u64,
    pub keys: TelemetryKeys,
}

impl Default for SolarmanConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_secret: String::new(),
            email: String::new(),
            password: String::new(),
            device_sn: String::new(),
            base_url: "https://globalapi.solarmanpv.com".to_string(),
            http_timeout_seconds: 15,
            keys: TelemetryKeys::default(),
        }
    }
}

/// `dataList` keys the device reading is built from
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryKeys {
    pub battery_soc: String,
    pub pv_power: String,
    pub internal_power: String,
    pub phase_l1: String,
    pub phase_l2: String,
    pub phase_l3: String,
    pub phase_total: String,
}

impl Default for TelemetryKeys {
    fn default() -> Self {
        Self {
            battery_soc: "BMS_SOC".to_string(),
            pv_power: "S_P_T".to_string(),
            internal_power: "GS_T".to_string(),
            phase_l1: "INV_O_P_L1".to_string(),
            phase_l2: "INV_O_P_L2".to_string(),
            phase_l3: "INV_O_P_L3".to_string(),
            phase_total: "INV_O_P_T".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct TelegramConfig {
    #[validate(length(min = 1, message = "telegram.bot_token must be set"))]
    pub bot_token: String,
    #[validate(required(message = "telegram.chat_id must be set"))]
    pub chat_id: Option<i64>,
    pub base_url: String,
    /// Server-side long-poll timeout for inbound updates
    pub poll_timeout_seconds: u64,
    pub poll_error_backoff_seconds: u64,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub max_retries: u32,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: None,
            base_url: "https://api.telegram.org".to_string(),
            poll_timeout_seconds: 30,
            poll_error_backoff_seconds: 5,
            retry_initial_ms: 2_000,
            retry_max_ms: 8_000,
            max_retries: 2,
        }
    }
}

impl TelegramConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_seconds)
    }

    /// Backoff bounds, ordered so the ceiling is never below the initial delay.
    pub fn retry_bounds(&self) -> (Duration, Duration) {
        let initial = Duration::from_millis(self.retry_initial_ms);
        let ceiling = Duration::from_millis(self.retry_max_ms.max(self.retry_initial_ms));
        (initial, ceiling)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub quota_file: PathBuf,
    pub decision_file: PathBuf,
    pub telemetry_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            quota_file: PathBuf::from("data/quota.json"),
            decision_file: PathBuf::from("data/state.json"),
            telemetry_file: PathBuf::from("data/solarman.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub limit: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self { limit: 200_000 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct SchedulerConfig {
    #[validate(range(min = 60, max = 3600))]
    pub slot_seconds: u64,
    pub offset_seconds: u64,
    /// Shared deadline for the concurrent per-cycle fetches
    #[validate(range(min = 1))]
    pub fetch_timeout_seconds: u64,
    #[validate(range(min = 1, max = 16))]
    pub fetch_workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slot_seconds: 300,
            offset_seconds: 60,
            fetch_timeout_seconds: 20,
            fetch_workers: 3,
        }
    }
}

impl SchedulerConfig {
    pub fn slot(&self) -> Duration {
        Duration::from_secs(self.slot_seconds)
    }

    pub fn offset(&self) -> Duration {
        Duration::from_secs(self.offset_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub mode: HardwareMode,
    pub gpio_pin: u32,
    pub gpio_root: PathBuf,
    pub short_pulse_ms: u64,
    pub long_pulse_ms: u64,
    pub miner_address: String,
    pub sensor_temperature_path: PathBuf,
    pub sensor_humidity_path: PathBuf,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            mode: HardwareMode::Simulated,
            gpio_pin: 16,
            gpio_root: PathBuf::from("/sys/class/gpio"),
            short_pulse_ms: 550,
            long_pulse_ms: 10_000,
            miner_address: "192.168.0.200".to_string(),
            sensor_temperature_path: PathBuf::from("/sys/bus/iio/devices/iio:device0/in_temp_input"),
            sensor_humidity_path: PathBuf::from(
                "/sys/bus/iio/devices/iio:device0/in_humidityrelative_input",
            ),
        }
    }
}

impl HardwareConfig {
    pub fn short_pulse(&self) -> Duration {
        Duration::from_millis(self.short_pulse_ms)
    }

    pub fn long_pulse(&self) -> Duration {
        Duration::from_millis(self.long_pulse_ms)
    }
}

impl Config {
    /// Load `config/default.toml` (or `SMC_CONFIG`) overlaid with `SMC__*` env vars.
    pub fn load() -> Result<Self, ControllerError> {
        let _ = dotenvy::dotenv();
        let path = std::env::var("SMC_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ControllerError> {
        let cfg: Config = figment
            .extract()
            .map_err(|e| ControllerError::Config(e.to_string()))?;
        cfg.validate()
            .map_err(|e| ControllerError::Config(e.to_string()))?;
        cfg.location.tz()?;
        cfg.location.geo()?;
        Ok(cfg)
    }
}
