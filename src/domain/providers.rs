use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

use crate::error::Fetched;
use crate::forecast::GeoLocation;

use super::types::{AmbientSample, DeviceSnapshot, WeatherFacts};

/// Current conditions plus short-range forecast. Never fails: an unreachable
/// provider yields [`WeatherFacts::fallback`].
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current_and_forecast(&self, location: &GeoLocation) -> Fetched<WeatherFacts>;
}

/// Bearer token for the device telemetry API
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(pub String);

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

#[async_trait]
pub trait DeviceTelemetryProvider: Send + Sync {
    /// `None` when the handshake failed
    async fn authenticate(&self) -> Fetched<Option<AccessToken>>;
    /// `None` when no reading could be fetched
    async fn current_reading(&self, token: &AccessToken) -> Fetched<Option<DeviceSnapshot>>;
}

/// Ambient temperature/humidity sensor next to the load
#[async_trait]
pub trait SensorProvider: Send + Sync {
    async fn read(&self) -> Result<AmbientSample>;
}

/// What the small status display shows for one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayFrame {
    pub state_text: String,
    pub battery_pct: f64,
    pub power_w: f64,
    pub caption: String,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
}

/// Best effort; nothing consumes the outcome
#[async_trait]
pub trait DisplayRenderer: Send + Sync {
    async fn render(&self, frame: &DisplayFrame);
}

/// Liveness check against the load's network address
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self) -> Result<bool>;
}
