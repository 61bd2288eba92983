//! Solarman cloud API client (token handshake + current device data)

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use ring::digest::{digest, SHA256};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{SolarmanConfig, TelemetryKeys};
use crate::domain::{AccessToken, DeviceReading, DeviceSnapshot, DeviceTelemetryProvider};
use crate::error::{ControllerError, Fetched};

pub struct SolarmanClient {
    client: Client,
    base_url: String,
    app_id: String,
    app_secret: String,
    email: String,
    password_hash: String,
    device_sn: String,
    keys: TelemetryKeys,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    msg: Option<String>,
}

/// Lower-case hex SHA-256, the form the token endpoint expects for passwords
pub fn sha256_hex(input: &str) -> String {
    digest(&SHA256, input.as_bytes())
        .as_ref()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl SolarmanClient {
    pub fn new(cfg: &SolarmanConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_seconds))
            .build()
            .context("building Solarman HTTP client")?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            app_id: cfg.app_id.clone(),
            app_secret: cfg.app_secret.clone(),
            email: cfg.email.clone(),
            password_hash: sha256_hex(&cfg.password),
            device_sn: cfg.device_sn.clone(),
            keys: cfg.keys.clone(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn request_token(&self) -> Result<AccessToken> {
        debug!("Requesting Solarman access token");
        let response = self
            .client
            .post(self.url("account/v1.0/token"))
            .query(&[("appId", self.app_id.as_str()), ("language", "en")])
            .json(&json!({
                "appSecret": self.app_secret,
                "email": self.email,
                "password": self.password_hash,
            }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(reqwest::Error::without_url)
            .context("requesting token")?;

        let body: TokenResponse = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context("parsing token response")?;
        match body.access_token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(AccessToken(token)),
            None => anyhow::bail!(
                "token missing from response: {}",
                body.msg.unwrap_or_else(|| "no message".to_string())
            ),
        }
    }

    async fn request_current_data(&self, token: &AccessToken) -> Result<DeviceSnapshot> {
        let response = self
            .client
            .post(self.url("device/v1.0/currentData"))
            .query(&[("appId", self.app_id.as_str()), ("language", "en")])
            .bearer_auth(&token.0)
            .json(&json!({ "deviceSn": self.device_sn }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(reqwest::Error::without_url)
            .context("requesting current data")?;

        let raw: Value = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context("parsing current data")?;
        if raw.get("dataList").and_then(Value::as_array).is_none() {
            anyhow::bail!("current data carries no dataList");
        }
        let reading = DeviceReading::from_payload(&raw, &self.keys);
        info!(
            battery = reading.battery_pct,
            pv_power = reading.pv_power_w,
            phase_total = reading.phase_power_w.total,
            "Fetched device reading"
        );
        Ok(DeviceSnapshot { raw, reading })
    }
}

#[async_trait]
impl DeviceTelemetryProvider for SolarmanClient {
    async fn authenticate(&self) -> Fetched<Option<AccessToken>> {
        let result = self
            .request_token()
            .await
            .map(Some)
            .map_err(|e| ControllerError::provider("solarman", format!("{e:#}")));
        let fetched = Fetched::from_result(result, || None);
        if let Some(cause) = fetched.cause() {
            warn!("Authentication failed: {}", cause);
        }
        fetched
    }

    async fn current_reading(&self, token: &AccessToken) -> Fetched<Option<DeviceSnapshot>> {
        let result = self
            .request_current_data(token)
            .await
            .map(Some)
            .map_err(|e| ControllerError::provider("solarman", format!("{e:#}")));
        let fetched = Fetched::from_result(result, || None);
        if let Some(cause) = fetched.cause() {
            warn!("Reading failed: {}", cause);
        }
        fetched
    }
}
