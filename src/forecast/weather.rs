//! Weather integration (OpenWeather)
//!
//! Current conditions decide the active window and feed the decision engine;
//! the first two forecast entries stand in for the 1h and 3h outlook.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveTime, TimeZone};
use chrono_tz::Tz;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::WeatherConfig;
use crate::domain::{WeatherFacts, WeatherProvider};
use crate::error::{ControllerError, Fetched};

/// Geographic location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
}

/// OpenWeather client for current conditions and the 3-hourly forecast
pub struct OpenWeatherClient {
    client: Client,
    base_url: String,
    api_key: String,
    tz: Tz,
    sunrise_offset: ChronoDuration,
    sunset_offset: ChronoDuration,
}

impl OpenWeatherClient {
    pub fn new(cfg: &WeatherConfig, tz: Tz) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_seconds))
            .build()
            .context("building weather HTTP client")?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            tz,
            sunrise_offset: ChronoDuration::minutes(cfg.sunrise_offset_minutes),
            sunset_offset: ChronoDuration::minutes(cfg.sunset_offset_minutes),
        })
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, endpoint: &str, location: &GeoLocation) -> Result<T> {
        let url = format!("{}/data/2.5/{}", self.base_url, endpoint);
        debug!("Fetching weather from {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", location.latitude.to_string()),
                ("lon", location.longitude.to_string()),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("requesting {endpoint}"))?;

        if !response.status().is_success() {
            anyhow::bail!("OpenWeather {} returned {}", endpoint, response.status());
        }

        response
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("parsing {endpoint} response"))
    }

    /// Fetch and convert; any failure surfaces as an error for the caller to soften
    pub async fn fetch(&self, location: &GeoLocation) -> Result<WeatherFacts> {
        let current: CurrentResponse = self.get("weather", location).await?;
        let forecast: ForecastResponse = self.get("forecast", location).await?;

        let condition_of = |entry: Option<&ForecastEntry>| {
            entry
                .and_then(|e| e.weather.first())
                .map(|w| w.description.to_lowercase())
                .unwrap_or_else(|| WeatherFacts::UNKNOWN_CONDITION.to_string())
        };

        let facts = WeatherFacts {
            current_condition: current
                .weather
                .first()
                .map(|w| w.description.to_lowercase())
                .unwrap_or_else(|| WeatherFacts::UNKNOWN_CONDITION.to_string()),
            forecast_1h_condition: condition_of(forecast.list.first()),
            forecast_3h_condition: condition_of(forecast.list.get(1)),
            cloud_pct: current.clouds.all,
            sunrise: self.local_time(current.sys.sunrise, self.sunrise_offset)?,
            sunset: self.local_time(current.sys.sunset, self.sunset_offset)?,
            temperature_c: Some(current.main.temp),
            humidity_pct: Some(current.main.humidity),
        };

        info!(
            condition = %facts.current_condition,
            forecast_1h = %facts.forecast_1h_condition,
            forecast_3h = %facts.forecast_3h_condition,
            clouds = facts.cloud_pct,
            "Fetched weather"
        );
        Ok(facts)
    }

    fn local_time(&self, unix_seconds: i64, offset: ChronoDuration) -> Result<NaiveTime> {
        let instant = self
            .tz
            .timestamp_opt(unix_seconds, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("timestamp {unix_seconds} out of range"))?;
        Ok((instant + offset).time())
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    async fn current_and_forecast(&self, location: &GeoLocation) -> Fetched<WeatherFacts> {
        let result = self
            .fetch(location)
            .await
            .map_err(|e| ControllerError::provider("openweather", format!("{e:#}")));
        let fetched = Fetched::from_result(result, WeatherFacts::fallback);
        if let Some(cause) = fetched.cause() {
            warn!("{}", cause);
        }
        fetched
    }
}

// OpenWeather response structures
#[derive(Debug, Deserialize)]
struct CurrentResponse {
    #[serde(default)]
    weather: Vec<Condition>,
    main: MainBlock,
    #[serde(default)]
    clouds: Clouds,
    sys: SunBlock,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    list: Vec<ForecastEntry>,
}

#[derive(Debug, Deserialize)]
struct ForecastEntry {
    #[serde(default)]
    weather: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    temp: f64,
    humidity: f64,
}

#[derive(Debug, Default, Deserialize)]
struct Clouds {
    all: f64,
}

#[derive(Debug, Deserialize)]
struct SunBlock {
    sunrise: i64,
    sunset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn budapest() -> GeoLocation {
        GeoLocation {
            latitude: 47.4979,
            longitude: 19.0402,
            name: Some("Budapest".to_string()),
        }
    }

    fn client(base_url: String) -> OpenWeatherClient {
        let cfg = WeatherConfig {
            api_key: "key".to_string(),
            base_url,
            ..Default::default()
        };
        OpenWeatherClient::new(&cfg, chrono_tz::Europe::Budapest).unwrap()
    }

    async fn mount_ok(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .and(query_param("units", "metric"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "weather": [{ "description": "Clear Sky" }],
                "main": { "temp": 24.5, "humidity": 40 },
                "clouds": { "all": 5 },
                // 05:00 and 21:00 local summer time
                "sys": { "sunrise": 1719802800_i64, "sunset": 1719860400_i64 }
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "list": [
                    { "weather": [{ "description": "few clouds" }] },
                    { "weather": [{ "description": "light rain" }] }
                ]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_converts_and_shifts_sun_times() {
        let server = MockServer::start().await;
        mount_ok(&server).await;

        let fetched = client(server.uri()).current_and_forecast(&budapest()).await;
        assert!(fetched.is_fresh());
        let facts = fetched.into_value();

        assert_eq!(facts.current_condition, "clear sky");
        assert_eq!(facts.forecast_1h_condition, "few clouds");
        assert_eq!(facts.forecast_3h_condition, "light rain");
        assert_eq!(facts.cloud_pct, 5.0);
        assert_eq!(facts.sunrise, NaiveTime::from_hms_opt(4, 50, 0).unwrap());
        assert_eq!(facts.sunset, NaiveTime::from_hms_opt(19, 0, 0).unwrap());
        assert_eq!(facts.temperature_c, Some(24.5));
    }

    #[tokio::test]
    async fn test_server_error_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetched = client(server.uri()).current_and_forecast(&budapest()).await;
        assert!(!fetched.is_fresh());
        assert!(fetched.cause().unwrap().contains("openweather"));
        assert_eq!(fetched.into_value(), WeatherFacts::fallback());
    }

    #[tokio::test]
    async fn test_short_forecast_reads_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "weather": [{ "description": "overcast clouds" }],
                "main": { "temp": 10.0, "humidity": 90 },
                "sys": { "sunrise": 1719802800_i64, "sunset": 1719860400_i64 }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "list": [] })))
            .mount(&server)
            .await;

        let facts = client(server.uri()).fetch(&budapest()).await.unwrap();
        assert_eq!(facts.forecast_1h_condition, WeatherFacts::UNKNOWN_CONDITION);
        assert_eq!(facts.cloud_pct, 0.0);
    }

    #[tokio::test]
    async fn test_errors_do_not_carry_api_key() {
        let cfg = WeatherConfig {
            api_key: "APPID-7f3a".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let weather = OpenWeatherClient::new(&cfg, chrono_tz::Europe::Budapest).unwrap();

        let fetched = weather.current_and_forecast(&budapest()).await;
        let cause = fetched.cause().unwrap();
        assert!(cause.contains("requesting weather"));
        assert!(!cause.contains("APPID-7f3a"));
        assert!(!cause.contains("appid="));
    }
}
