use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::config::TelemetryKeys;

// ============================================================================
// Decision State
// ============================================================================

/// The only externally meaningful mode of the load
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProductionState {
    Production,
    #[default]
    Stop,
}

/// Durable record of the last decided state.
///
/// `since` is the instant of the most recent state change (or corrective
/// actuation), never of a cycle that left the state alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedDecision {
    #[serde(alias = "prev_state")]
    pub state: ProductionState,
    #[serde(alias = "uptime")]
    pub since: DateTime<FixedOffset>,
}

impl PersistedDecision {
    pub fn new(state: ProductionState, since: DateTime<FixedOffset>) -> Self {
        Self { state, since }
    }

    pub fn age(&self, now: DateTime<FixedOffset>) -> chrono::Duration {
        now - self.since
    }
}

// ============================================================================
// Weather
// ============================================================================

/// Weather facts for one cycle. Conditions are lower-cased descriptions,
/// sunrise/sunset are local wall-clock times already shifted into the active
/// window bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherFacts {
    pub current_condition: String,
    pub forecast_1h_condition: String,
    pub forecast_3h_condition: String,
    pub cloud_pct: f64,
    pub sunrise: NaiveTime,
    pub sunset: NaiveTime,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
}

impl WeatherFacts {
    pub const UNKNOWN_CONDITION: &'static str = "unknown";

    /// Static facts used when the provider cannot be reached
    pub fn fallback() -> Self {
        Self {
            current_condition: Self::UNKNOWN_CONDITION.to_string(),
            forecast_1h_condition: Self::UNKNOWN_CONDITION.to_string(),
            forecast_3h_condition: Self::UNKNOWN_CONDITION.to_string(),
            cloud_pct: 0.0,
            sunrise: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN),
            sunset: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            temperature_c: None,
            humidity_pct: None,
        }
    }
}

impl Default for WeatherFacts {
    fn default() -> Self {
        Self::fallback()
    }
}

// ============================================================================
// Device Telemetry
// ============================================================================

/// Per-line inverter output power
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhasePowers {
    #[serde(rename = "L1")]
    pub l1: f64,
    #[serde(rename = "L2")]
    pub l2: f64,
    #[serde(rename = "L3")]
    pub l3: f64,
    pub total: f64,
}

impl PhasePowers {
    pub fn max_phase(&self) -> f64 {
        self.l1.max(self.l2).max(self.l3)
    }

    /// Reported total, or the per-line sum when that is larger
    pub fn effective_total(&self) -> f64 {
        self.total.max(self.l1 + self.l2 + self.l3)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceReading {
    pub battery_pct: f64,
    pub pv_power_w: f64,
    pub internal_power_w: f64,
    pub phase_power_w: PhasePowers,
}

impl DeviceReading {
    /// Build a reading from a raw `dataList` payload. Missing keys and
    /// non-numeric values read as 0.
    pub fn from_payload(payload: &Value, keys: &TelemetryKeys) -> Self {
        let lookup = |key: &str| data_list_value(payload, key);
        Self {
            battery_pct: lookup(&keys.battery_soc),
            pv_power_w: lookup(&keys.pv_power),
            internal_power_w: lookup(&keys.internal_power),
            phase_power_w: PhasePowers {
                l1: lookup(&keys.phase_l1),
                l2: lookup(&keys.phase_l2),
                l3: lookup(&keys.phase_l3),
                total: lookup(&keys.phase_total),
            },
        }
        .sanitized()
    }

    /// Replace non-finite numbers with 0
    pub fn sanitized(self) -> Self {
        let clean = |v: f64| if v.is_finite() { v } else { 0.0 };
        Self {
            battery_pct: clean(self.battery_pct),
            pv_power_w: clean(self.pv_power_w),
            internal_power_w: clean(self.internal_power_w),
            phase_power_w: PhasePowers {
                l1: clean(self.phase_power_w.l1),
                l2: clean(self.phase_power_w.l2),
                l3: clean(self.phase_power_w.l3),
                total: clean(self.phase_power_w.total),
            },
        }
    }
}

fn data_list_value(payload: &Value, key: &str) -> f64 {
    payload
        .get("dataList")
        .and_then(Value::as_array)
        .and_then(|entries| {
            entries
                .iter()
                .find(|entry| entry.get("key").and_then(Value::as_str) == Some(key))
        })
        .and_then(|entry| entry.get("value"))
        .and_then(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Raw device payload together with the reading derived from it
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub raw: Value,
    pub reading: DeviceReading,
}

// ============================================================================
// Ambient Sensor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmbientSample {
    pub temperature_c: f64,
    pub humidity_pct: f64,
}

// ============================================================================
// Call Quota
// ============================================================================

/// Calls made against the rate-limited telemetry API this year
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaCounter {
    #[serde(alias = "used_quote")]
    pub used: u64,
    #[serde(default)]
    pub limit: u64,
    /// Day the yearly reset last fired
    #[serde(default)]
    pub last_reset: Option<NaiveDate>,
}

impl QuotaCounter {
    pub fn increment(&mut self) -> u64 {
        self.used = self.used.saturating_add(1);
        self.used
    }

    pub fn usage_percent(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        self.used as f64 / self.limit as f64 * 100.0
    }

    /// Zero the counter on January 1st, at most once that day.
    pub fn reset_for_new_year(&mut self, today: NaiveDate) -> bool {
        let new_year = today.month() == 1 && today.day() == 1;
        if !new_year || self.used == 0 || self.last_reset == Some(today) {
            return false;
        }
        self.used = 0;
        self.last_reset = Some(today);
        true
    }
}
