use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::domain::AmbientSample;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Samples in the rolling window
    pub window: usize,
    pub mean_temperature_ceiling_c: f64,
    pub mean_humidity_ceiling_pct: f64,
    /// Single-sample deviation from the rolling mean that raises an alert
    pub deviation_delta_c: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window: 12,
            mean_temperature_ceiling_c: 40.0,
            mean_humidity_ceiling_pct: 80.0,
            deviation_delta_c: 3.0,
        }
    }
}

/// Bounded history of ambient samples; the oldest is evicted once full
#[derive(Debug, Clone)]
pub struct SensorHistory {
    samples: VecDeque<AmbientSample>,
    capacity: usize,
}

impl SensorHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: AmbientSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Mean temperature and humidity, `None` while empty
    pub fn mean(&self) -> Option<AmbientSample> {
        if self.samples.is_empty() {
            return None;
        }
        let n = self.samples.len() as f64;
        let (t, h) = self
            .samples
            .iter()
            .fold((0.0, 0.0), |(t, h), s| (t + s.temperature_c, h + s.humidity_pct));
        Some(AmbientSample {
            temperature_c: t / n,
            humidity_pct: h / n,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AmbientAlert {
    MeanTemperatureHigh { mean_c: f64 },
    MeanHumidityHigh { mean_pct: f64 },
    TemperatureJump { sample_c: f64, mean_c: f64 },
}

impl AmbientAlert {
    pub fn message(&self) -> String {
        match self {
            Self::MeanTemperatureHigh { mean_c } => {
                format!("Warning! The average ambient temperature is too high: {mean_c:.1}C")
            }
            Self::MeanHumidityHigh { mean_pct } => {
                format!("Warning! The average ambient humidity is too high: {mean_pct:.1}%")
            }
            Self::TemperatureJump { sample_c, mean_c } => {
                let direction = if sample_c > mean_c { "risen" } else { "fallen" };
                format!("Ambient temperature has {direction} to: {sample_c:.1}C (mean was {mean_c:.1}C)")
            }
        }
    }
}

/// Rolling-mean anomaly detector.
///
/// Ceiling alerts are edge-triggered: one alert when the mean crosses into the
/// abnormal band, re-armed once it drops back. Jump alerts fire per sample.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
    history: SensorHistory,
    temperature_high: bool,
    humidity_high: bool,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            history: SensorHistory::new(config.window),
            config,
            temperature_high: false,
            humidity_high: false,
        }
    }

    /// Compare the sample against the full window, then append it
    pub fn observe(&mut self, sample: AmbientSample) -> Vec<AmbientAlert> {
        let mut alerts = Vec::new();

        if self.history.is_full() {
            if let Some(mean) = self.history.mean() {
                let temperature_high = mean.temperature_c > self.config.mean_temperature_ceiling_c;
                if temperature_high && !self.temperature_high {
                    alerts.push(AmbientAlert::MeanTemperatureHigh {
                        mean_c: mean.temperature_c,
                    });
                }
                self.temperature_high = temperature_high;

                let humidity_high = mean.humidity_pct > self.config.mean_humidity_ceiling_pct;
                if humidity_high && !self.humidity_high {
                    alerts.push(AmbientAlert::MeanHumidityHigh {
                        mean_pct: mean.humidity_pct,
                    });
                }
                self.humidity_high = humidity_high;

                if (sample.temperature_c - mean.temperature_c).abs() > self.config.deviation_delta_c {
                    alerts.push(AmbientAlert::TemperatureJump {
                        sample_c: sample.temperature_c,
                        mean_c: mean.temperature_c,
                    });
                }
            }
        }

        self.history.push(sample);
        alerts
    }
}
