use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::domain::{AmbientSample, SensorProvider};

/// DHT11 exposed by the kernel IIO driver; values are in milli-units.
///
/// The sensor misses reads regularly; a failed read repeats the previous
/// sample when there is one.
#[derive(Debug)]
pub struct IioDhtSensor {
    temperature_path: PathBuf,
    humidity_path: PathBuf,
    last: Mutex<Option<AmbientSample>>,
}

impl IioDhtSensor {
    pub fn new(temperature_path: impl Into<PathBuf>, humidity_path: impl Into<PathBuf>) -> Self {
        Self {
            temperature_path: temperature_path.into(),
            humidity_path: humidity_path.into(),
            last: Mutex::new(None),
        }
    }

    async fn read_milli(path: &Path) -> Result<f64> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let milli: i64 = text
            .trim()
            .parse()
            .with_context(|| format!("parsing {:?} from {}", text.trim(), path.display()))?;
        Ok(milli as f64 / 1000.0)
    }

    async fn read_fresh(&self) -> Result<AmbientSample> {
        Ok(AmbientSample {
            temperature_c: Self::read_milli(&self.temperature_path).await?,
            humidity_pct: Self::read_milli(&self.humidity_path).await?,
        })
    }
}

#[async_trait]
impl SensorProvider for IioDhtSensor {
    async fn read(&self) -> Result<AmbientSample> {
        match self.read_fresh().await {
            Ok(sample) => {
                *self.last.lock() = Some(sample);
                Ok(sample)
            }
            Err(e) => match *self.last.lock() {
                Some(previous) => {
                    warn!("Sensor read failed, repeating previous sample: {:#}", e);
                    Ok(previous)
                }
                None => Err(e),
            },
        }
    }
}

/// Fixed ambient sample for development
#[derive(Debug, Clone, Copy)]
pub struct SimulatedSensor {
    pub sample: AmbientSample,
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self {
            sample: AmbientSample {
                temperature_c: 22.0,
                humidity_pct: 45.0,
            },
        }
    }
}

#[async_trait]
impl SensorProvider for SimulatedSensor {
    async fn read(&self) -> Result<AmbientSample> {
        Ok(self.sample)
    }
}
