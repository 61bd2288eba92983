use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::Display;
use tracing::info;

use crate::config::HardwareConfig;
use crate::domain::{
    Actuator, DisplayRenderer, ReachabilityProbe, SensorProvider, SimulatedActuator,
};

use super::{IioDhtSensor, LogDisplay, PingProbe, SimulatedSensor, SysfsGpioActuator};

/// Hardware mode configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HardwareMode {
    /// Raspberry Pi GPIO button, IIO sensor and network probe
    Gpio,
    /// Simulated load and sensor for development and testing
    #[default]
    Simulated,
}

/// Local devices around the load
#[derive(Clone)]
pub struct Devices {
    pub actuator: Arc<dyn Actuator>,
    pub probe: Arc<dyn ReachabilityProbe>,
    pub sensor: Arc<dyn SensorProvider>,
    pub display: Arc<dyn DisplayRenderer>,
}

/// Factory for creating hardware device instances
pub struct DeviceFactory {
    config: HardwareConfig,
}

impl DeviceFactory {
    pub fn new(config: HardwareConfig) -> Self {
        Self { config }
    }

    pub fn create(&self) -> Devices {
        info!(mode = %self.config.mode, "creating devices");
        match self.config.mode {
            HardwareMode::Gpio => Devices {
                actuator: Arc::new(SysfsGpioActuator::new(&self.config.gpio_root, self.config.gpio_pin)),
                probe: Arc::new(PingProbe::new(&self.config.miner_address)),
                sensor: Arc::new(IioDhtSensor::new(
                    &self.config.sensor_temperature_path,
                    &self.config.sensor_humidity_path,
                )),
                display: Arc::new(LogDisplay),
            },
            HardwareMode::Simulated => {
                // Presses and the probe observe the same simulated load
                let load = Arc::new(SimulatedActuator::with_hold_threshold(self.config.long_pulse()));
                Devices {
                    actuator: load.clone(),
                    probe: load,
                    sensor: Arc::new(SimulatedSensor::default()),
                    display: Arc::new(LogDisplay),
                }
            }
        }
    }
}
