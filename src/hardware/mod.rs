pub mod display;
pub mod factory;
pub mod gpio;
pub mod probe;
pub mod sensor;
pub mod solarman;

pub use display::LogDisplay;
pub use factory::{DeviceFactory, Devices, HardwareMode};
pub use gpio::SysfsGpioActuator;
pub use probe::PingProbe;
pub use sensor::{IioDhtSensor, SimulatedSensor};
pub use solarman::SolarmanClient;
