pub mod system;

pub use system::SystemMetrics;
