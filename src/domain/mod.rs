pub mod actuator;
pub mod providers;
pub mod types;

pub use actuator::*;
pub use providers::*;
pub use types::*;
