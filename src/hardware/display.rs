use async_trait::async_trait;
use tracing::info;

use crate::domain::{DisplayFrame, DisplayRenderer};

/// Renders frames into the log stream instead of a panel
#[derive(Debug, Clone, Default)]
pub struct LogDisplay;

#[async_trait]
impl DisplayRenderer for LogDisplay {
    async fn render(&self, frame: &DisplayFrame) {
        info!(
            target: "display",
            state = %frame.state_text,
            battery = frame.battery_pct,
            power = frame.power_w,
            caption = %frame.caption,
            temperature = ?frame.temperature_c,
            humidity = ?frame.humidity_pct,
            "frame"
        );
    }
}
