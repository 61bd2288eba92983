use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::domain::Actuator;

/// Power button wired to a GPIO line, driven through the sysfs interface
#[derive(Debug, Clone)]
pub struct SysfsGpioActuator {
    root: PathBuf,
    pin: u32,
}

impl SysfsGpioActuator {
    pub fn new(root: impl Into<PathBuf>, pin: u32) -> Self {
        Self {
            root: root.into(),
            pin,
        }
    }

    fn line_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }

    async fn write(path: &Path, value: &str) -> Result<()> {
        tokio::fs::write(path, value)
            .await
            .with_context(|| format!("writing {:?} to {}", value, path.display()))
    }

    /// Export the line and configure it as a low output
    async fn prepare(&self) -> Result<()> {
        if tokio::fs::metadata(self.line_dir()).await.is_err() {
            debug!(pin = self.pin, "exporting GPIO line");
            Self::write(&self.root.join("export"), &self.pin.to_string()).await?;
        }
        Self::write(&self.line_dir().join("direction"), "low").await
    }

    async fn set(&self, high: bool) -> Result<()> {
        Self::write(&self.line_dir().join("value"), if high { "1" } else { "0" }).await
    }
}

#[async_trait]
impl Actuator for SysfsGpioActuator {
    async fn pulse(&self, duration: Duration) -> Result<()> {
        self.prepare().await?;
        self.set(true).await?;
        sleep(duration).await;
        if let Err(e) = self.set(false).await {
            // A line stuck high keeps the button held; retry once before giving up
            warn!(pin = self.pin, "Releasing GPIO line failed, retrying: {:#}", e);
            self.set(false).await?;
        }
        Ok(())
    }
}
