use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::domain::ReachabilityProbe;

/// One ICMP echo with a 2 s reply deadline, via the system `ping`
#[derive(Debug, Clone)]
pub struct PingProbe {
    address: String,
}

impl PingProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for PingProbe {
    async fn is_reachable(&self) -> Result<bool> {
        let status = Command::new("ping")
            .args(["-c", "1", "-W", "2", &self.address])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("running ping")?;
        debug!(address = %self.address, reachable = status.success(), "probed load");
        Ok(status.success())
    }
}
