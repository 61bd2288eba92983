pub mod telegram;

pub use telegram::TelegramTransport;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

/// One inbound update. Updates without a text message still advance the offset.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub id: i64,
    pub chat_id: Option<i64>,
    pub text: Option<String>,
}

#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
    /// Block up to `timeout` for updates newer than `after`
    async fn poll_updates(&self, after: Option<i64>, timeout: Duration) -> Result<Vec<InboundMessage>>;
}

/// Outbound side shared by both loops; sends are serialized
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn MessageTransport>,
    lock: Arc<Mutex<()>>,
}

impl Notifier {
    pub fn new(transport: Arc<dyn MessageTransport>) -> Self {
        Self {
            transport,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn transport(&self) -> &Arc<dyn MessageTransport> {
        &self.transport
    }

    /// Delivery failures are logged, never returned
    pub async fn notify(&self, text: &str) {
        let _guard = self.lock.lock().await;
        if let Err(e) = self.transport.send(text).await {
            warn!("Notification dropped: {:#}", e);
        }
    }
}
