//! Telegram Bot API transport
//!
//! Outbound messages go through a retrying middleware client with capped
//! exponential backoff; inbound updates use a plain client long-polling
//! `getUpdates`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::TelegramConfig;
use crate::controller::commands::CommandKeywords;

use super::{InboundMessage, MessageTransport};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// Slack on top of the server-side long-poll timeout
const POLL_GRACE: Duration = Duration::from_secs(10);

pub struct TelegramTransport {
    sender: ClientWithMiddleware,
    poller: Client,
    base_url: String,
    chat_id: i64,
    keyboard: Value,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

impl TelegramTransport {
    pub fn new(cfg: &TelegramConfig, commands: &CommandKeywords) -> Result<Self> {
        let chat_id = cfg
            .chat_id
            .context("telegram.chat_id must be set")?;

        let (initial, ceiling) = cfg.retry_bounds();
        let policy = ExponentialBackoff::builder()
            .retry_bounds(initial, ceiling)
            .build_with_max_retries(cfg.max_retries);
        let sender = ClientBuilder::new(
            Client::builder()
                .timeout(SEND_TIMEOUT)
                .build()
                .context("building Telegram send client")?,
        )
        .with(RetryTransientMiddleware::new_with_policy(policy))
        .build();

        let poller = Client::builder()
            .timeout(cfg.poll_timeout() + POLL_GRACE)
            .build()
            .context("building Telegram poll client")?;

        Ok(Self {
            sender,
            poller,
            base_url: format!("{}/bot{}", cfg.base_url.trim_end_matches('/'), cfg.bot_token),
            chat_id,
            keyboard: reply_keyboard(commands),
        })
    }
}

/// Request URLs embed the bot token; drop them from transport errors
fn without_url(err: reqwest_middleware::Error) -> anyhow::Error {
    match err {
        reqwest_middleware::Error::Reqwest(e) => e.without_url().into(),
        reqwest_middleware::Error::Middleware(e) => e,
    }
}

/// Persistent reply keyboard offering every command keyword
pub fn reply_keyboard(commands: &CommandKeywords) -> Value {
    json!({
        "keyboard": [
            [commands.status],
            [commands.start, commands.stop],
            [commands.force_stop],
            [commands.phases],
        ],
        "resize_keyboard": true,
        "one_time_keyboard": false,
    })
}

#[async_trait]
impl MessageTransport for TelegramTransport {
    async fn send(&self, text: &str) -> Result<()> {
        let body = serde_json::to_vec(&json!({
            "chat_id": self.chat_id,
            "text": text,
            "reply_markup": self.keyboard,
        }))?;

        self.sender
            .post(format!("{}/sendMessage", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(without_url)
            .context("sending message")?
            .error_for_status()
            .map_err(reqwest::Error::without_url)
            .context("sendMessage rejected")?;
        debug!("Telegram message sent");
        Ok(())
    }

    async fn poll_updates(&self, after: Option<i64>, timeout: Duration) -> Result<Vec<InboundMessage>> {
        let mut query = vec![("timeout", timeout.as_secs().to_string())];
        if let Some(last) = after {
            query.push(("offset", (last + 1).to_string()));
        }

        let response: UpdatesResponse = self
            .poller
            .get(format!("{}/getUpdates", self.base_url))
            .query(&query)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(reqwest::Error::without_url)
            .context("polling updates")?
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context("parsing updates")?;

        if !response.ok {
            anyhow::bail!(
                "getUpdates failed: {}",
                response.description.unwrap_or_else(|| "unknown error".to_string())
            );
        }

        Ok(response
            .result
            .into_iter()
            .map(|update| InboundMessage {
                id: update.update_id,
                chat_id: update.message.as_ref().map(|m| m.chat.id),
                text: update.message.and_then(|m| m.text),
            })
            .collect())
    }
}
