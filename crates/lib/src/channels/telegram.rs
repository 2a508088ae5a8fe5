//! Telegram channel: long-poll getUpdates and sendMessage via Bot API.

use crate::channels::handle::{ChannelError, ChannelHandle};
use crate::channels::inbound::InboundMessage;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_LONG_POLL_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(2);
/// Upper bound for getMe and sendMessage.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Extra time on top of the long-poll timeout before the HTTP request itself gives up.
const HTTP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram update payload (getUpdates result item).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    #[serde(default)]
    pub from: Option<BotUser>,
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

/// A Telegram user (message sender, or the bot itself from getMe).
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

impl From<TelegramUpdate> for InboundMessage {
    fn from(update: TelegramUpdate) -> Self {
        let Some(msg) = update.message else {
            return InboundMessage {
                update_id: update.update_id,
                ..Default::default()
            };
        };
        let (sender_id, sender_name) = match msg.from {
            Some(user) => (user.id, user.username),
            None => (0, None),
        };
        InboundMessage {
            update_id: update.update_id,
            sender_id,
            sender_name,
            chat_id: msg.chat.id,
            text: msg.text.unwrap_or_default(),
        }
    }
}

/// Telegram channel connector: long-polls for updates and sends messages via sendMessage.
pub struct TelegramChannel {
    id: String,
    token: String,
    api_base: String,
    poll_timeout: Duration,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            id: "telegram".to_string(),
            token: token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            poll_timeout: DEFAULT_LONG_POLL_TIMEOUT,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ChannelError> {
        let res = req
            .send()
            .await
            .map_err(|source| ChannelError::Request {
                method,
                source: source.without_url(),
            })?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::Status {
                method,
                status,
                body,
            });
        }
        let data: ApiResponse<T> = res
            .json()
            .await
            .map_err(|source| ChannelError::Request {
                method,
                source: source.without_url(),
            })?;
        match (data.ok, data.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(ChannelError::Rejected {
                method,
                description: data.description.unwrap_or_default(),
            }),
        }
    }

    /// Call getMe. Used at startup to verify the token.
    pub async fn get_me(&self) -> Result<BotUser, ChannelError> {
        let req = self
            .client
            .get(self.method_url("getMe"))
            .timeout(REQUEST_TIMEOUT);
        self.call("getMe", req).await
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), ChannelError> {
        let mut query = vec![("timeout", self.poll_timeout.as_secs().to_string())];
        if let Some(off) = offset {
            query.push(("offset", off.to_string()));
        }
        let req = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&query)
            .timeout(self.poll_timeout + HTTP_GRACE);
        let updates: Vec<TelegramUpdate> = self.call("getUpdates", req).await?;
        let next_offset = updates
            .iter()
            .map(|u| u.update_id)
            .max()
            .map(|id| id + 1)
            .or(offset);
        Ok((updates, next_offset))
    }

    /// Send a text message to a chat via sendMessage API.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({ "chat_id": chat_id, "text": text });
        let req = self
            .client
            .post(self.method_url("sendMessage"))
            .timeout(REQUEST_TIMEOUT)
            .json(&body);
        let _: serde_json::Value = self.call("sendMessage", req).await?;
        Ok(())
    }

    /// Start the getUpdates long-poll loop, forwarding every update until `cancel` fires
    /// or the receiver is dropped.
    pub fn start_inbound(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<InboundMessage>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx, cancel).await;
        })
    }
}

async fn run_get_updates_loop(
    channel: Arc<TelegramChannel>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
) {
    let mut offset: Option<i64> = None;
    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => break,
            res = channel.get_updates(offset) => res,
        };
        match polled {
            Ok((updates, next)) => {
                offset = next;
                for u in updates {
                    let inbound = InboundMessage::from(u);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            log::info!("telegram channel: getUpdates loop stopped");
                            return;
                        }
                        res = inbound_tx.send(inbound) => {
                            if res.is_err() {
                                log::debug!("telegram: inbound channel closed, stopping loop");
                                return;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!("telegram getUpdates error: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                }
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[async_trait]
impl ChannelHandle for TelegramChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        TelegramChannel::send_message(self, chat_id, text).await
    }
}
