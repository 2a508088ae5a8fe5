//! Outbound side of a channel.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{method} request failed: {source}")]
    Request {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} failed: {status} {body}")]
    Status {
        method: &'static str,
        status: u16,
        body: String,
    },
    #[error("{method} returned ok: false: {description}")]
    Rejected {
        method: &'static str,
        description: String,
    },
}

/// Handle to a running channel (stop, send message).
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "telegram").
    fn id(&self) -> &str;
    /// Send a text message to a chat.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChannelError>;
}
