//! Chat channels (Telegram).
//!
//! A channel long-polls for inbound messages, which are handed to the relay's
//! dispatcher, and sends outbound text to chats through [`ChannelHandle`].

mod handle;
mod inbound;
mod telegram;

pub use handle::{ChannelError, ChannelHandle};
pub use inbound::InboundMessage;
pub use telegram::{BotUser, TelegramChannel, TelegramUpdate, DEFAULT_TELEGRAM_API_BASE};
