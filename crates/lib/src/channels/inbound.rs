//! Inbound message from a channel: delivered to the dispatcher for authorization and parsing.

/// A chat message received by a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub update_id: i64,
    /// Telegram user id of the sender; 0 when the update carried no sender.
    pub sender_id: i64,
    pub sender_name: Option<String>,
    /// Chat the message arrived in; replies go here.
    pub chat_id: i64,
    pub text: String,
}

impl InboundMessage {
    /// Zero-value or textless messages carry nothing to act on.
    pub fn is_empty(&self) -> bool {
        self.sender_id == 0 || self.text.is_empty()
    }

    /// Name for log lines: `@username` when known, otherwise the numeric id.
    pub fn display_sender(&self) -> String {
        match &self.sender_name {
            Some(name) => format!("@{}", name),
            None => self.sender_id.to_string(),
        }
    }
}
