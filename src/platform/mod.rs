pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// A message received from the chat platform, normalized for the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Platform-specific user ID as string
    pub sender_id: String,
    /// Display name of the user, for logging
    pub sender_name: String,
    /// Platform-specific chat ID as string
    pub chat_id: String,
    /// The full message text, command included
    pub text: String,
    pub is_command: bool,
    /// Lowercased command name without the leading slash
    pub command_name: Option<String>,
    pub message_id: String,
    /// One-to-one chat with the bot, as opposed to a group or channel
    pub is_private_chat: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Formatting {
    #[default]
    Plain,
    Markdown,
}

/// A message the relay wants delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub chat_id: String,
    pub text: String,
    pub in_reply_to: Option<String>,
    pub formatting: Formatting,
    pub disable_link_preview: bool,
}

impl OutboundReply {
    /// A plain, unthreaded message.
    pub fn plain(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            in_reply_to: None,
            formatting: Formatting::Plain,
            disable_link_preview: false,
        }
    }

    pub fn markdown(mut self) -> Self {
        self.formatting = Formatting::Markdown;
        self
    }

    pub fn reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.in_reply_to = Some(message_id.into());
        self
    }

    pub fn without_link_preview(mut self) -> Self {
        self.disable_link_preview = true;
        self
    }
}

/// Outbound side of a chat platform.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_reply(&self, reply: OutboundReply) -> Result<()>;

    /// Shows the "typing..." indicator in the given chat.
    async fn send_typing(&self, chat_id: &str) -> Result<()>;
}
