use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::access::AllowList;
use crate::llm::ChatBackend;
use crate::platform::{InboundEvent, OutboundReply, Transport};

pub const SOURCE_URL: &str = "https://github.com/n3d1117/chatgpt-telegram-bot";

pub const GREETING: &str = "I'm a Chat-GPT3 Bot, please talk to me!";

pub const RESET_DONE: &str = "Done!";

pub const BACKEND_FAILURE: &str =
    "I'm having some trouble talking to you, please try again later.";

pub fn disallowed_message() -> String {
    format!(
        "Sorry, you are not allowed to use this bot. You can check out the source code at {}",
        SOURCE_URL
    )
}

pub fn help_message() -> String {
    format!(
        "/start - Start the bot\n\
         /reset - Reset conversation\n\
         /help - Help menu\n\n\
         Open source at {}",
        SOURCE_URL
    )
}

/// What an inbound event asks the relay to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Reset,
    Help,
    Text,
}

impl Action {
    /// Commands other than start/reset/help map to `None`: command text is
    /// never forwarded to the backend.
    pub fn from_event(event: &InboundEvent) -> Option<Self> {
        if !event.is_command {
            return Some(Action::Text);
        }
        match event.command_name.as_deref() {
            Some("start") => Some(Action::Start),
            Some("reset") => Some(Action::Reset),
            Some("help") => Some(Action::Help),
            _ => None,
        }
    }
}

/// Routes inbound events between the access list, the chat backend and the
/// transport. Holds no per-event state.
pub struct MessageRelay {
    allow_list: AllowList,
    backend: Arc<dyn ChatBackend>,
    transport: Arc<dyn Transport>,
}

impl MessageRelay {
    pub fn new(
        allow_list: AllowList,
        backend: Arc<dyn ChatBackend>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            allow_list,
            backend,
            transport,
        }
    }

    pub async fn handle(&self, event: &InboundEvent) -> Result<()> {
        match Action::from_event(event) {
            Some(Action::Start) => self.on_start(event).await,
            Some(Action::Reset) => self.on_reset(event).await,
            Some(Action::Help) => self.on_help(event).await,
            Some(Action::Text) => self.on_text(event).await,
            None => {
                debug!(
                    "Ignoring unknown command {:?} from {}",
                    event.command_name, event.sender_name
                );
                Ok(())
            }
        }
    }

    pub async fn on_start(&self, event: &InboundEvent) -> Result<()> {
        if !self.is_allowed(event) {
            info!("User {} is not allowed to start the bot", event.sender_name);
            return self.send_disallowed(event).await;
        }

        info!("Bot started");
        self.transport
            .send_reply(OutboundReply::plain(&event.chat_id, GREETING))
            .await
    }

    /// Backend failures are returned to the caller; no confirmation is sent.
    pub async fn on_reset(&self, event: &InboundEvent) -> Result<()> {
        if !self.is_allowed(event) {
            info!("User {} is not allowed to reset the bot", event.sender_name);
            return self.send_disallowed(event).await;
        }

        info!("Resetting the conversation...");
        self.backend.reset_conversation().await?;
        self.transport
            .send_reply(OutboundReply::plain(&event.chat_id, RESET_DONE))
            .await
    }

    /// Available to everyone, allowed or not. Quotes the request in group chats.
    pub async fn on_help(&self, event: &InboundEvent) -> Result<()> {
        let mut reply =
            OutboundReply::plain(&event.chat_id, help_message()).without_link_preview();
        if !event.is_private_chat {
            reply = reply.reply_to(&event.message_id);
        }
        self.transport.send_reply(reply).await
    }

    pub async fn on_text(&self, event: &InboundEvent) -> Result<()> {
        if !self.is_allowed(event) {
            info!("User {} is not allowed to use the bot", event.sender_name);
            return self.send_disallowed(event).await;
        }

        info!("New message received from user {}", event.sender_name);

        if let Err(e) = self.transport.send_typing(&event.chat_id).await {
            warn!("Failed to send typing indicator: {:#}", e);
        }

        let text = match self.backend.get_response(&event.text).await {
            Ok(reply) => reply.message,
            Err(e) => {
                error!("Error while getting the response: {:#}", e);
                BACKEND_FAILURE.to_string()
            }
        };

        self.transport
            .send_reply(
                OutboundReply::plain(&event.chat_id, text)
                    .markdown()
                    .reply_to(&event.message_id),
            )
            .await
    }

    fn is_allowed(&self, event: &InboundEvent) -> bool {
        self.allow_list.is_allowed(&event.sender_id)
    }

    async fn send_disallowed(&self, event: &InboundEvent) -> Result<()> {
        self.transport
            .send_reply(
                OutboundReply::plain(&event.chat_id, disallowed_message()).without_link_preview(),
            )
            .await
    }
}
