use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    BotCommand, ChatAction, LinkPreviewOptions, MessageId, ParseMode, ReplyParameters,
};
use teloxide::RequestError;
use tracing::{info, warn};

use crate::platform::{Formatting, InboundEvent, OutboundReply, Transport};
use crate::relay::MessageRelay;

/// Telegram rejects messages above 4096 characters.
const MAX_MESSAGE_LEN: usize = 4000;

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CommandMatch {
    NotCommand,
    Command(String),
    /// `/cmd@otherbot` in a group chat
    OtherBot,
}

/// Reads the command name out of `/name@bot args`.
fn parse_command(text: &str, bot_username: Option<&str>) -> CommandMatch {
    let Some(rest) = text.strip_prefix('/') else {
        return CommandMatch::NotCommand;
    };
    let word = rest.split_whitespace().next().unwrap_or_default();
    let (name, target) = match word.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (word, None),
    };

    if let (Some(target), Some(me)) = (target, bot_username) {
        if !target.eq_ignore_ascii_case(me) {
            return CommandMatch::OtherBot;
        }
    }

    CommandMatch::Command(name.to_lowercase())
}

fn display_name(username: Option<&str>, full_name: String) -> String {
    match username {
        Some(username) => format!("@{}", username),
        None => full_name,
    }
}

fn to_inbound_event(msg: &Message, bot_username: Option<&str>) -> Option<InboundEvent> {
    let user = msg.from.as_ref()?;
    let text = msg.text()?;

    let (is_command, command_name) = match parse_command(text, bot_username) {
        CommandMatch::NotCommand => (false, None),
        CommandMatch::Command(name) => (true, Some(name)),
        CommandMatch::OtherBot => return None,
    };

    Some(InboundEvent {
        sender_id: user.id.0.to_string(),
        sender_name: display_name(user.username.as_deref(), user.full_name()),
        chat_id: msg.chat.id.0.to_string(),
        text: text.to_string(),
        is_command,
        command_name,
        message_id: msg.id.0.to_string(),
        is_private_chat: msg.chat.is_private(),
    })
}

fn parse_chat_id(chat_id: &str) -> Result<ChatId> {
    let id = chat_id
        .parse::<i64>()
        .with_context(|| format!("Invalid Telegram chat id: {}", chat_id))?;
    Ok(ChatId(id))
}

fn parse_message_id(message_id: &str) -> Result<MessageId> {
    let id = message_id
        .parse::<i32>()
        .with_context(|| format!("Invalid Telegram message id: {}", message_id))?;
    Ok(MessageId(id))
}

/// Sends relay output through the Telegram Bot API.
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    #[allow(deprecated)]
    async fn send_chunk(
        &self,
        chat_id: ChatId,
        chunk: &str,
        markdown: bool,
        reply_to: Option<MessageId>,
        disable_link_preview: bool,
    ) -> ResponseResult<Message> {
        let mut request = self.bot.send_message(chat_id, chunk);
        if markdown {
            request = request.parse_mode(ParseMode::Markdown);
        }
        if let Some(message_id) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(message_id));
        }
        if disable_link_preview {
            request = request.link_preview_options(LinkPreviewOptions {
                is_disabled: true,
                url: None,
                prefer_small_media: false,
                prefer_large_media: false,
                show_above_text: false,
            });
        }
        request.await
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_reply(&self, reply: OutboundReply) -> Result<()> {
        let chat_id = parse_chat_id(&reply.chat_id)?;
        let mut reply_to = reply
            .in_reply_to
            .as_deref()
            .map(parse_message_id)
            .transpose()?;
        let markdown = reply.formatting == Formatting::Markdown;

        // Only the first chunk of a long answer is threaded
        for chunk in split_message(&reply.text, MAX_MESSAGE_LEN) {
            let thread = reply_to.take();
            let sent = self
                .send_chunk(chat_id, &chunk, markdown, thread, reply.disable_link_preview)
                .await;

            match sent {
                Ok(_) => {}
                // A split can cut through an entity; deliver that chunk as plain text
                Err(e @ RequestError::Api(_)) if markdown => {
                    warn!("Markdown rejected for chat {}, sending plain text: {}", chat_id, e);
                    self.send_chunk(chat_id, &chunk, false, thread, reply.disable_link_preview)
                        .await
                        .with_context(|| format!("Failed to send message to chat {}", chat_id))?;
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to send message to chat {}", chat_id));
                }
            }
        }

        Ok(())
    }

    async fn send_typing(&self, chat_id: &str) -> Result<()> {
        let chat_id = parse_chat_id(chat_id)?;
        self.bot
            .send_chat_action(chat_id, ChatAction::Typing)
            .await
            .context("Failed to send typing action")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct BotUsername(Option<String>);

fn command_menu() -> Vec<BotCommand> {
    vec![
        BotCommand::new("start", "Start the bot"),
        BotCommand::new("reset", "Reset conversation"),
        BotCommand::new("help", "Help menu"),
    ]
}

/// Run the Telegram bot platform
pub async fn run(bot: Bot, relay: Arc<MessageRelay>) -> Result<()> {
    info!("Starting Telegram platform...");

    let me = bot.get_me().await.context("Failed to reach the Telegram API")?;
    let username = BotUsername(me.user.username.clone());
    info!(
        "Connected as @{}",
        username.0.as_deref().unwrap_or("unknown")
    );

    if let Err(e) = bot.set_my_commands(command_menu()).await {
        warn!("Failed to register command menu: {}", e);
    }

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![relay, username])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Telegram platform stopped");
    Ok(())
}

async fn handle_message(
    msg: Message,
    relay: Arc<MessageRelay>,
    username: BotUsername,
) -> Result<()> {
    match to_inbound_event(&msg, username.0.as_deref()) {
        Some(event) => relay.handle(&event).await,
        None => Ok(()),
    }
}
