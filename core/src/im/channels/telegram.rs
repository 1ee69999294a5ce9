//! Telegram IM: all teloxide usage is confined here. Exposes the transport (send one message,
//! typing) and the long-polling receiver that pushes incoming messages to the inbound queue.

use std::sync::Arc;

use anyhow::Context as _;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, UserId};
use teloxide::RequestError;
use tokio::sync::mpsc;

use crate::app::App;
use crate::im::log::truncate_content_default;
use crate::im::spec::ImChannelKind;
use crate::im::transport::{ImChannelCapabilities, ImTransport, SendError};
use crate::im::worker::InboundMessage;

pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

/// Telegram send implementation: parses channel_id as "telegram:CHAT_ID" and calls send_message.
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait::async_trait]
impl ImTransport for TelegramTransport {
    fn capabilities(&self) -> ImChannelCapabilities {
        ImChannelCapabilities {
            max_message_len: TELEGRAM_MAX_MESSAGE_LEN,
            channel_id_prefix: "telegram",
        }
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<(), SendError> {
        let chat_id = parse_chat_id(channel_id)?;
        self.bot
            .send_message(chat_id, text)
            .await
            .map_err(to_send_error)?;
        Ok(())
    }

    async fn send_typing(&self, channel_id: &str) -> Result<(), SendError> {
        let chat_id = parse_chat_id(channel_id)?;
        self.bot
            .send_chat_action(chat_id, ChatAction::Typing)
            .await
            .map_err(to_send_error)?;
        Ok(())
    }
}

fn parse_chat_id(channel_id: &str) -> Result<ChatId, SendError> {
    let s = channel_id
        .strip_prefix("telegram:")
        .ok_or_else(|| SendError::Other("invalid channel_id (expected telegram:CHAT_ID)".into()))?;
    let id: i64 = s
        .parse()
        .map_err(|_| SendError::Other(format!("invalid telegram chat_id: {}", channel_id)))?;
    Ok(ChatId(id))
}

fn to_send_error(e: RequestError) -> SendError {
    match e {
        RequestError::RetryAfter(secs) => SendError::RateLimited {
            retry_after_secs: secs.duration().as_secs_f64(),
        },
        other => SendError::Other(other.to_string()),
    }
}

/// Run the Telegram receiver (long polling). Every text message goes to the inbound queue; the
/// worker decides whether to answer. Returns when the bot stops (e.g. Ctrl+C).
async fn run_telegram_receiver(bot: Bot, bot_user_id: UserId, inbound_tx: mpsc::Sender<InboundMessage>) {
    teloxide::repl(bot, move |msg: Message| {
        let inbound_tx = inbound_tx.clone();

        async move {
            let chat_id = msg.chat.id;
            let from_id = msg.from.as_ref().map(|u| u.id);
            let Some(inbound) = inbound_for(from_id, bot_user_id, chat_id, msg.text(), format_user(&msg)) else {
                tracing::debug!(
                    channel = "telegram",
                    chat_id = chat_id.0,
                    from = %format_user(&msg),
                    direction = "incoming",
                    "non-text or empty message ignored"
                );
                return Ok(());
            };

            if let Err(e) = inbound_tx.send(inbound).await {
                tracing::warn!(
                    channel = "telegram",
                    content = %truncate_content_default(&e.0.text),
                    "inbound queue closed, message dropped"
                );
            }
            Ok(())
        }
    })
    .await;
}

/// Tag an update by sender. Non-text and blank messages are ignored; anything sent by our own
/// account is marked `Bot`.
fn inbound_for(
    from_id: Option<UserId>,
    bot_user_id: UserId,
    chat_id: ChatId,
    text: Option<&str>,
    author: String,
) -> Option<InboundMessage> {
    let text = text.map(str::trim).filter(|t| !t.is_empty())?.to_string();
    let channel_id = ImChannelKind::Telegram.channel_id(&chat_id.0.to_string());
    if from_id == Some(bot_user_id) {
        Some(InboundMessage::from_bot(channel_id, text))
    } else {
        Some(InboundMessage::from_user(channel_id, text, author))
    }
}

fn format_user(msg: &Message) -> String {
    msg.from
        .as_ref()
        .map(|u| {
            u.username
                .as_ref()
                .map(|s| format!("@{}", s))
                .unwrap_or_else(|| u.first_name.clone())
        })
        .unwrap_or_else(|| "?".to_string())
}

/// Run the Telegram bot: verify the token with getMe, start the worker and briefing scheduler,
/// then run the receiver.
pub async fn run_telegram_bot(app: &App) -> anyhow::Result<()> {
    let bot = Bot::new(&app.config().platform_token);

    let me = bot
        .get_me()
        .await
        .context("telegram getMe failed (check TELEGRAM_BOT_TOKEN, set HTTPS_PROXY if blocked)")?;
    let name = me.user.username.as_deref().unwrap_or("(no username)");
    tracing::info!(channel = "telegram", bot = %format!("@{}", name), "logged in, waiting for messages");

    let transport = Arc::new(TelegramTransport::new(bot.clone()));
    let inbound_tx = app.start_pipeline(transport);

    run_telegram_receiver(bot, me.user.id, inbound_tx).await;
    tracing::info!(channel = "telegram", "receiver stopped");
    Ok(())
}
