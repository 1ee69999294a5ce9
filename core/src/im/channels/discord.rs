//! Discord IM: all serenity usage is confined here. Exposes the transport (send one message,
//! typing) and the gateway event handler that pushes incoming messages to the inbound queue.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use serenity::all::{ChannelId, Context, EventHandler, GatewayIntents, Http, Message, Ready, UserId};
use tokio::sync::{mpsc, RwLock};

use crate::app::App;
use crate::im::log::truncate_content_default;
use crate::im::spec::ImChannelKind;
use crate::im::transport::{ImChannelCapabilities, ImTransport, SendError};
use crate::im::worker::InboundMessage;

pub const DISCORD_MAX_MESSAGE_LEN: usize = 2000;

/// Discord send implementation: parses channel_id as "discord:CHANNEL_ID".
pub struct DiscordTransport {
    http: Arc<Http>,
}

impl DiscordTransport {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ImTransport for DiscordTransport {
    fn capabilities(&self) -> ImChannelCapabilities {
        ImChannelCapabilities {
            max_message_len: DISCORD_MAX_MESSAGE_LEN,
            channel_id_prefix: "discord",
        }
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<(), SendError> {
        let id = parse_channel_id(channel_id)?;
        id.say(&*self.http, text).await.map_err(to_send_error)?;
        Ok(())
    }

    async fn send_typing(&self, channel_id: &str) -> Result<(), SendError> {
        let id = parse_channel_id(channel_id)?;
        id.broadcast_typing(&*self.http).await.map_err(to_send_error)
    }
}

fn parse_channel_id(channel_id: &str) -> Result<ChannelId, SendError> {
    let s = channel_id
        .strip_prefix("discord:")
        .ok_or_else(|| SendError::Other("invalid channel_id (expected discord:CHANNEL_ID)".into()))?;
    let id: u64 = s
        .parse()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| SendError::Other(format!("invalid discord channel id: {}", channel_id)))?;
    Ok(ChannelId::new(id))
}

/// serenity waits out Discord rate limits itself, so every error that reaches us is final.
fn to_send_error(e: serenity::Error) -> SendError {
    SendError::Other(e.to_string())
}

/// Tag a gateway message by author. Our own messages always go through as `Bot` so the worker
/// can drop them; empty user messages (attachments, embeds) are ignored.
fn inbound_for(
    author_id: UserId,
    bot_id: Option<UserId>,
    channel: ChannelId,
    content: &str,
    author: String,
) -> Option<InboundMessage> {
    let channel_id = ImChannelKind::Discord.channel_id(&channel.get().to_string());
    let text = content.trim().to_string();
    if bot_id == Some(author_id) {
        return Some(InboundMessage::from_bot(channel_id, text));
    }
    if text.is_empty() {
        return None;
    }
    Some(InboundMessage::from_user(channel_id, text, author))
}

struct Handler {
    inbound_tx: mpsc::Sender<InboundMessage>,
    bot_user_id: Arc<RwLock<Option<UserId>>>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(
            channel = "discord",
            bot = %ready.user.name,
            guilds = ready.guilds.len(),
            "logged in, waiting for messages"
        );
        *self.bot_user_id.write().await = Some(ready.user.id);
    }

    async fn message(&self, _ctx: Context, message: Message) {
        let bot_id = *self.bot_user_id.read().await;
        let author = message
            .author
            .global_name
            .clone()
            .unwrap_or_else(|| message.author.name.clone());
        let Some(inbound) = inbound_for(
            message.author.id,
            bot_id,
            message.channel_id,
            &message.content,
            author,
        ) else {
            tracing::debug!(
                channel = "discord",
                chat_id = message.channel_id.get(),
                from = %message.author.name,
                direction = "incoming",
                "non-text message ignored"
            );
            return;
        };

        if let Err(e) = self.inbound_tx.send(inbound).await {
            tracing::warn!(
                channel = "discord",
                content = %truncate_content_default(&e.0.text),
                "inbound queue closed, message dropped"
            );
        }
    }
}

/// Run the Discord bot: check the token, start the worker and briefing scheduler, then run the
/// gateway until it stops. Login and gateway failures are returned to the caller.
pub async fn run_discord_bot(app: &App) -> anyhow::Result<()> {
    let token = app.config().platform_token.as_str();
    let http = Arc::new(Http::new(token));

    let me = http
        .get_current_user()
        .await
        .context("discord login failed (check DISCORD_TOKEN)")?;
    tracing::info!(channel = "discord", bot = %me.name, "token accepted");

    let transport = Arc::new(DiscordTransport::new(Arc::clone(&http)));
    let inbound_tx = app.start_pipeline(transport);

    let handler = Handler {
        inbound_tx,
        bot_user_id: Arc::new(RwLock::new(Some(me.id))),
    };
    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = serenity::Client::builder(token, intents)
        .event_handler(handler)
        .await
        .context("failed to build discord client")?;

    client.start().await.context("discord gateway error")?;
    tracing::info!(channel = "discord", "gateway closed");
    Ok(())
}
