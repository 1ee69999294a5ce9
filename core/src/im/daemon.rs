//! Per-channel outbound: one FIFO queue and one send daemon task per channel.
//! Replies are split to the platform's max length and sent in order, at most one message per
//! MIN_INTERVAL per channel; rate-limited chunks are retried after the platform's retry_after.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::log::{channel_name, chat_id, truncate_content_default};
use super::transport::{chunk_message, ImTransport, SendError};

/// Outbound queue item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMsg {
    /// Show "typing..." now. Not rate-limited.
    Typing,
    /// Send as new message(s). Rate-limited and chunked.
    Send(String),
}

const MIN_INTERVAL: Duration = Duration::from_secs(1);
/// Give up on a chunk after this many consecutive 429s.
const MAX_RATE_LIMIT_RETRIES: u32 = 5;
const QUEUE_CAPACITY: usize = 256;

/// Per-channel state.
struct ChannelSendState {
    last_send: Option<Instant>,
    retry_after: Option<Instant>,
    /// Chunks waiting to be sent, in order.
    pending: VecDeque<String>,
    /// Consecutive rate limits for the chunk at the front of `pending`.
    retries: u32,
}

/// Wait for the rate limit, then send the front chunk. Returns false when nothing is pending.
async fn drain_one<T: ImTransport>(channel_id: &str, state: &mut ChannelSendState, transport: &Arc<T>) -> bool {
    let Some(chunk) = state.pending.pop_front() else {
        return false;
    };
    let now = Instant::now();
    let wait_until = state
        .retry_after
        .filter(|t| *t > now)
        .or_else(|| state.last_send.map(|t| t + MIN_INTERVAL).filter(|next| *next > now));
    if let Some(until) = wait_until {
        tokio::time::sleep_until(until).await;
    }

    match transport.send(channel_id, &chunk).await {
        Ok(()) => {
            state.last_send = Some(Instant::now());
            state.retry_after = None;
            state.retries = 0;
            tracing::info!(
                channel = channel_name(channel_id),
                chat_id = chat_id(channel_id),
                direction = "send",
                content = %truncate_content_default(&chunk),
                "message sent"
            );
        }
        Err(SendError::RateLimited { retry_after_secs }) if state.retries < MAX_RATE_LIMIT_RETRIES => {
            state.retries += 1;
            state.retry_after = Some(Instant::now() + Duration::from_secs_f64(retry_after_secs.max(0.0)));
            tracing::warn!(
                channel = channel_name(channel_id),
                chat_id = chat_id(channel_id),
                retry_after_secs,
                attempt = state.retries,
                "rate limited, will retry"
            );
            state.pending.push_front(chunk);
        }
        Err(e) => {
            state.retries = 0;
            tracing::error!(
                channel = channel_name(channel_id),
                chat_id = chat_id(channel_id),
                direction = "send",
                content = %truncate_content_default(&chunk),
                error = %e,
                "send failed, dropping message"
            );
        }
    }
    true
}

/// One send daemon for a single channel: drains that channel's FIFO queue.
async fn run_send_daemon_for_channel<T>(mut rx: mpsc::Receiver<OutboundMsg>, channel_id: String, transport: Arc<T>)
where
    T: ImTransport,
{
    let max_len = transport.max_message_len();
    let mut state = ChannelSendState {
        last_send: None,
        retry_after: None,
        pending: VecDeque::new(),
        retries: 0,
    };

    while let Some(msg) = rx.recv().await {
        match msg {
            OutboundMsg::Typing => {
                if let Err(e) = transport.send_typing(&channel_id).await {
                    tracing::debug!(
                        channel = channel_name(&channel_id),
                        chat_id = chat_id(&channel_id),
                        direction = "typing",
                        error = %e,
                        "typing indicator failed"
                    );
                }
            }
            OutboundMsg::Send(text) => {
                state.pending.extend(chunk_message(&text, max_len));
                while drain_one(&channel_id, &mut state, &transport).await {}
            }
        }
    }
}

/// Hub that routes outbound messages to a per-channel FIFO queue and a dedicated daemon task per channel.
pub struct OutboundHub<T> {
    channels: DashMap<String, mpsc::Sender<OutboundMsg>>,
    transport: Arc<T>,
}

impl<T> OutboundHub<T>
where
    T: ImTransport + 'static,
{
    pub fn new(transport: Arc<T>) -> Arc<Self> {
        Arc::new(Self {
            channels: DashMap::new(),
            transport,
        })
    }

    /// Get or create the sender for this channel (creates a new FIFO queue and spawns a daemon task).
    pub fn sender_for(&self, channel_id: &str) -> mpsc::Sender<OutboundMsg> {
        self.channels
            .entry(channel_id.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel::<OutboundMsg>(QUEUE_CAPACITY);
                let transport = Arc::clone(&self.transport);
                tokio::spawn(run_send_daemon_for_channel(rx, channel_id.to_string(), transport));
                tx
            })
            .clone()
    }

    /// Enqueue an outbound message for the given channel (FIFO per channel). Channels of another
    /// platform are dropped with a warning.
    pub async fn send(&self, channel_id: &str, msg: OutboundMsg) {
        let platform = self.transport.capabilities().channel_id_prefix;
        if channel_name(channel_id) != platform {
            tracing::warn!(
                channel = channel_name(channel_id),
                chat_id = chat_id(channel_id),
                platform,
                "channel does not belong to this platform, message dropped"
            );
            return;
        }
        let tx = self.sender_for(channel_id);
        if tx.send(msg).await.is_err() {
            tracing::warn!(channel = channel_name(channel_id), chat_id = chat_id(channel_id), "send daemon gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::testing::{wait_until, RecordingTransport};

    #[tokio::test(start_paused = true)]
    async fn long_reply_is_sent_as_ordered_chunks() {
        let transport = Arc::new(RecordingTransport::new(10));
        let hub = OutboundHub::new(Arc::clone(&transport));

        let text = "line one\nline two\nline three".to_string();
        hub.send("test:1", OutboundMsg::Send(text.clone())).await;

        wait_until(1000, || transport.sent().len() == 3).await;
        let chunks = transport.sent_to("test:1");
        assert_eq!(chunks, vec!["line one\n", "line two\n", "line three"]);
        assert_eq!(chunks.concat(), text);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_message_is_retried() {
        let transport = Arc::new(RecordingTransport::new(2000));
        transport.rate_limit_next(2);
        let hub = OutboundHub::new(Arc::clone(&transport));

        hub.send("test:1", OutboundMsg::Send("briefing".into())).await;

        wait_until(1000, || !transport.sent().is_empty()).await;
        assert_eq!(transport.sent_to("test:1"), vec!["briefing"]);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_goes_to_transport() {
        let transport = Arc::new(RecordingTransport::new(2000));
        let hub = OutboundHub::new(Arc::clone(&transport));

        hub.send("test:7", OutboundMsg::Typing).await;

        wait_until(1000, || !transport.typing().is_empty()).await;
        assert_eq!(transport.typing(), vec!["test:7".to_string()]);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn other_platform_channels_are_dropped() {
        let transport = Arc::new(RecordingTransport::new(2000));
        let hub = OutboundHub::new(Arc::clone(&transport));

        hub.send("discord:1", OutboundMsg::Typing).await;
        hub.send("discord:1", OutboundMsg::Send("wrong platform".into())).await;
        hub.send("test:1", OutboundMsg::Send("right platform".into())).await;

        wait_until(1000, || !transport.sent().is_empty()).await;
        assert_eq!(transport.sent(), vec![("test:1".to_string(), "right platform".to_string())]);
        assert!(transport.typing().is_empty());
    }
}
