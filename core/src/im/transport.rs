//! IM transport abstraction: "send one message" and "show typing" for the per-channel send daemon.
//! Each platform declares its capabilities; the daemon chunks text to `max_message_len`.

use async_trait::async_trait;

/// Error from sending a message. Rate-limited responses can be retried after a delay.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
    /// API returned 429; retry after this many seconds.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },
    /// Other error (network, auth, unknown channel, etc.).
    #[error("{0}")]
    Other(String),
}

/// Capabilities declared by each platform.
#[derive(Clone, Debug)]
pub struct ImChannelCapabilities {
    /// Max length (bytes) for a single message; longer replies are split.
    pub max_message_len: usize,
    /// Prefix for channel_id (e.g. "discord", "telegram") for routing and logging.
    pub channel_id_prefix: &'static str,
}

/// Transport that can send messages and a typing indicator. Implemented per platform.
#[async_trait]
pub trait ImTransport: Send + Sync {
    fn capabilities(&self) -> ImChannelCapabilities;

    /// Convenience; equals capabilities().max_message_len.
    fn max_message_len(&self) -> usize {
        self.capabilities().max_message_len
    }

    /// Send `text` to the channel identified by `channel_id` (e.g. "discord:123").
    /// Caller must keep text within max_message_len.
    async fn send(&self, channel_id: &str, text: &str) -> Result<(), SendError>;

    /// Show the platform's "typing..." status in the channel.
    async fn send_typing(&self, channel_id: &str) -> Result<(), SendError>;
}

/// Split text into chunks of at most `max_len` bytes, trying to break at newlines, then spaces.
/// Never splits inside a UTF-8 character.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        if rest.len() <= max_len {
            chunks.push(rest.to_string());
            break;
        }
        let mut limit = max_len;
        while !rest.is_char_boundary(limit) {
            limit -= 1;
        }
        let slice = &rest[..limit];
        let break_at = slice
            .rfind('\n')
            .or_else(|| slice.rfind(' '))
            .map(|i| i + 1)
            .unwrap_or(limit);
        chunks.push(rest[..break_at].to_string());
        rest = &rest[break_at..];
    }
    chunks
}
