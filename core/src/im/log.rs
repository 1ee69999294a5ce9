//! Shared IM log vocabulary: every IM event is logged with `channel`, `chat_id`, `direction`
//! and a truncated `content` field. Channel name is derived from channel_id ("discord:123" -> "discord").

const CONTENT_LOG_MAX_LEN: usize = 120;

/// Platform name for a channel_id (prefix before ':').
#[inline]
pub fn channel_name(channel_id: &str) -> &str {
    channel_id.split(':').next().unwrap_or("?")
}

/// Native chat id for a channel_id (everything after the first ':').
#[inline]
pub fn chat_id(channel_id: &str) -> &str {
    channel_id.split_once(':').map(|(_, id)| id).unwrap_or(channel_id)
}

/// Truncate message content for logging (avoid huge dumps). Cuts on a char boundary.
#[inline]
pub fn truncate_content(content: &str, max_len: usize) -> std::borrow::Cow<'_, str> {
    if content.len() <= max_len {
        std::borrow::Cow::Borrowed(content)
    } else {
        let mut end = max_len;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        std::borrow::Cow::Owned(format!("{}... ({} bytes)", &content[..end], content.len()))
    }
}

#[inline]
pub fn truncate_content_default(content: &str) -> std::borrow::Cow<'_, str> {
    truncate_content(content, CONTENT_LOG_MAX_LEN)
}
