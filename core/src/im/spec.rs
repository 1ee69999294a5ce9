//! IM channel spec: the platforms the bot can run on, and how channel ids are formed for them.
//! Each concrete platform (Discord, Telegram) implements ImTransport in `im::channels`.

use std::fmt;

/// Platform identifier. Selected by `platform` in config; prefixes every channel_id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImChannelKind {
    Discord,
    Telegram,
}

impl ImChannelKind {
    /// Unique string id for config and logging (e.g. "discord", "telegram").
    pub fn kind_id(&self) -> &'static str {
        match self {
            ImChannelKind::Discord => "discord",
            ImChannelKind::Telegram => "telegram",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "discord" => Some(Self::Discord),
            "telegram" | "tg" => Some(Self::Telegram),
            _ => None,
        }
    }

    /// Channel id for a platform-native chat id, e.g. `discord:1234`.
    pub fn channel_id(&self, native_id: &str) -> String {
        format!("{}:{}", self.kind_id(), native_id)
    }
}

impl fmt::Display for ImChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_id())
    }
}
