//! Startup configuration. Read once: settings.json (optional), then environment variables, then
//! CLI overrides. Tokens, API key and briefing channel are required; anything missing or
//! malformed is a `ConfigError` and the bot does not start.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde_json::Value;

use crate::im::spec::ImChannelKind;

pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GEMINI_TIMEOUT_SECS: u64 = 120;
const DEFAULT_BRIEFING_HOUR: u32 = 8;
const DEFAULT_BRIEFING_MINUTE: u32 = 0;
const DEFAULT_BRIEFING_TIMEZONE: Tz = chrono_tz::Asia::Seoul;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {key} (env {env})")]
    Missing { key: &'static str, env: &'static str },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("{path} is not valid JSON: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
}

/// Values given on the command line; they win over settings.json and the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub platform: Option<String>,
}

#[derive(Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl fmt::Debug for GeminiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiSettings")
            .field("api_key", &mask(&self.api_key))
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct BriefingSettings {
    pub enabled: bool,
    /// Full channel id, e.g. "discord:1234".
    pub channel_id: String,
    pub hour: u32,
    pub minute: u32,
    pub timezone: Tz,
    /// Post the prompt text into the channel before answering it.
    pub echo_prompt: bool,
}

#[derive(Clone)]
pub struct Config {
    pub platform: ImChannelKind,
    pub platform_token: String,
    pub gemini: GeminiSettings,
    pub briefing: BriefingSettings,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("platform", &self.platform)
            .field("platform_token", &mask(&self.platform_token))
            .field("gemini", &self.gemini)
            .field("briefing", &self.briefing)
            .finish()
    }
}

fn mask(secret: &str) -> String {
    if secret.len() <= 8 {
        "****".to_string()
    } else {
        format!("{}****", secret.chars().take(4).collect::<String>())
    }
}

impl Config {
    /// Load from a settings file (missing file is fine) and the process environment.
    pub fn load(settings_path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let path = settings_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
        let root = read_settings(&path, settings_path.is_some())?;
        Self::resolve(&root, |key| std::env::var(key).ok(), overrides)
    }

    /// Build config from parsed settings and an environment lookup. Environment wins over settings.
    pub fn resolve(
        root: &Value,
        env: impl Fn(&str) -> Option<String>,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let lookup = |env_key: &str, path: &[&str]| -> Option<String> {
            env(env_key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .or_else(|| str_at(root, path))
        };

        let platform_raw = overrides
            .platform
            .clone()
            .or_else(|| lookup("BOT_PLATFORM", &["platform"]));
        let platform = match platform_raw {
            Some(raw) => ImChannelKind::from_str_loose(&raw).ok_or_else(|| ConfigError::Invalid {
                key: "platform",
                reason: format!("unknown platform '{}' (expected discord or telegram)", raw),
            })?,
            None => ImChannelKind::Discord,
        };

        let (platform_token, briefing_channel_id) = match platform {
            ImChannelKind::Discord => {
                let token = lookup("DISCORD_TOKEN", &["channels", "discord", "bot_token"]).ok_or(
                    ConfigError::Missing { key: "channels.discord.bot_token", env: "DISCORD_TOKEN" },
                )?;
                let raw = lookup("DISCORD_CHANNEL_ID", &["channels", "discord", "briefing_channel_id"])
                    .or_else(|| u64_at(root, &["channels", "discord", "briefing_channel_id"]).map(|n| n.to_string()))
                    .ok_or(ConfigError::Missing {
                        key: "channels.discord.briefing_channel_id",
                        env: "DISCORD_CHANNEL_ID",
                    })?;
                let id: u64 = raw.parse().ok().filter(|id| *id != 0).ok_or_else(|| ConfigError::Invalid {
                    key: "channels.discord.briefing_channel_id",
                    reason: format!("'{}' is not a Discord channel id", raw),
                })?;
                (token, platform.channel_id(&id.to_string()))
            }
            ImChannelKind::Telegram => {
                let token = lookup("TELEGRAM_BOT_TOKEN", &["channels", "telegram", "bot_token"]).ok_or(
                    ConfigError::Missing { key: "channels.telegram.bot_token", env: "TELEGRAM_BOT_TOKEN" },
                )?;
                let raw = lookup("TELEGRAM_CHAT_ID", &["channels", "telegram", "briefing_chat_id"])
                    .or_else(|| i64_at(root, &["channels", "telegram", "briefing_chat_id"]).map(|n| n.to_string()))
                    .ok_or(ConfigError::Missing {
                        key: "channels.telegram.briefing_chat_id",
                        env: "TELEGRAM_CHAT_ID",
                    })?;
                let id: i64 = raw.parse().map_err(|_| ConfigError::Invalid {
                    key: "channels.telegram.briefing_chat_id",
                    reason: format!("'{}' is not a Telegram chat id", raw),
                })?;
                (token, platform.channel_id(&id.to_string()))
            }
        };

        let gemini = GeminiSettings {
            api_key: lookup("GEMINI_API_KEY", &["gemini", "api_key"])
                .ok_or(ConfigError::Missing { key: "gemini.api_key", env: "GEMINI_API_KEY" })?,
            model: lookup("GEMINI_MODEL", &["gemini", "model"]).unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            endpoint: str_at(root, &["gemini", "endpoint"]).unwrap_or_else(|| DEFAULT_GEMINI_ENDPOINT.to_string()),
            timeout_secs: u64_at(root, &["gemini", "timeout_secs"])
                .filter(|s| *s > 0)
                .unwrap_or(DEFAULT_GEMINI_TIMEOUT_SECS),
        };

        let briefing_node = root.get("briefing");
        let hour = u64_at(root, &["briefing", "hour"]).unwrap_or(u64::from(DEFAULT_BRIEFING_HOUR));
        let minute = u64_at(root, &["briefing", "minute"]).unwrap_or(u64::from(DEFAULT_BRIEFING_MINUTE));
        if hour > 23 {
            return Err(ConfigError::Invalid { key: "briefing.hour", reason: format!("{} is not 0-23", hour) });
        }
        if minute > 59 {
            return Err(ConfigError::Invalid { key: "briefing.minute", reason: format!("{} is not 0-59", minute) });
        }
        let timezone = match str_at(root, &["briefing", "timezone"]) {
            Some(name) => name.parse::<Tz>().map_err(|_| ConfigError::Invalid {
                key: "briefing.timezone",
                reason: format!("unknown time zone '{}'", name),
            })?,
            None => DEFAULT_BRIEFING_TIMEZONE,
        };
        let flag = |name: &str| briefing_node.and_then(|b| b.get(name)).and_then(Value::as_bool);

        let briefing = BriefingSettings {
            enabled: flag("enabled").unwrap_or(true),
            channel_id: briefing_channel_id,
            hour: hour as u32,
            minute: minute as u32,
            timezone,
            echo_prompt: flag("echo_prompt").unwrap_or(true),
        };

        Ok(Config { platform, platform_token, gemini, briefing })
    }
}

fn read_settings(path: &Path, required: bool) -> Result<Value, ConfigError> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            return Ok(Value::Object(Default::default()));
        }
        Err(source) => return Err(ConfigError::Read { path: path.to_path_buf(), source }),
    };
    serde_json::from_str(&data).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

fn at<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(root, |node, key| node.get(key))
}

fn str_at(root: &Value, path: &[&str]) -> Option<String> {
    at(root, path)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn u64_at(root: &Value, path: &[&str]) -> Option<u64> {
    at(root, path).and_then(Value::as_u64)
}

fn i64_at(root: &Value, path: &[&str]) -> Option<i64> {
    at(root, path).and_then(Value::as_i64)
}
