//! Test doubles: a scripted AI backend and a transport that records what it sends.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::ai::{BackendError, ChatBackend, ChatMessage};
use crate::im::transport::{ImChannelCapabilities, ImTransport, SendError};

/// Answers each call with the next scripted result; `Err(reason)` becomes `BackendError::Other`.
/// Once the script runs out every call fails.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    delay: Duration,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Make every call take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// History passed to each call, in call order.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn generate(&self, history: &[ChatMessage]) -> Result<String, BackendError> {
        self.calls.lock().unwrap().push(history.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => Err(BackendError::Other(reason)),
            None => Err(BackendError::Other("script exhausted".into())),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Records sends and typing indicators instead of talking to a platform.
pub struct RecordingTransport {
    prefix: &'static str,
    max_len: usize,
    sent: Mutex<Vec<(String, String)>>,
    typing: Mutex<Vec<String>>,
    /// Number of upcoming sends to reject with a rate limit.
    rate_limits: Mutex<u32>,
}

impl RecordingTransport {
    pub fn new(max_len: usize) -> Self {
        Self {
            prefix: "test",
            max_len,
            sent: Mutex::new(Vec::new()),
            typing: Mutex::new(Vec::new()),
            rate_limits: Mutex::new(0),
        }
    }

    /// Claim another platform's channel ids (default `test`).
    pub fn with_prefix(mut self, prefix: &'static str) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn rate_limit_next(&self, times: u32) {
        *self.rate_limits.lock().unwrap() = times;
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, channel_id: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(c, _)| c == channel_id)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn typing(&self) -> Vec<String> {
        self.typing.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImTransport for RecordingTransport {
    fn capabilities(&self) -> ImChannelCapabilities {
        ImChannelCapabilities {
            max_message_len: self.max_len,
            channel_id_prefix: self.prefix,
        }
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<(), SendError> {
        {
            let mut remaining = self.rate_limits.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SendError::RateLimited { retry_after_secs: 2.0 });
            }
        }
        self.sent.lock().unwrap().push((channel_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_typing(&self, channel_id: &str) -> Result<(), SendError> {
        self.typing.lock().unwrap().push(channel_id.to_string());
        Ok(())
    }
}

/// Poll `cond` until it holds, yielding to other tasks in between. Panics after `max_polls`.
pub async fn wait_until(max_polls: usize, mut cond: impl FnMut() -> bool) {
    for _ in 0..max_polls {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached after {} polls", max_polls);
}
