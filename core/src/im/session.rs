//! Chat session storage: one conversation per IM channel, in memory only.
//! A session is created by the first message from a channel and is never evicted; everything is
//! lost when the process exits. The store also owns the last briefing date so that the session
//! map and the daily trigger guard live under one lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;

use crate::ai::{BackendError, ChatBackend, ChatMessage};

/// Conversation context of one channel.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub session_id: String,
    pub channel_id: String,
    /// Completed exchanges, oldest first. Only grows.
    pub history: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(channel_id: &str) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            channel_id: channel_id.to_string(),
            history: Vec::new(),
        }
    }

    /// Append `text` as a user turn, send the whole history to the backend and record the reply.
    /// On failure the user turn is dropped again, so history only holds completed exchanges.
    pub async fn send(&mut self, backend: &dyn ChatBackend, text: &str) -> Result<String, BackendError> {
        self.history.push(ChatMessage::user(text));
        match backend.generate(&self.history).await {
            Ok(reply) => {
                self.history.push(ChatMessage::model(reply.clone()));
                Ok(reply)
            }
            Err(e) => {
                self.history.pop();
                Err(e)
            }
        }
    }
}

/// Shared handle to one session. Held across the backend call, so a channel never has two
/// requests in flight against the same history.
pub type SharedSession = Arc<tokio::sync::Mutex<ChatSession>>;

#[derive(Default)]
struct StoreState {
    sessions: HashMap<String, SharedSession>,
    last_briefing_date: Option<NaiveDate>,
}

/// Owned by the application and passed to the worker and the briefing scheduler.
#[derive(Default)]
pub struct SessionStore {
    state: Mutex<StoreState>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the channel's session, creating an empty one on first use.
    pub fn get_or_create(&self, channel_id: &str) -> SharedSession {
        let mut state = self.lock();
        if let Some(session) = state.sessions.get(channel_id) {
            return Arc::clone(session);
        }
        let session = ChatSession::new(channel_id);
        tracing::info!(
            channel = crate::im::log::channel_name(channel_id),
            chat_id = crate::im::log::chat_id(channel_id),
            session_id = %session.session_id,
            "new conversation session"
        );
        let shared = Arc::new(tokio::sync::Mutex::new(session));
        state.sessions.insert(channel_id.to_string(), Arc::clone(&shared));
        shared
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.lock().sessions.contains_key(channel_id)
    }

    /// Number of channels with a session.
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of a channel's history. Waits if a reply for that channel is in flight.
    pub async fn history(&self, channel_id: &str) -> Option<Vec<ChatMessage>> {
        let session = self.lock().sessions.get(channel_id).cloned()?;
        let guard = session.lock().await;
        Some(guard.history.clone())
    }

    /// Record `date` as the day the briefing fired. Returns false when it already fired that day.
    pub fn claim_briefing(&self, date: NaiveDate) -> bool {
        let mut state = self.lock();
        if state.last_briefing_date == Some(date) {
            return false;
        }
        state.last_briefing_date = Some(date);
        true
    }
}
