use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::core::message::Message;
use crate::core::usage::UsageLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cancellation handle of the reply currently being streamed.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    pub id: uuid::Uuid,
    pub cancel: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl StreamHandle {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            cancel: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }
}

impl Default for StreamHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// `Idle -> Streaming -> Idle`. Entering `Streaming` while already streaming
/// is rejected by the store.
#[derive(Debug, Clone, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming(StreamHandle),
}

impl StreamState {
    pub fn is_streaming(&self) -> bool {
        matches!(self, StreamState::Streaming(_))
    }

    pub fn handle(&self) -> Option<&StreamHandle> {
        match self {
            StreamState::Streaming(handle) => Some(handle),
            StreamState::Idle => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub display_name: String,
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub last_activity: DateTime<Utc>,
    pub stream: StreamState,
    pub usage: UsageLedger,
}

impl Session {
    pub fn new(user_id: UserId, display_name: String, system_prompt: String) -> Self {
        Self {
            user_id,
            display_name,
            system_prompt,
            history: Vec::new(),
            last_activity: Utc::now(),
            stream: StreamState::Idle,
            usage: UsageLedger::default(),
        }
    }

    /// Too many messages, or quiet for longer than `max_age_secs`.
    pub fn is_stale(&self, max_count: usize, max_age_secs: u64, now: DateTime<Utc>) -> bool {
        let idle = now.signed_duration_since(self.last_activity);
        let max_age = i64::try_from(max_age_secs).unwrap_or(i64::MAX);
        self.history.len() > max_count || idle.num_seconds() > max_age
    }

    /// Clears the whole history when stale. Returns whether it did.
    pub fn evict_if_stale(&mut self, max_count: usize, max_age_secs: u64, now: DateTime<Utc>) -> bool {
        if !self.is_stale(max_count, max_age_secs, now) {
            return false;
        }
        tracing::debug!(
            user_id = %self.user_id,
            dropped = self.history.len(),
            "Resetting conversation history"
        );
        self.history.clear();
        true
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }
}
