//! Per-user session state.
//!
//! Each session sits behind its own mutex. Locks are only held for the
//! in-memory update itself, never across network I/O, so unrelated readers
//! (usage queries, cancellation) are not blocked by a streaming reply.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::core::error::SessionError;
use crate::core::message::Message;
use crate::core::session::{Session, StreamHandle, StreamState, UserId};
use crate::core::usage::{PeriodKey, UsageLedger};

pub type SessionCell = Arc<Mutex<Session>>;

pub struct SessionStore {
    sessions: RwLock<HashMap<UserId, SessionCell>>,
    system_prompt: String,
}

fn lock(cell: &SessionCell) -> MutexGuard<'_, Session> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionStore {
    pub fn new(system_prompt: String) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            system_prompt,
        }
    }

    /// Returns the session and whether it was just created.
    pub fn get_or_create(&self, user_id: UserId, display_name: &str) -> (SessionCell, bool) {
        if let Some(cell) = self.get(user_id) {
            return (cell, false);
        }

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(cell) = sessions.get(&user_id) {
            return (Arc::clone(cell), false);
        }
        let cell = Arc::new(Mutex::new(Session::new(
            user_id,
            display_name.to_string(),
            self.system_prompt.clone(),
        )));
        sessions.insert(user_id, Arc::clone(&cell));
        tracing::debug!(%user_id, display_name, "Created session");
        (cell, true)
    }

    pub fn get(&self, user_id: UserId) -> Option<SessionCell> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned()
    }

    fn with_session<T>(
        &self,
        user_id: UserId,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, SessionError> {
        let cell = self.get(user_id).ok_or(SessionError::NotFound(user_id))?;
        let mut session = lock(&cell);
        Ok(f(&mut session))
    }

    pub fn append(&self, user_id: UserId, message: Message) -> Result<(), SessionError> {
        self.with_session(user_id, |s| s.history.push(message))
    }

    /// Commits a finished turn: the user's message and the reply, in order.
    pub fn record_exchange(
        &self,
        user_id: UserId,
        user_message: Message,
        assistant_message: Message,
    ) -> Result<(), SessionError> {
        self.with_session(user_id, |s| {
            s.history.push(user_message);
            s.history.push(assistant_message);
        })
    }

    pub fn history(&self, user_id: UserId) -> Result<Vec<Message>, SessionError> {
        self.with_session(user_id, |s| s.history.clone())
    }

    pub fn system_prompt(&self, user_id: UserId) -> Result<String, SessionError> {
        self.with_session(user_id, |s| s.system_prompt.clone())
    }

    pub fn clear_history(&self, user_id: UserId) -> Result<(), SessionError> {
        self.with_session(user_id, |s| s.history.clear())
    }

    /// Resets the history when it is too long or too old. Call before
    /// [`SessionStore::touch_activity`] for the same inbound message.
    pub fn evict_if_stale(
        &self,
        user_id: UserId,
        max_count: usize,
        max_age_secs: u64,
    ) -> Result<bool, SessionError> {
        self.evict_if_stale_at(user_id, max_count, max_age_secs, Utc::now())
    }

    pub fn evict_if_stale_at(
        &self,
        user_id: UserId,
        max_count: usize,
        max_age_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, SessionError> {
        self.with_session(user_id, |s| s.evict_if_stale(max_count, max_age_secs, now))
    }

    pub fn touch_activity(&self, user_id: UserId) -> Result<(), SessionError> {
        self.with_session(user_id, |s| s.touch(Utc::now()))
    }

    /// Sets or clears the active stream. Setting a handle while another is
    /// active is refused with [`SessionError::Busy`].
    pub fn set_active_stream(
        &self,
        user_id: UserId,
        handle: Option<StreamHandle>,
    ) -> Result<(), SessionError> {
        self.with_session(user_id, |s| {
            match handle {
                Some(_) if s.stream.is_streaming() => return Err(SessionError::Busy(user_id)),
                Some(handle) => s.stream = StreamState::Streaming(handle),
                None => s.stream = StreamState::Idle,
            }
            Ok(())
        })?
    }

    /// `Idle -> Streaming`. The handle's token is how the turn is cancelled.
    pub fn begin_stream(&self, user_id: UserId) -> Result<StreamHandle, SessionError> {
        let handle = StreamHandle::new();
        self.set_active_stream(user_id, Some(handle.clone()))?;
        Ok(handle)
    }

    /// `Streaming -> Idle`, only if `handle` is still the active stream.
    pub fn finish_stream(&self, user_id: UserId, handle: &StreamHandle) {
        let result = self.with_session(user_id, |s| {
            if s.stream.handle().is_some_and(|active| active.id == handle.id) {
                s.stream = StreamState::Idle;
            }
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "Finishing stream for unknown session");
        }
    }

    pub fn is_streaming(&self, user_id: UserId) -> bool {
        self.with_session(user_id, |s| s.stream.is_streaming())
            .unwrap_or(false)
    }

    /// Signals the active stream, if any, to stop. Returns whether one was running.
    pub fn cancel_stream(&self, user_id: UserId) -> bool {
        self.with_session(user_id, |s| match s.stream.handle() {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        })
        .unwrap_or(false)
    }

    pub fn record_usage(
        &self,
        user_id: UserId,
        cost: f64,
        period: &PeriodKey,
    ) -> Result<UsageLedger, SessionError> {
        self.with_session(user_id, |s| {
            s.usage.record(cost, period);
            s.usage.clone()
        })
    }

    pub fn set_usage(&self, user_id: UserId, ledger: UsageLedger) -> Result<(), SessionError> {
        self.with_session(user_id, |s| s.usage = ledger)
    }

    pub fn usage(&self, user_id: UserId) -> Option<UsageLedger> {
        self.with_session(user_id, |s| s.usage.clone()).ok()
    }

    /// Drops the session, cancelling its stream first.
    pub fn remove(&self, user_id: UserId) -> bool {
        self.cancel_stream(user_id);
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
