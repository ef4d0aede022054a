use super::SessionMode;
use crate::errors::SessionError;
use crate::model::Message;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A conversation's identity and accumulated history.
///
/// `id` is allocated locally and stays stable for the life of one
/// conversation. `remote_id` is whatever identity string the configured
/// parser extracted from the target's replies; in stateful mode it must stay
/// identical across turns.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub history: Vec<Message>,
    pub in_use: bool,
    pub remote_id: Option<String>,
    closed: bool,
}

impl Session {
    fn fresh() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            history: Vec::new(),
            in_use: false,
            remote_id: None,
            closed: false,
        }
    }
}

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<String, Session>,
    by_case: HashMap<String, String>,
}

/// Owns every live `Session`. Handles are cheap clones over shared state;
/// all mutation happens under one mutex, so `in_use` transitions and history
/// appends are atomic.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a session with a fresh opaque id.
    pub fn create_session(&self) -> Session {
        let session = Session::fresh();
        let mut inner = self.lock();
        inner.sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Idempotent per test case within one run: the same case id always maps
    /// to the same session for its conversation's lifetime.
    pub fn get_or_create(&self, case_id: &str) -> Session {
        let mut inner = self.lock();
        if let Some(sid) = inner.by_case.get(case_id) {
            if let Some(existing) = inner.sessions.get(sid) {
                return existing.clone();
            }
        }
        let session = Session::fresh();
        inner.by_case.insert(case_id.to_string(), session.id.clone());
        inner.sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Append to the session's history. The history is append-only; a
    /// finalized session rejects further writes.
    pub fn append(&self, session_id: &str, message: Message) -> Result<(), SessionError> {
        let mut inner = self.lock();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::Closed(session_id.to_string()))?;
        if session.closed {
            return Err(SessionError::Closed(session_id.to_string()));
        }
        session.history.push(message);
        Ok(())
    }

    /// Drop the most recent exchange (assistant reply plus the user message
    /// that elicited it) for a backtracking strategy.
    pub fn truncate_last_exchange(&self, session_id: &str) -> Result<(), SessionError> {
        let mut inner = self.lock();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::Closed(session_id.to_string()))?;
        if session.closed {
            return Err(SessionError::Closed(session_id.to_string()));
        }
        for _ in 0..2 {
            if session
                .history
                .last()
                .is_some_and(|m| !matches!(m.role, crate::model::Role::System))
            {
                session.history.pop();
            }
        }
        Ok(())
    }

    pub fn history(&self, session_id: &str) -> Vec<Message> {
        self.lock()
            .sessions
            .get(session_id)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    pub fn remote_identity(&self, session_id: &str) -> Option<String> {
        self.lock()
            .sessions
            .get(session_id)
            .and_then(|s| s.remote_id.clone())
    }

    /// Store the identity extracted from a reply and enforce continuity.
    ///
    /// In stateless mode identity is irrelevant and ignored. In stateful
    /// mode the first turn records whatever was extracted; on every later
    /// turn continuity is required: a missing identity, or one that differs
    /// from the recorded value, violates the target's statefulness contract
    /// and is terminal for the conversation.
    pub fn record_identity(
        &self,
        session_id: &str,
        extracted: Option<String>,
        turn_no: u32,
        mode: SessionMode,
    ) -> Result<(), SessionError> {
        if mode == SessionMode::Stateless {
            return Ok(());
        }
        let mut inner = self.lock();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::Closed(session_id.to_string()))?;

        if turn_no <= 1 {
            session.remote_id = extracted;
            return Ok(());
        }
        match (&session.remote_id, &extracted) {
            (Some(recorded), Some(seen)) if recorded == seen => Ok(()),
            (Some(recorded), Some(seen)) => Err(SessionError::Lost {
                session: session_id.to_string(),
                detail: format!("identity changed from '{recorded}' to '{seen}'"),
            }),
            (_, None) => Err(SessionError::Lost {
                session: session_id.to_string(),
                detail: "target stopped returning a session identity".to_string(),
            }),
            (None, Some(_)) => Err(SessionError::Lost {
                session: session_id.to_string(),
                detail: "no identity was recorded on the first turn".to_string(),
            }),
        }
    }

    /// Close the session; history survives for reporting, writes stop.
    pub fn finalize(&self, session_id: &str) {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            session.closed = true;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_in_use(&self, session_id: &str, in_use: bool) {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            session.in_use = in_use;
        }
    }
}

/// Hands out reusable sessions under the store's mutex; no two callers can
/// acquire the same pooled session simultaneously.
#[derive(Clone)]
pub struct SessionPool {
    store: SessionStore,
    free: Arc<Mutex<Vec<String>>>,
}

impl SessionPool {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            free: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reuse a released session if one is available, otherwise allocate.
    /// The returned guard releases on drop, so every exit path (including
    /// fatal errors) returns the session to the pool.
    pub fn acquire(&self) -> PooledSession {
        let reused = {
            let mut free = self.lock_free();
            free.pop()
        };
        let id = match reused {
            Some(id) => id,
            None => self.store.create_session().id,
        };
        self.store.set_in_use(&id, true);
        PooledSession {
            pool: self.clone(),
            id,
            released: false,
        }
    }

    fn release_id(&self, id: &str) {
        self.store.set_in_use(id, false);
        self.lock_free().push(id.to_string());
    }

    fn lock_free(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        match self.free.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }
}

/// RAII guard over a pooled session.
pub struct PooledSession {
    pool: SessionPool,
    pub id: String,
    released: bool,
}

impl PooledSession {
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if !self.released {
            self.released = true;
            self.pool.release_id(&self.id);
        }
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        self.do_release();
    }
}
