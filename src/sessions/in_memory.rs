//! In-memory session store implementation.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::history::ConversationHistory;
use super::traits::{ConversationEntry, SessionId, SessionStore};
use crate::error::GenerateError;

/// An in-memory session store backed by a mutex-protected hash map.
///
/// The map lock covers insert/lookup/remove only. Each history carries its own
/// lock, so sessions never contend with each other on appends.
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Arc<ConversationHistory>>>,
    max_history_entries: usize,
}

impl InMemorySessionStore {
    /// `max_history_entries == 0` keeps histories unbounded.
    pub fn new(max_history_entries: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_history_entries,
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: &SessionId) -> Option<Arc<ConversationHistory>> {
        self.sessions.lock().get(id).cloned()
    }

    fn get_or_create(&self, id: &SessionId) -> Arc<ConversationHistory> {
        let mut sessions = self.sessions.lock();
        if let Some(history) = sessions.get(id) {
            return Arc::clone(history);
        }
        let history = Arc::new(ConversationHistory::new(self.max_history_entries));
        sessions.insert(id.clone(), Arc::clone(&history));
        tracing::debug!(session = %id, "Session created");
        history
    }

    fn clear(&self, id: &SessionId) -> bool {
        let removed = self.sessions.lock().remove(id).is_some();
        if removed {
            tracing::debug!(session = %id, "Session cleared");
        }
        removed
    }

    fn history_of(&self, id: &SessionId) -> Result<Vec<ConversationEntry>, GenerateError> {
        let history = self
            .get(id)
            .ok_or_else(|| GenerateError::SessionNotFound(id.to_string()))?;
        Ok(history.snapshot())
    }

    fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.lock().keys().cloned().collect()
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
