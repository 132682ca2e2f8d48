//! Session storage traits and types for per-session conversation memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::history::ConversationHistory;
use crate::error::GenerateError;

/// Opaque token identifying one logical session.
///
/// Uniqueness is the only invariant; the format is never inspected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Mint a fresh random (UUID v4) session id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Accept a caller-supplied id, treating blank input as absent.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Who authored a conversation entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

impl Role {
    /// Role name on the OpenAI-compatible wire.
    pub fn chat_role(self) -> &'static str {
        match self {
            Self::Human => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single immutable entry in a session's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Process-wide mapping from session id to conversation history.
///
/// Implementations hold their mapping lock only for the duration of the
/// mapping operation itself; appends go through the per-session lock inside
/// [`ConversationHistory`].
pub trait SessionStore: Send + Sync {
    /// Look up an existing history without creating one.
    fn get(&self, id: &SessionId) -> Option<Arc<ConversationHistory>>;

    /// Return the history for `id`, creating an empty one on first access.
    /// The same shared history is returned until the session is cleared.
    fn get_or_create(&self, id: &SessionId) -> Arc<ConversationHistory>;

    /// Remove the session. Returns whether a mapping existed.
    fn clear(&self, id: &SessionId) -> bool;

    /// Snapshot of the session's entries, or `SessionNotFound` when the id has
    /// never been created (or was cleared).
    fn history_of(&self, id: &SessionId) -> Result<Vec<ConversationEntry>, GenerateError>;

    /// Number of live sessions.
    fn session_count(&self) -> usize;

    /// Ids of all live sessions, in no particular order.
    fn session_ids(&self) -> Vec<SessionId>;

    /// The name of this session store implementation.
    fn name(&self) -> &str;
}
