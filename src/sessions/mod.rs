//! Session management: per-session conversation memory.

pub mod history;
pub mod in_memory;
pub mod traits;

pub use history::ConversationHistory;
pub use in_memory::InMemorySessionStore;
pub use traits::{ConversationEntry, Role, SessionId, SessionStore};

use crate::config::SessionsConfig;
use std::sync::Arc;

/// Create the default in-memory session store from config.
pub fn create_session_store(config: &SessionsConfig) -> Arc<dyn SessionStore> {
    Arc::new(InMemorySessionStore::new(config.max_history_entries))
}
