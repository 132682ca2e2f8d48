//! Per-session append-only conversation log.

use parking_lot::Mutex;

use super::traits::{ConversationEntry, Role};

/// Ordered conversation entries for one session.
///
/// The inner lock serializes appends from concurrent requests on the same
/// session. When `max_entries` is non-zero the oldest entries are dropped so
/// the log never grows past it. Trimming never leaves a reply at the head
/// whose human entry was dropped.
#[derive(Debug)]
pub struct ConversationHistory {
    entries: Mutex<Vec<ConversationEntry>>,
    max_entries: usize,
}

impl ConversationHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            max_entries,
        }
    }

    /// Unbounded history.
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    pub fn append(&self, entry: ConversationEntry) {
        let mut entries = self.entries.lock();
        entries.push(entry);
        self.enforce_cap(&mut entries);
    }

    /// Append one turn under a single lock acquisition so turns from
    /// concurrent requests never interleave.
    pub fn append_turn(&self, human: Option<ConversationEntry>, assistant: ConversationEntry) {
        let mut entries = self.entries.lock();
        if let Some(human) = human {
            entries.push(human);
        }
        entries.push(assistant);
        self.enforce_cap(&mut entries);
    }

    pub fn snapshot(&self) -> Vec<ConversationEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn enforce_cap(&self, entries: &mut Vec<ConversationEntry>) {
        if self.max_entries == 0 || entries.len() <= self.max_entries {
            return;
        }
        let mut cut = entries.len() - self.max_entries;
        while cut < entries.len()
            && entries[cut].role == Role::Assistant
            && entries[cut - 1].role == Role::Human
        {
            cut += 1;
        }
        entries.drain(..cut);
    }
}
