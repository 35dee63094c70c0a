//! Conversation context rebuilt from reply chains.

mod reconstructor;

pub use reconstructor::{ContextReconstructor, ReconstructedContext};

/// One prior line of conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadEntry {
    pub is_bot: bool,
    pub speaker: String,
    pub text: String,
}

/// Prior turns, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationThread {
    entries: Vec<ThreadEntry>,
}

impl ConversationThread {
    pub fn new(entries: Vec<ThreadEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ThreadEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent `n` entries, still oldest first.
    pub fn tail(&self, n: usize) -> ConversationThread {
        let start = self.entries.len().saturating_sub(n);
        ConversationThread::new(self.entries[start..].to_vec())
    }

    /// `speaker: text` per entry, each line newline-terminated.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}: {}\n", e.speaker, e.text))
            .collect()
    }
}

pub fn alphanumeric_only(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Keeps ASCII alphanumerics only; short results fall back to `default`.
pub fn speaker_name(author_name: &str, default: &str) -> String {
    let trimmed = alphanumeric_only(author_name);
    if trimmed.len() < 3 {
        default.to_string()
    } else {
        trimmed
    }
}
