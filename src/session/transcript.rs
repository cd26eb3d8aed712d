//! Conversation transcript

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::protocol::Role;

/// One line of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Local>,
    pub role: Role,
    pub text: String,
    /// Still receiving updates
    pub is_partial: bool,
}

/// Ordered transcript with in-place merging of partial lines
///
/// The current user line is replaced wholesale by each new user transcript.
/// Assistant deltas append to the in-progress assistant line until a
/// completion marker or an interrupt freezes it.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    entries: Vec<TranscriptEntry>,
}

impl TranscriptLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current user transcript
    ///
    /// Returns the entry as it now stands.
    pub fn set_user(&mut self, text: &str) -> &TranscriptEntry {
        let text = text.trim();
        let index = match self.partial_index(Role::User) {
            Some(index) => {
                self.entries[index].text = text.to_string();
                index
            }
            None => {
                self.freeze(Role::Assistant);
                self.push(Role::User, text.to_string())
            }
        };
        &self.entries[index]
    }

    /// Append to the in-progress assistant transcript
    pub fn append_assistant(&mut self, delta: &str) -> &TranscriptEntry {
        let index = match self.partial_index(Role::Assistant) {
            Some(index) => {
                self.entries[index].text.push_str(delta);
                index
            }
            None => {
                self.freeze(Role::User);
                self.push(Role::Assistant, delta.to_string())
            }
        };
        &self.entries[index]
    }

    /// Freeze every partial line
    pub fn complete(&mut self) {
        for entry in &mut self.entries {
            entry.is_partial = false;
        }
    }

    /// Drop the in-progress assistant line's partial status
    ///
    /// Whatever was already spoken is kept; the next delta starts a new line.
    pub fn interrupt(&mut self) {
        self.freeze(Role::Assistant);
    }

    /// All lines in arrival order
    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Text of the in-progress line for `role`, if any
    #[must_use]
    pub fn in_progress(&self, role: Role) -> Option<&str> {
        self.partial_index(role)
            .map(|index| self.entries[index].text.as_str())
    }

    /// Text of every line spoken by `role`
    pub fn texts(&self, role: Role) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |e| e.role == role)
            .map(|e| e.text.as_str())
    }

    fn partial_index(&self, role: Role) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|e| e.role == role && e.is_partial)
    }

    fn freeze(&mut self, role: Role) {
        if let Some(index) = self.partial_index(role) {
            self.entries[index].is_partial = false;
        }
    }

    fn push(&mut self, role: Role, text: String) -> usize {
        self.entries.push(TranscriptEntry {
            timestamp: Local::now(),
            role,
            text,
            is_partial: true,
        });
        self.entries.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_text_replaces_current_line() {
        let mut log = TranscriptLog::new();
        log.set_user("he's not");
        log.set_user("he's not breathing");
        assert_eq!(log.entries().len(), 1);
        assert_eq!(log.in_progress(Role::User), Some("he's not breathing"));
    }

    #[test]
    fn deltas_merge_until_done() {
        let mut log = TranscriptLog::new();
        log.set_user("help");
        log.append_assistant("Start ");
        log.append_assistant("compressions.");
        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.in_progress(Role::User), None);
        assert_eq!(log.in_progress(Role::Assistant), Some("Start compressions."));

        log.complete();
        log.append_assistant("Good.");
        let texts: Vec<&str> = log.texts(Role::Assistant).collect();
        assert_eq!(texts, vec!["Start compressions.", "Good."]);
    }

    #[test]
    fn interrupt_resets_in_progress_line() {
        let mut log = TranscriptLog::new();
        log.append_assistant("Tilt the head");
        log.interrupt();
        assert_eq!(log.in_progress(Role::Assistant), None);

        log.append_assistant("Okay, stop.");
        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.entries()[0].text, "Tilt the head");
        assert!(!log.entries()[0].is_partial);
    }
}
