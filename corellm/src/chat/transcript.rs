use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub content: String,
    pub role: Role,
}

/// Ordered log of chat turns. Insertion order is display order.
///
/// Passive: only `append` and `replace_last`. Which entry may be replaced is
/// decided by the controller.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.entries.push(TranscriptEntry {
            id,
            content: content.into(),
            role,
        });
        id
    }

    /// Replace the content of the last entry, keeping its id.
    pub fn replace_last(&mut self, content: impl Into<String>) -> Option<&TranscriptEntry> {
        let last = self.entries.last_mut()?;
        last.content = content.into();
        Some(last)
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_keeps_order() {
        let mut transcript = Transcript::new();
        let first = transcript.append(Role::User, "hi");
        let second = transcript.append(Role::Assistant, "Thinking...");

        assert_ne!(first, second);
        let roles: Vec<_> = transcript.entries().iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_replace_last_keeps_id() {
        let mut transcript = Transcript::new();
        transcript.append(Role::User, "hi");
        let id = transcript.append(Role::Assistant, "Thinking...");

        let replaced = transcript.replace_last("Hello!").cloned().unwrap();
        assert_eq!(replaced.id, id);
        assert_eq!(replaced.content, "Hello!");
        assert_eq!(transcript.entries()[0].content, "hi");
    }

    #[test]
    fn test_replace_last_on_empty() {
        let mut transcript = Transcript::new();
        assert!(transcript.replace_last("nothing").is_none());
        assert!(transcript.is_empty());
    }
}
