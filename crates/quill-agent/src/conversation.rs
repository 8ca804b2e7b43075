//! Conversation snapshots: identity, creation time, and ordered turns.

use chrono::{DateTime, Utc};
use quill_ai::{Role, Turn};
use serde::{Deserialize, Serialize};

/// Format of generated conversation ids; lexicographic order is chronological.
const ID_FORMAT: &str = "%Y%m%d%H%M%S";

/// A persisted conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(alias = "messages")]
    pub turns: Vec<Turn>,
}

impl Conversation {
    /// Start an empty conversation with a freshly generated id
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(now),
            created_at: now,
            turns: Vec::new(),
        }
    }

    /// Start an empty conversation with a caller-chosen id
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    /// A new snapshot with the same identity and different turns
    pub fn with_turns(&self, turns: Vec<Turn>) -> Self {
        Self {
            id: self.id.clone(),
            created_at: self.created_at,
            turns,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// The first `max_chars` characters of the first user turn
    pub fn preview(&self, max_chars: usize) -> Option<String> {
        self.turns
            .iter()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.chars().take(max_chars).collect())
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a sortable id from a timestamp
pub fn generate_id(now: DateTime<Utc>) -> String {
    now.format(ID_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generate_id_format() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 2).unwrap();
        assert_eq!(generate_id(ts), "20250307090502");
    }

    #[test]
    fn test_ids_sort_chronologically() {
        let earlier = generate_id(Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap());
        let later = generate_id(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert!(earlier < later);
    }

    #[test]
    fn test_serialized_shape() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let conv = Conversation {
            id: "20250102030405".into(),
            created_at: ts,
            turns: vec![Turn::user("hi")],
        };
        let json = serde_json::to_value(&conv).unwrap();
        assert_eq!(json["id"], "20250102030405");
        assert_eq!(json["createdAt"], "2025-01-02T03:04:05Z");
        assert_eq!(json["turns"][0]["role"], "user");
        assert_eq!(json["turns"][0]["content"], "hi");
    }

    #[test]
    fn test_reads_legacy_messages_key() {
        let json = r#"{
            "id": "20240101000000",
            "createdAt": "2024-01-01T00:00:00.000Z",
            "messages": [{"role": "user", "content": "hello"}]
        }"#;
        let conv: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(conv.turns, vec![Turn::user("hello")]);
    }

    #[test]
    fn test_with_turns_keeps_identity() {
        let conv = Conversation::with_id("abc");
        let next = conv.with_turns(vec![Turn::user("a")]);
        assert_eq!(next.id, "abc");
        assert_eq!(next.created_at, conv.created_at);
        assert!(conv.is_empty());
        assert_eq!(next.len(), 1);
    }

    #[test]
    fn test_preview_uses_first_user_turn() {
        let conv = Conversation::with_id("x").with_turns(vec![
            Turn::system("[summary]"),
            Turn::user("你好，請幫我寫一個函式"),
            Turn::user("second"),
        ]);
        assert_eq!(conv.preview(2).as_deref(), Some("你好"));
        assert_eq!(Conversation::with_id("y").preview(10), None);
    }
}
