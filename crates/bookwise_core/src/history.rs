//! crates/bookwise_core/src/history.rs
//!
//! Builds the conversational context sent alongside a new query.

use crate::domain::{LibraryItem, Message, Role};
use serde::{Deserialize, Serialize};

/// One prior turn as the completion service sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Title/author metadata for a library book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub title: String,
    pub author: String,
}

impl From<&LibraryItem> for LibraryEntry {
    fn from(item: &LibraryItem) -> Self {
        Self {
            title: item.title.clone(),
            author: item.author.clone(),
        }
    }
}

/// Produces the ordered history for a completion request.
///
/// Messages are ordered by timestamp (stable, so equal timestamps keep their
/// transcript position). When the transcript already ends with the user's
/// pending `query`, that entry is left out: the query travels separately.
pub fn assemble_history(messages: &[Message], query: &str) -> Vec<HistoryEntry> {
    let mut ordered: Vec<&Message> = messages.iter().collect();
    ordered.sort_by_key(|m| m.created_at);

    if let Some(last) = ordered.last() {
        if last.role == Role::User && last.content.trim() == query.trim() {
            ordered.pop();
        }
    }

    ordered
        .into_iter()
        .map(|m| HistoryEntry::new(m.role, m.content.clone()))
        .collect()
}

pub fn library_context(items: &[LibraryItem]) -> Vec<LibraryEntry> {
    items.iter().map(LibraryEntry::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn transcript(turns: &[(Role, &str)]) -> Vec<Message> {
        let session_id = Uuid::new_v4();
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        turns
            .iter()
            .enumerate()
            .map(|(i, (role, content))| Message {
                id: Uuid::new_v4(),
                session_id,
                role: *role,
                content: content.to_string(),
                created_at: start + Duration::seconds(i as i64),
                audio_src: None,
            })
            .collect()
    }

    #[test]
    fn prior_turns_are_passed_through_unchanged() {
        let messages = transcript(&[(Role::User, "hi"), (Role::Assistant, "hello")]);

        let history = assemble_history(&messages, "what is 1984 about?");

        assert_eq!(
            history,
            vec![
                HistoryEntry::new(Role::User, "hi"),
                HistoryEntry::new(Role::Assistant, "hello"),
            ]
        );
    }

    #[test]
    fn persisted_pending_query_is_excluded() {
        let messages = transcript(&[
            (Role::User, "hi"),
            (Role::Assistant, "hello"),
            (Role::User, "what is 1984 about?"),
        ]);

        let history = assemble_history(&messages, "what is 1984 about?");

        assert_eq!(history.len(), 2);
        assert_eq!(history.last().unwrap().content, "hello");
    }

    #[test]
    fn earlier_identical_question_is_kept() {
        let messages = transcript(&[
            (Role::User, "again?"),
            (Role::Assistant, "sure"),
        ]);

        let history = assemble_history(&messages, "again?");

        assert_eq!(history.len(), 2);
    }

    #[test]
    fn output_follows_timestamp_order() {
        let mut messages = transcript(&[
            (Role::User, "first"),
            (Role::Assistant, "second"),
            (Role::User, "third"),
            (Role::Assistant, "fourth"),
        ]);
        messages.reverse();

        let history = assemble_history(&messages, "fifth");
        let contents: Vec<&str> = history.iter().map(|h| h.content.as_str()).collect();

        assert_eq!(contents, vec!["first", "second", "third", "fourth"]);
    }

    #[test]
    fn empty_transcript_yields_empty_history() {
        assert!(assemble_history(&[], "anything").is_empty());
    }

    #[test]
    fn library_context_keeps_only_title_and_author() {
        let item = LibraryItem {
            id: Uuid::new_v4(),
            owner: Uuid::new_v4(),
            title: "1984".into(),
            author: "George Orwell".into(),
            cover_ref: Some("covers/1984.png".into()),
            created_at: Utc::now(),
        };

        let context = library_context(&[item]);

        assert_eq!(
            context,
            vec![LibraryEntry {
                title: "1984".into(),
                author: "George Orwell".into()
            }]
        );
    }
}
