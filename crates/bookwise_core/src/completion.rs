//! crates/bookwise_core/src/completion.rs
//!
//! Request and response shapes exchanged with the completion service.
//!
//! The auxiliary response fields have changed between prompt revisions, so every
//! field beyond the main answer is optional and unknown keys are kept in `extras`.

use crate::history::{HistoryEntry, LibraryEntry};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upper bound on suggested follow-up questions kept from a response.
pub const MAX_FOLLOW_UPS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub query: String,
    #[serde(default)]
    pub chat_history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<Vec<LibraryEntry>>,
    /// The book a companion session is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_book: Option<LibraryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResponse {
    pub main_response: String,
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did_you_know: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_book_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl CompletionResponse {
    pub fn new(main_response: impl Into<String>) -> Self {
        Self {
            main_response: main_response.into(),
            ..Default::default()
        }
    }

    /// Trims every text field, drops blank optionals and caps the follow-ups.
    pub fn normalized(mut self) -> Self {
        self.main_response = self.main_response.trim().to_string();
        self.follow_up_questions = self
            .follow_up_questions
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .take(MAX_FOLLOW_UPS)
            .collect();
        self.did_you_know = non_blank(self.did_you_know);
        self.relevant_book_title = non_blank(self.relevant_book_title);
        self.page_reference = non_blank(self.page_reference);
        self.quote = non_blank(self.quote);
        self
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_response_and_keeps_unknown_fields() {
        let json = r#"{
            "mainResponse": "It is about surveillance.",
            "followUpQuestions": ["Who is Big Brother?"],
            "mood": "ominous"
        }"#;
        let response: CompletionResponse = serde_json::from_str(json).unwrap();

        assert_eq!(response.main_response, "It is about surveillance.");
        assert_eq!(response.follow_up_questions.len(), 1);
        assert!(response.did_you_know.is_none());
        assert_eq!(response.extras.get("mood"), Some(&Value::from("ominous")));
    }

    #[test]
    fn normalization_caps_follow_ups_and_drops_blank_titles() {
        let response = CompletionResponse {
            main_response: "  answer ".into(),
            follow_up_questions: vec!["a".into(), " ".into(), "b".into(), "c".into(), "d".into()],
            relevant_book_title: Some("   ".into()),
            did_you_know: Some(" fact ".into()),
            ..Default::default()
        }
        .normalized();

        assert_eq!(response.main_response, "answer");
        assert_eq!(response.follow_up_questions, vec!["a", "b", "c"]);
        assert_eq!(response.relevant_book_title, None);
        assert_eq!(response.did_you_know.as_deref(), Some("fact"));
    }

    #[test]
    fn request_serializes_with_external_field_names() {
        let request = CompletionRequest {
            query: "q".into(),
            chat_history: vec![],
            library: None,
            focus_book: None,
            model: Some("gemini-2.0-flash".into()),
        };
        let value = serde_json::to_value(&request).unwrap();

        assert!(value.get("chatHistory").is_some());
        assert!(value.get("library").is_none());
        assert_eq!(value["model"], "gemini-2.0-flash");
    }
}
