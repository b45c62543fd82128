//! crates/bookwise_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use crate::completion::{CompletionRequest, CompletionResponse};
use crate::domain::{LibraryItem, Message, NewLibraryItem, NewMessage, Session};
use crate::events::{Subscription, Topic};
use crate::indexing::{IndexBookOutcome, IndexBookRequest};
use async_trait::async_trait;
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Persistence Ports
//=========================================================================================

/// Persists chat sessions and their append-only transcripts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        owner: Uuid,
        title: &str,
        book_id: Option<Uuid>,
    ) -> PortResult<Session>;

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session>;

    /// Sessions owned by `owner`, newest first.
    async fn list_sessions(&self, owner: Uuid) -> PortResult<Vec<Session>>;

    /// Replaces the title and nothing else.
    async fn rename_session(&self, session_id: Uuid, title: &str) -> PortResult<Session>;

    /// Removes the session and every message in it as one unit.
    async fn delete_session(&self, session_id: Uuid) -> PortResult<()>;

    /// Commits a message to the end of the transcript and returns the stored record.
    async fn append_message(&self, session_id: Uuid, message: NewMessage) -> PortResult<Message>;

    /// The transcript in timestamp order.
    async fn list_messages(&self, session_id: Uuid) -> PortResult<Vec<Message>>;

    fn subscribe(&self, topic: Topic) -> Subscription;
}

#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn add_item(&self, owner: Uuid, item: NewLibraryItem) -> PortResult<LibraryItem>;

    async fn list_items(&self, owner: Uuid) -> PortResult<Vec<LibraryItem>>;

    async fn get_item(&self, item_id: Uuid) -> PortResult<LibraryItem>;

    async fn update_cover(&self, item_id: Uuid, cover_ref: Option<String>)
        -> PortResult<LibraryItem>;

    async fn delete_item(&self, item_id: Uuid) -> PortResult<()>;
}

/// A minimal string key-value store used to persist user preferences.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> PortResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> PortResult<()>;
}

//=========================================================================================
// External Service Ports
//=========================================================================================

/// The external, stateless generative-AI completion call.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> PortResult<CompletionResponse>;
}

#[async_trait]
pub trait TextToSpeechService: Send + Sync {
    /// Synthesizes speech for `text` and returns a playable audio reference.
    async fn generate_audio(&self, text: &str) -> PortResult<String>;
}

/// Reads an uploaded book so later conversations can draw on it.
#[async_trait]
pub trait BookIndexingService: Send + Sync {
    async fn index_book(&self, request: &IndexBookRequest) -> PortResult<IndexBookOutcome>;
}
