//! crates/bookwise_core/src/memory.rs
//!
//! An in-process implementation of the persistence ports.
//!
//! Used by the test suites and by the API when no database is configured.
//! Every write holds the lock for its whole duration, so a delete removes a
//! session and its transcript in one step.

use crate::domain::{LibraryItem, Message, NewLibraryItem, NewMessage, Session};
use crate::events::{EventHub, StoreEvent, Subscription, Topic};
use crate::ports::{KeyValueStore, LibraryStore, PortError, PortResult, SessionStore};
use crate::validation;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Session>,
    transcripts: HashMap<Uuid, Vec<Message>>,
    library: HashMap<Uuid, LibraryItem>,
    values: HashMap<String, String>,
    last_session_at: Option<DateTime<Utc>>,
    last_item_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    events: EventHub,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: EventHub) -> Self {
        Self {
            inner: RwLock::default(),
            events,
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Number of messages held across all sessions.
    pub async fn message_count(&self) -> usize {
        self.inner
            .read()
            .await
            .transcripts
            .values()
            .map(Vec::len)
            .sum()
    }
}

/// A timestamp strictly after `previous`, so insertion order is a total order.
fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

fn session_not_found(session_id: Uuid) -> PortError {
    PortError::NotFound(format!("Session {} not found", session_id))
}

fn item_not_found(item_id: Uuid) -> PortError {
    PortError::NotFound(format!("Library item {} not found", item_id))
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(
        &self,
        owner: Uuid,
        title: &str,
        book_id: Option<Uuid>,
    ) -> PortResult<Session> {
        let title = validation::title(title)?;
        let session = {
            let mut inner = self.inner.write().await;
            if let Some(book_id) = book_id.filter(|id| !inner.library.contains_key(id)) {
                return Err(item_not_found(book_id));
            }
            let created_at = next_timestamp(inner.last_session_at);
            inner.last_session_at = Some(created_at);
            let session = Session {
                id: Uuid::new_v4(),
                owner,
                title,
                book_id,
                created_at,
            };
            inner.sessions.insert(session.id, session.clone());
            inner.transcripts.insert(session.id, Vec::new());
            session
        };
        debug!(session_id = %session.id, %owner, "Created session");
        self.events.publish(StoreEvent::SessionCreated {
            session: session.clone(),
        });
        Ok(session)
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        self.inner
            .read()
            .await
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| session_not_found(session_id))
    }

    async fn list_sessions(&self, owner: Uuid) -> PortResult<Vec<Session>> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn rename_session(&self, session_id: Uuid, title: &str) -> PortResult<Session> {
        let title = validation::title(title)?;
        let session = {
            let mut inner = self.inner.write().await;
            let session = inner
                .sessions
                .get_mut(&session_id)
                .ok_or_else(|| session_not_found(session_id))?;
            session.title = title;
            session.clone()
        };
        self.events.publish(StoreEvent::SessionRenamed {
            session_id,
            owner: session.owner,
            title: session.title.clone(),
        });
        Ok(session)
    }

    async fn delete_session(&self, session_id: Uuid) -> PortResult<()> {
        let owner = {
            let mut inner = self.inner.write().await;
            let session = inner
                .sessions
                .remove(&session_id)
                .ok_or_else(|| session_not_found(session_id))?;
            inner.transcripts.remove(&session_id);
            session.owner
        };
        debug!(%session_id, "Deleted session and its messages");
        self.events
            .publish(StoreEvent::SessionDeleted { session_id, owner });
        Ok(())
    }

    async fn append_message(&self, session_id: Uuid, message: NewMessage) -> PortResult<Message> {
        let committed = {
            let mut inner = self.inner.write().await;
            let transcript = inner
                .transcripts
                .get_mut(&session_id)
                .ok_or_else(|| session_not_found(session_id))?;
            let committed = Message {
                id: Uuid::new_v4(),
                session_id,
                role: message.role,
                content: message.content,
                created_at: next_timestamp(transcript.last().map(|m| m.created_at)),
                audio_src: message.audio_src,
            };
            transcript.push(committed.clone());
            committed
        };
        self.events.publish(StoreEvent::MessageAppended {
            message: committed.clone(),
        });
        Ok(committed)
    }

    async fn list_messages(&self, session_id: Uuid) -> PortResult<Vec<Message>> {
        self.inner
            .read()
            .await
            .transcripts
            .get(&session_id)
            .cloned()
            .ok_or_else(|| session_not_found(session_id))
    }

    fn subscribe(&self, topic: Topic) -> Subscription {
        self.events.subscribe(topic)
    }
}

#[async_trait]
impl LibraryStore for MemoryStore {
    async fn add_item(&self, owner: Uuid, item: NewLibraryItem) -> PortResult<LibraryItem> {
        let item = validation::library_item(item)?;
        let mut inner = self.inner.write().await;
        let created_at = next_timestamp(inner.last_item_at);
        inner.last_item_at = Some(created_at);
        let stored = LibraryItem {
            id: Uuid::new_v4(),
            owner,
            title: item.title,
            author: item.author,
            cover_ref: item.cover_ref,
            created_at,
        };
        inner.library.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_items(&self, owner: Uuid) -> PortResult<Vec<LibraryItem>> {
        let inner = self.inner.read().await;
        let mut items: Vec<LibraryItem> = inner
            .library
            .values()
            .filter(|i| i.owner == owner)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.created_at);
        Ok(items)
    }

    async fn get_item(&self, item_id: Uuid) -> PortResult<LibraryItem> {
        self.inner
            .read()
            .await
            .library
            .get(&item_id)
            .cloned()
            .ok_or_else(|| item_not_found(item_id))
    }

    async fn update_cover(
        &self,
        item_id: Uuid,
        cover_ref: Option<String>,
    ) -> PortResult<LibraryItem> {
        let mut inner = self.inner.write().await;
        let item = inner
            .library
            .get_mut(&item_id)
            .ok_or_else(|| item_not_found(item_id))?;
        item.cover_ref = cover_ref;
        Ok(item.clone())
    }

    async fn delete_item(&self, item_id: Uuid) -> PortResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .library
            .remove(&item_id)
            .ok_or_else(|| item_not_found(item_id))?;

        // Companion sessions outlive their book, as with `ON DELETE SET NULL`.
        for session in inner.sessions.values_mut() {
            if session.book_id == Some(item_id) {
                session.book_id = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> PortResult<Option<String>> {
        Ok(self.inner.read().await.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> PortResult<()> {
        self.inner
            .write()
            .await
            .values
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
