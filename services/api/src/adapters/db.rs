//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of the
//! persistence ports from the `core` crate. It handles all interactions with the
//! PostgreSQL database using `sqlx`, and announces committed writes on an `EventHub`.

use async_trait::async_trait;
use bookwise_core::domain::{LibraryItem, Message, NewLibraryItem, NewMessage, Role, Session};
use bookwise_core::events::{EventHub, StoreEvent, Subscription, Topic};
use bookwise_core::ports::{KeyValueStore, LibraryStore, PortError, PortResult, SessionStore};
use bookwise_core::validation;
use chrono::{DateTime, Utc};
use sqlx::error::ErrorKind;
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the session, library and settings ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
    events: EventHub,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool, events: EventHub) -> Self {
        Self { pool, events }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    owner: Uuid,
    title: String,
    book_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}
impl SessionRecord {
    fn to_domain(self) -> Session {
        Session {
            id: self.id,
            owner: self.owner,
            title: self.title,
            book_id: self.book_id,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    session_id: Uuid,
    role: String,
    content: String,
    audio_src: Option<String>,
    created_at: DateTime<Utc>,
}
impl MessageRecord {
    fn to_domain(self) -> PortResult<Message> {
        let role: Role = self.role.parse().map_err(PortError::Unexpected)?;
        Ok(Message {
            id: self.id,
            session_id: self.session_id,
            role,
            content: self.content,
            created_at: self.created_at,
            audio_src: self.audio_src,
        })
    }
}

#[derive(FromRow)]
struct LibraryItemRecord {
    id: Uuid,
    owner: Uuid,
    title: String,
    author: String,
    cover_ref: Option<String>,
    created_at: DateTime<Utc>,
}
impl LibraryItemRecord {
    fn to_domain(self) -> LibraryItem {
        LibraryItem {
            id: self.id,
            owner: self.owner,
            title: self.title,
            author: self.author,
            cover_ref: self.cover_ref,
            created_at: self.created_at,
        }
    }
}

const SESSION_COLUMNS: &str = "id, owner, title, book_id, created_at";
const MESSAGE_COLUMNS: &str = "id, session_id, role, content, audio_src, created_at";
const LIBRARY_COLUMNS: &str = "id, owner, title, author, cover_ref, created_at";

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn session_not_found(session_id: Uuid) -> PortError {
    PortError::NotFound(format!("Session {} not found", session_id))
}

fn item_not_found(item_id: Uuid) -> PortError {
    PortError::NotFound(format!("Library item {} not found", item_id))
}

/// Maps a foreign-key violation (missing parent row) to `NotFound`.
fn missing_parent(e: sqlx::Error, not_found: PortError) -> PortError {
    match &e {
        sqlx::Error::Database(db) if db.kind() == ErrorKind::ForeignKeyViolation => not_found,
        _ => unexpected(e),
    }
}

//=========================================================================================
// `SessionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionStore for DbAdapter {
    async fn create_session(
        &self,
        owner: Uuid,
        title: &str,
        book_id: Option<Uuid>,
    ) -> PortResult<Session> {
        let title = validation::title(title)?;
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "INSERT INTO chat_sessions (id, owner, title, book_id) VALUES ($1, $2, $3, $4) RETURNING {SESSION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(owner)
        .bind(title)
        .bind(book_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            missing_parent(
                e,
                PortError::NotFound(format!("Library item {:?} not found", book_id)),
            )
        })?;

        let session = record.to_domain();
        self.events.publish(StoreEvent::SessionCreated {
            session: session.clone(),
        });
        Ok(session)
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = $1"
        ))
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => session_not_found(session_id),
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn list_sessions(&self, owner: Uuid) -> PortResult<Vec<Session>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE owner = $1 ORDER BY created_at DESC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn rename_session(&self, session_id: Uuid, title: &str) -> PortResult<Session> {
        let title = validation::title(title)?;
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "UPDATE chat_sessions SET title = $1 WHERE id = $2 RETURNING {SESSION_COLUMNS}"
        ))
        .bind(title)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| session_not_found(session_id))?;

        let session = record.to_domain();
        self.events.publish(StoreEvent::SessionRenamed {
            session_id,
            owner: session.owner,
            title: session.title.clone(),
        });
        Ok(session)
    }

    async fn delete_session(&self, session_id: Uuid) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let removed = sqlx::query("DELETE FROM chat_messages WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?
            .rows_affected();

        let owner: Option<(Uuid,)> =
            sqlx::query_as("DELETE FROM chat_sessions WHERE id = $1 RETURNING owner")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(unexpected)?;

        let Some((owner,)) = owner else {
            tx.rollback().await.map_err(unexpected)?;
            return Err(session_not_found(session_id));
        };
        tx.commit().await.map_err(unexpected)?;

        debug!(%session_id, messages = removed, "Deleted session and its messages");
        self.events
            .publish(StoreEvent::SessionDeleted { session_id, owner });
        Ok(())
    }

    async fn append_message(&self, session_id: Uuid, message: NewMessage) -> PortResult<Message> {
        // The timestamp is forced past the session's latest message so ordering stays total.
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "INSERT INTO chat_messages (id, session_id, role, content, audio_src, created_at)
             VALUES ($1, $2, $3, $4, $5, GREATEST(
                 clock_timestamp(),
                 (SELECT MAX(created_at) + INTERVAL '1 microsecond' FROM chat_messages WHERE session_id = $2)
             ))
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(message.role.as_str())
        .bind(message.content)
        .bind(message.audio_src)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| missing_parent(e, session_not_found(session_id)))?;

        let committed = record.to_domain()?;
        self.events.publish(StoreEvent::MessageAppended {
            message: committed.clone(),
        });
        Ok(committed)
    }

    async fn list_messages(&self, session_id: Uuid) -> PortResult<Vec<Message>> {
        // Distinguish "no such session" from "no messages yet".
        self.get_session(session_id).await?;

        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE session_id = $1 ORDER BY created_at ASC, seq ASC"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    fn subscribe(&self, topic: Topic) -> Subscription {
        self.events.subscribe(topic)
    }
}

//=========================================================================================
// `LibraryStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl LibraryStore for DbAdapter {
    async fn add_item(&self, owner: Uuid, item: NewLibraryItem) -> PortResult<LibraryItem> {
        let item = validation::library_item(item)?;
        let record = sqlx::query_as::<_, LibraryItemRecord>(&format!(
            "INSERT INTO library_items (id, owner, title, author, cover_ref) VALUES ($1, $2, $3, $4, $5) RETURNING {LIBRARY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(owner)
        .bind(item.title)
        .bind(item.author)
        .bind(item.cover_ref)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn list_items(&self, owner: Uuid) -> PortResult<Vec<LibraryItem>> {
        let records = sqlx::query_as::<_, LibraryItemRecord>(&format!(
            "SELECT {LIBRARY_COLUMNS} FROM library_items WHERE owner = $1 ORDER BY created_at ASC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn get_item(&self, item_id: Uuid) -> PortResult<LibraryItem> {
        let record = sqlx::query_as::<_, LibraryItemRecord>(&format!(
            "SELECT {LIBRARY_COLUMNS} FROM library_items WHERE id = $1"
        ))
        .bind(item_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => item_not_found(item_id),
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn update_cover(
        &self,
        item_id: Uuid,
        cover_ref: Option<String>,
    ) -> PortResult<LibraryItem> {
        let record = sqlx::query_as::<_, LibraryItemRecord>(&format!(
            "UPDATE library_items SET cover_ref = $1 WHERE id = $2 RETURNING {LIBRARY_COLUMNS}"
        ))
        .bind(cover_ref)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| item_not_found(item_id))?;
        Ok(record.to_domain())
    }

    async fn delete_item(&self, item_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM library_items WHERE id = $1")
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(item_not_found(item_id));
        }
        Ok(())
    }
}

//=========================================================================================
// `KeyValueStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl KeyValueStore for DbAdapter {
    async fn get(&self, key: &str) -> PortResult<Option<String>> {
        let value: Option<(String,)> = sqlx::query_as("SELECT value FROM user_settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(value.map(|(v,)| v))
    }

    async fn set(&self, key: &str, value: &str) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO user_settings (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}
