//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol used to push live session and
//! transcript changes to the browser.

use bookwise_core::events::StoreEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Follow the caller's session list (creations, renames, deletions).
    WatchSessions,

    /// Follow one session's transcript. Replaces any previous watch.
    WatchSession { session_id: Uuid },

    /// Stop the current watch without closing the connection.
    Unwatch,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms a watch; events follow.
    Watching {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<Uuid>,
    },

    /// The previous watch was released.
    Unwatched,

    /// A committed change matching the current watch.
    Event { event: StoreEvent },

    /// Reports an error to the client, which should display an error message.
    Error { message: String },
}
