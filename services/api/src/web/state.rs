//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-session turn gate.

use crate::config::Config;
use bookwise_core::chat::ChatService;
use bookwise_core::indexing::BookIndexer;
use bookwise_core::ports::{LibraryStore, SessionStore};
use bookwise_core::settings::SettingsRepository;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionStore>,
    pub library: Arc<dyn LibraryStore>,
    pub settings: SettingsRepository,
    pub chat: ChatService,
    pub books: BookIndexer,
    pub config: Arc<Config>,
    pub turns: TurnGate,
}

//=========================================================================================
// TurnGate (At Most One Turn In Flight Per Session)
//=========================================================================================

/// Tracks which sessions currently have a turn running.
#[derive(Clone, Default)]
pub struct TurnGate {
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl TurnGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the session for one turn. Returns `None` if a turn is already running.
    pub fn try_begin(&self, session_id: Uuid) -> Option<TurnGuard> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !in_flight.insert(session_id) {
            return None;
        }
        Some(TurnGuard {
            gate: self.clone(),
            session_id,
        })
    }

    pub fn is_busy(&self, session_id: Uuid) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&session_id)
    }
}

/// Releases the session when dropped, including when the request future is cancelled.
pub struct TurnGuard {
    gate: TurnGate,
    session_id: Uuid,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.gate
            .in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.session_id);
    }
}
