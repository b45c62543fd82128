//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service.

use crate::config::ConfigError;
use axum::http::StatusCode;
use bookwise_core::chat::ChatError;
use bookwise_core::ports::PortError;
use tracing::error;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// A turn or session operation rejected by the chat service.
    #[error("Chat Error: {0}")]
    Chat(#[from] ChatError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents an error related to the WebSocket connection.
    #[error("WebSocket Error: {0}")]
    Websocket(#[from] axum::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller tried to start a turn while another is still running.
    #[error("A message is already being processed for session {0}")]
    TurnInFlight(uuid::Uuid),

    /// An uploaded book is larger than the configured limit.
    #[error("The upload is {size} bytes; the limit is {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Port(e) | ApiError::Chat(ChatError::Store(e)) => port_status(e),
            ApiError::Chat(ChatError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::TurnInFlight(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn port_status(e: &PortError) -> StatusCode {
    match e {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Validation(_) => StatusCode::BAD_REQUEST,
        PortError::Unauthorized => StatusCode::FORBIDDEN,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Handlers answer with `(StatusCode, String)`; server-side failures are logged
/// in full and reported with a generic message.
impl From<ApiError> for (StatusCode, String) {
    fn from(err: ApiError) -> Self {
        let status = err.status_code();
        if status.is_server_error() {
            error!("Request failed: {:?}", err);
            (status, "Internal server error".to_string())
        } else {
            (status, err.to_string())
        }
    }
}
