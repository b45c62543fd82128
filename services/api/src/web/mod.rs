pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

// Re-export the handlers to make them easily accessible
// to the binary that will build the web server router.
pub use middleware::require_owner;
pub use rest::{
    add_library_item_handler, create_session_handler, delete_library_item_handler,
    delete_session_handler, get_settings_handler, list_library_handler, list_messages_handler,
    list_sessions_handler, rename_session_handler, send_message_handler, update_cover_handler,
    update_settings_handler, upload_book_handler,
};
pub use state::{AppState, TurnGate};
pub use ws_handler::ws_handler;

/// All API routes. Every one of them requires the caller's id.
pub fn api_routes(app_state: Arc<AppState>) -> Router {
    let body_limit = app_state.config.body_limit();
    Router::new()
        .route(
            "/sessions",
            post(create_session_handler).get(list_sessions_handler),
        )
        .route(
            "/sessions/{id}",
            patch(rename_session_handler).delete(delete_session_handler),
        )
        .route(
            "/sessions/{id}/messages",
            get(list_messages_handler).post(send_message_handler),
        )
        .route(
            "/library",
            get(list_library_handler).post(add_library_item_handler),
        )
        .route("/library/upload", post(upload_book_handler))
        .route("/library/{id}", axum::routing::delete(delete_library_item_handler))
        .route("/library/{id}/cover", patch(update_cover_handler))
        .route(
            "/settings",
            get(get_settings_handler).put(update_settings_handler),
        )
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn(require_owner))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(app_state)
}
