//! services/api/src/web/middleware.rs
//!
//! Caller identification middleware for the protected routes.

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use tracing::warn;
use uuid::Uuid;

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Parses the caller's id out of the request headers.
pub fn owner_from_headers(headers: &axum::http::HeaderMap) -> Result<Uuid, (StatusCode, String)> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                format!("{} header is required", USER_ID_HEADER),
            )
        })?;

    Uuid::parse_str(raw.trim()).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("Invalid {} format", USER_ID_HEADER),
        )
    })
}

/// Middleware that reads the `x-user-id` header and extracts the owner id.
///
/// If valid, inserts the id into request extensions for handlers to use.
/// If missing returns 401, if malformed returns 400.
pub async fn require_owner(
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let owner = owner_from_headers(req.headers()).inspect_err(|(status, _)| {
        warn!(%status, path = %req.uri().path(), "Rejected request without a valid caller id");
    })?;

    req.extensions_mut().insert(owner);
    Ok(next.run(req).await)
}
