//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.
//!
//! Every handler runs behind `require_owner`, so the caller's id arrives as an
//! `Extension<Uuid>`.

use crate::error::ApiError;
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bookwise_core::chat::{TurnOutcome, TurnState};
use bookwise_core::domain::{
    ChatSettings, ConversationMode, LibraryItem, Message, NewLibraryItem, Session,
};
use bookwise_core::indexing::{pdf_payload, BookUpload, UploadOutcome};
use bookwise_core::ports::PortError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_session_handler,
        list_sessions_handler,
        rename_session_handler,
        delete_session_handler,
        list_messages_handler,
        send_message_handler,
        list_library_handler,
        add_library_item_handler,
        upload_book_handler,
        update_cover_handler,
        delete_library_item_handler,
        get_settings_handler,
        update_settings_handler,
    ),
    components(
        schemas(
            CreateSessionRequest, CreateSessionResponse, SessionResponse, RenameSessionRequest,
            MessageResponse, SendMessageRequest, TurnResponse, LibraryItemResponse,
            AddLibraryItemRequest, UploadBookRequest, UploadBookResponse, UpdateCoverRequest,
            SettingsResponse, UpdateSettingsRequest,
        )
    ),
    tags(
        (name = "BookWise API", description = "Chat sessions, transcripts, library and settings for the BookWise reading companion.")
    )
)]
pub struct ApiDoc;

/// Converts any service error into the `(StatusCode, String)` rejection handlers return.
fn reject(e: impl Into<ApiError>) -> (StatusCode, String) {
    e.into().into()
}

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: Uuid,
    pub title: String,
    pub book_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            title: session.title,
            book_id: session.book_id,
            created_at: session.created_at,
        }
    }
}

/// A persisted transcript entry.
#[derive(Serialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: Uuid,
    /// `user` or `assistant`.
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_src: Option<String>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            role: message.role.to_string(),
            content: message.content,
            timestamp: message.created_at,
            audio_src: message.audio_src,
        }
    }
}

#[derive(Deserialize, ToSchema, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Start a companion conversation about this library item.
    pub book_id: Option<Uuid>,
}

#[derive(Serialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session: SessionResponse,
    /// The companion greeting, for book sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<MessageResponse>,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct RenameSessionRequest {
    pub title: String,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct SendMessageRequest {
    pub content: String,
}

/// The result of one chat turn.
#[derive(Serialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    /// `completed` or `failed`.
    pub state: String,
    pub user_message: MessageResponse,
    pub assistant_message: MessageResponse,
    pub follow_up_questions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_title: Option<String>,
    pub notices: Vec<String>,
}

fn state_label(state: TurnState) -> &'static str {
    match state {
        TurnState::Idle => "idle",
        TurnState::Sending => "sending",
        TurnState::AwaitingCompletion => "awaiting_completion",
        TurnState::Completed => "completed",
        TurnState::Failed => "failed",
    }
}

impl From<TurnOutcome> for TurnResponse {
    fn from(outcome: TurnOutcome) -> Self {
        Self {
            state: state_label(outcome.state).to_string(),
            user_message: outcome.user_message.into(),
            assistant_message: outcome.assistant_message.into(),
            follow_up_questions: outcome.follow_up_questions,
            new_title: outcome.new_title,
            notices: outcome.notices,
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItemResponse {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub cover_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<LibraryItem> for LibraryItemResponse {
    fn from(item: LibraryItem) -> Self {
        Self {
            id: item.id,
            title: item.title,
            author: item.author,
            cover_ref: item.cover_ref,
            created_at: item.created_at,
        }
    }
}

#[derive(Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AddLibraryItemRequest {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub cover_ref: Option<String>,
}

#[derive(Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadBookRequest {
    /// The PDF as `data:application/pdf;base64,<data>`.
    pub book_data_uri: String,
    pub file_name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Serialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadBookResponse {
    pub success: bool,
    pub message: String,
    pub item: Option<LibraryItemResponse>,
}

impl From<UploadOutcome> for UploadBookResponse {
    fn from(outcome: UploadOutcome) -> Self {
        Self {
            success: outcome.success,
            message: outcome.message,
            item: outcome.item.map(LibraryItemResponse::from),
        }
    }
}

#[derive(Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCoverRequest {
    pub cover_ref: Option<String>,
}

#[derive(Serialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub model: String,
    /// `chat` or `voice`.
    pub conversation_mode: String,
    pub available_models: Vec<String>,
}

#[derive(Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub model: String,
    pub conversation_mode: String,
}

//=========================================================================================
// Session Handlers
//=========================================================================================

/// Create a new chat session.
///
/// With a `bookId` the session becomes a companion chat for that library item
/// and starts with a greeting from the assistant.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body(content = CreateSessionRequest, description = "Optional book to chat about. The body may be omitted."),
    responses(
        (status = 201, description = "Session created", body = CreateSessionResponse),
        (status = 403, description = "The book belongs to another user"),
        (status = 404, description = "Book not found")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn create_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(owner): Extension<Uuid>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let request = body.map(|Json(b)| b).unwrap_or_default();

    let response = match request.book_id {
        Some(book_id) => {
            let (session, greeting) = app_state
                .chat
                .start_book_session(owner, book_id)
                .await
                .map_err(reject)?;
            CreateSessionResponse {
                session: session.into(),
                greeting: Some(greeting.into()),
            }
        }
        None => {
            let session = app_state.chat.create_session(owner).await.map_err(reject)?;
            CreateSessionResponse {
                session: session.into(),
                greeting: None,
            }
        }
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// List the caller's sessions, newest first.
#[utoipa::path(
    get,
    path = "/sessions",
    responses((status = 200, description = "Sessions, newest first", body = [SessionResponse])),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn list_sessions_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(owner): Extension<Uuid>,
) -> Result<Json<Vec<SessionResponse>>, (StatusCode, String)> {
    let sessions = app_state.sessions.list_sessions(owner).await.map_err(reject)?;
    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}

/// Rename a session.
#[utoipa::path(
    patch,
    path = "/sessions/{id}",
    request_body = RenameSessionRequest,
    responses(
        (status = 200, description = "Renamed session", body = SessionResponse),
        (status = 400, description = "Blank title"),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not found")
    ),
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn rename_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(owner): Extension<Uuid>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<RenameSessionRequest>,
) -> Result<Json<SessionResponse>, (StatusCode, String)> {
    app_state
        .chat
        .owned_session(owner, session_id)
        .await
        .map_err(reject)?;
    let session = app_state
        .sessions
        .rename_session(session_id, &body.title)
        .await
        .map_err(reject)?;
    Ok(Json(session.into()))
}

/// Delete a session together with its transcript.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    responses(
        (status = 204, description = "Session deleted"),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not found")
    ),
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn delete_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(owner): Extension<Uuid>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    app_state
        .chat
        .owned_session(owner, session_id)
        .await
        .map_err(reject)?;
    app_state
        .sessions
        .delete_session(session_id)
        .await
        .map_err(reject)?;
    info!(%session_id, %owner, "Session deleted");
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Transcript Handlers
//=========================================================================================

/// Read a session's transcript in chronological order.
#[utoipa::path(
    get,
    path = "/sessions/{id}/messages",
    responses(
        (status = 200, description = "Transcript", body = [MessageResponse]),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not found")
    ),
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn list_messages_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(owner): Extension<Uuid>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<MessageResponse>>, (StatusCode, String)> {
    app_state
        .chat
        .owned_session(owner, session_id)
        .await
        .map_err(reject)?;
    let messages = app_state
        .sessions
        .list_messages(session_id)
        .await
        .map_err(reject)?;
    Ok(Json(messages.into_iter().map(MessageResponse::from).collect()))
}

/// Send a message and run one chat turn.
///
/// A failed completion call still answers 200: the transcript records an error
/// reply and `state` is `failed`.
#[utoipa::path(
    post,
    path = "/sessions/{id}/messages",
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Turn finished", body = TurnResponse),
        (status = 400, description = "Empty message"),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "A turn is already running for this session")
    ),
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn send_message_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(owner): Extension<Uuid>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<TurnResponse>, (StatusCode, String)> {
    // Strangers learn nothing about whether a turn is running.
    app_state
        .chat
        .owned_session(owner, session_id)
        .await
        .map_err(reject)?;
    let _guard = app_state
        .turns
        .try_begin(session_id)
        .ok_or_else(|| reject(ApiError::TurnInFlight(session_id)))?;

    let settings = app_state.settings.load(owner).await;
    let outcome = app_state
        .chat
        .send_message(owner, session_id, &body.content, &settings)
        .await
        .map_err(reject)?;
    Ok(Json(outcome.into()))
}

//=========================================================================================
// Library Handlers
//=========================================================================================

async fn owned_item(
    app_state: &AppState,
    owner: Uuid,
    item_id: Uuid,
) -> Result<LibraryItem, (StatusCode, String)> {
    let item = app_state.library.get_item(item_id).await.map_err(reject)?;
    if item.owner != owner {
        return Err(reject(PortError::Unauthorized));
    }
    Ok(item)
}

/// List the caller's library, oldest first.
#[utoipa::path(
    get,
    path = "/library",
    responses((status = 200, description = "Library items", body = [LibraryItemResponse])),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn list_library_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(owner): Extension<Uuid>,
) -> Result<Json<Vec<LibraryItemResponse>>, (StatusCode, String)> {
    let items = app_state.library.list_items(owner).await.map_err(reject)?;
    Ok(Json(items.into_iter().map(LibraryItemResponse::from).collect()))
}

/// Add a book to the caller's library.
#[utoipa::path(
    post,
    path = "/library",
    request_body = AddLibraryItemRequest,
    responses(
        (status = 201, description = "Item added", body = LibraryItemResponse),
        (status = 400, description = "Blank title")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn add_library_item_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(owner): Extension<Uuid>,
    Json(body): Json<AddLibraryItemRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let item = app_state
        .library
        .add_item(
            owner,
            NewLibraryItem {
                title: body.title,
                author: body.author.unwrap_or_default(),
                cover_ref: body.cover_ref,
            },
        )
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(LibraryItemResponse::from(item))))
}

/// Upload a book PDF, index it, and add it to the caller's library.
///
/// Indexing failures answer 200 with `success: false` and nothing is stored.
#[utoipa::path(
    post,
    path = "/library/upload",
    request_body = UploadBookRequest,
    responses(
        (status = 201, description = "Book indexed and added", body = UploadBookResponse),
        (status = 200, description = "Book could not be indexed", body = UploadBookResponse),
        (status = 400, description = "Not a base64 PDF data URI"),
        (status = 413, description = "PDF exceeds the upload limit")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn upload_book_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(owner): Extension<Uuid>,
    Json(body): Json<UploadBookRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let payload = pdf_payload(&body.book_data_uri).map_err(reject)?;
    let pdf = STANDARD.decode(payload).map_err(|e| {
        reject(PortError::Validation(format!("book data is not valid base64: {}", e)))
    })?;
    let limit = app_state.config.max_upload_bytes;
    if pdf.len() > limit {
        return Err(reject(ApiError::PayloadTooLarge {
            size: pdf.len(),
            limit,
        }));
    }
    info!(%owner, file = %body.file_name, bytes = pdf.len(), "Book upload received");

    let settings = app_state.settings.load(owner).await;
    let outcome = app_state
        .books
        .upload(
            owner,
            BookUpload {
                file_name: body.file_name,
                title: body.title,
                author: body.author,
                book_data_uri: body.book_data_uri,
                model: Some(settings.model),
            },
        )
        .await
        .map_err(reject)?;

    let status = if outcome.success {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(UploadBookResponse::from(outcome))))
}

/// Replace (or clear) a library item's cover reference.
#[utoipa::path(
    patch,
    path = "/library/{id}/cover",
    request_body = UpdateCoverRequest,
    responses(
        (status = 200, description = "Updated item", body = LibraryItemResponse),
        (status = 403, description = "Item belongs to another user"),
        (status = 404, description = "Item not found")
    ),
    params(
        ("id" = Uuid, Path, description = "Library item id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn update_cover_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(owner): Extension<Uuid>,
    Path(item_id): Path<Uuid>,
    Json(body): Json<UpdateCoverRequest>,
) -> Result<Json<LibraryItemResponse>, (StatusCode, String)> {
    owned_item(&app_state, owner, item_id).await?;
    let cover_ref = body.cover_ref.filter(|c| !c.trim().is_empty());
    let item = app_state
        .library
        .update_cover(item_id, cover_ref)
        .await
        .map_err(reject)?;
    Ok(Json(item.into()))
}

/// Remove a book from the caller's library.
#[utoipa::path(
    delete,
    path = "/library/{id}",
    responses(
        (status = 204, description = "Item deleted"),
        (status = 403, description = "Item belongs to another user"),
        (status = 404, description = "Item not found")
    ),
    params(
        ("id" = Uuid, Path, description = "Library item id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn delete_library_item_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(owner): Extension<Uuid>,
    Path(item_id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    owned_item(&app_state, owner, item_id).await?;
    app_state
        .library
        .delete_item(item_id)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Settings Handlers
//=========================================================================================

fn settings_response(app_state: &AppState, settings: ChatSettings) -> SettingsResponse {
    SettingsResponse {
        model: settings.model,
        conversation_mode: settings.conversation_mode.as_str().to_string(),
        available_models: app_state.settings.available_models().to_vec(),
    }
}

/// Read the caller's chat settings.
#[utoipa::path(
    get,
    path = "/settings",
    responses((status = 200, description = "Current settings", body = SettingsResponse)),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn get_settings_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(owner): Extension<Uuid>,
) -> Json<SettingsResponse> {
    let settings = app_state.settings.load(owner).await;
    Json(settings_response(&app_state, settings))
}

/// Change the caller's model and conversation mode.
#[utoipa::path(
    put,
    path = "/settings",
    request_body = UpdateSettingsRequest,
    responses(
        (status = 200, description = "Saved settings", body = SettingsResponse),
        (status = 400, description = "Unknown model or mode")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn update_settings_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(owner): Extension<Uuid>,
    Json(body): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsResponse>, (StatusCode, String)> {
    let conversation_mode = body
        .conversation_mode
        .parse::<ConversationMode>()
        .map_err(|e| reject(PortError::Validation(e)))?;
    let settings = ChatSettings {
        model: body.model,
        conversation_mode,
    };
    app_state
        .settings
        .save(owner, &settings)
        .await
        .map_err(reject)?;
    Ok(Json(settings_response(&app_state, settings)))
}
