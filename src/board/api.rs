use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use super::broker::ChangeBroker;
use super::coordinator::MutationCoordinator;
use super::guard::{AdminSecret, SessionContext, SessionRegistry};
use super::models::{BoardId, CardDraft, CardId, ListId};
use super::store::BoardStore;
use crate::errors::BoardError;

/// Header carrying the viewer's session id.
pub const SESSION_HEADER: &str = "x-talio-session";
/// Header carrying the admin password for board deletion.
pub const ADMIN_HEADER: &str = "x-talio-admin";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub coordinator: MutationCoordinator,
    pub sessions: SessionRegistry,
    pub default_wait: Duration,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        store: Arc<dyn BoardStore>,
        admin: AdminSecret,
        default_wait: Duration,
        max_wait: Duration,
        session_idle: Duration,
    ) -> Self {
        let broker = Arc::new(ChangeBroker::new(max_wait));
        Self {
            coordinator: MutationCoordinator::new(store, broker, admin),
            sessions: SessionRegistry::new(session_idle),
            default_wait,
        }
    }

    pub fn broker(&self) -> &Arc<ChangeBroker> {
        self.coordinator.broker()
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct NameRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct PasswordRequest {
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct AddCardRequest {
    #[serde(flatten)]
    pub draft: CardDraft,
    pub index: Option<i64>,
}

#[derive(Deserialize)]
pub struct MoveCardRequest {
    pub list_id: ListId,
    pub index: i64,
}

#[derive(Deserialize)]
pub struct CardTagRequest {
    pub name: String,
    pub color: String,
}

#[derive(Deserialize)]
pub struct BoardTagRequest {
    /// New tag name; keeps the current name when absent.
    pub name: Option<String>,
    pub color: String,
}

#[derive(Deserialize)]
pub struct UpdatesQuery {
    pub timeout_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        let msg = err.to_string();
        match err {
            e if e.is_not_found() => ApiError::NotFound(msg),
            e if e.is_auth_failure() => ApiError::Unauthorized(msg),
            BoardError::ReadOnly { .. } => ApiError::Forbidden(msg),
            BoardError::BadRequest(_) => ApiError::BadRequest(msg),
            BoardError::Persistence(inner) => {
                error!(error = %format!("{:#}", inner), "persistence failure");
                ApiError::Internal(msg)
            }
            _ => ApiError::Internal(msg),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/sessions", post(create_session))
        .route("/api/boards", get(list_boards).post(create_board))
        .route("/api/boards/{id}", get(get_board).delete(delete_board))
        .route("/api/boards/{id}/lists", post(add_list))
        .route("/api/boards/{id}/password", put(set_password))
        .route("/api/boards/{id}/verify", post(verify_password))
        .route("/api/boards/{id}/unlock", post(unlock_board))
        .route(
            "/api/boards/{id}/tags/{name}",
            put(update_board_tag).delete(delete_board_tag),
        )
        .route("/api/lists/{id}", patch(rename_list).delete(delete_list))
        .route("/api/lists/{id}/cards", get(read_list).post(add_card))
        .route(
            "/api/lists/{id}/cards/{card_id}",
            patch(update_card).delete(remove_card),
        )
        .route("/api/cards/{id}", get(get_card))
        .route("/api/cards/{id}/move", post(move_card))
        .route("/api/cards/{id}/tags", post(add_card_tag))
        .route("/api/cards/{id}/tags/{name}", axum::routing::delete(remove_card_tag))
        .route("/api/updates", get(wait_for_update))
}

// ── Helpers ───────────────────────────────────────────────────────────

fn session_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
}

/// The caller's session, or an anonymous locked one.
fn session(state: &SharedState, headers: &HeaderMap) -> SessionContext {
    state.sessions.resolve(session_id(headers))
}

/// The caller's registered session. Needed where the outcome is remembered.
fn registered_session(state: &SharedState, headers: &HeaderMap) -> Result<SessionContext, ApiError> {
    let id = session_id(headers).ok_or_else(|| {
        ApiError::BadRequest(format!("Missing or invalid {} header", SESSION_HEADER))
    })?;
    let session = state.sessions.resolve(Some(id));
    if session.id != id {
        return Err(ApiError::BadRequest(format!("Unknown session {}", id)));
    }
    Ok(session)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn create_session(State(state): State<SharedState>) -> impl IntoResponse {
    let session = state.sessions.create();
    (
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id: session.id,
            created_at: session.created_at,
        }),
    )
}

async fn list_boards(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.coordinator.list_boards().await?))
}

async fn create_board(
    State(state): State<SharedState>,
    Json(req): Json<NameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state.coordinator.create_board(&req.name).await?;
    Ok((StatusCode::CREATED, Json(board)))
}

async fn get_board(
    State(state): State<SharedState>,
    Path(id): Path<BoardId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.coordinator.board_view(id).await?))
}

async fn delete_board(
    State(state): State<SharedState>,
    Path(id): Path<BoardId>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let password = headers
        .get(ADMIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    state.coordinator.delete_board(password, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_list(
    State(state): State<SharedState>,
    Path(board_id): Path<BoardId>,
    headers: HeaderMap,
    Json(req): Json<NameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &headers);
    let list = state
        .coordinator
        .add_list(&session, board_id, &req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(list)))
}

async fn set_password(
    State(state): State<SharedState>,
    Path(board_id): Path<BoardId>,
    headers: HeaderMap,
    Json(req): Json<PasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut session = registered_session(&state, &headers)?;
    let summary = state
        .coordinator
        .set_password(&mut session, board_id, &req.password)
        .await?;
    if session.has_unlocked(board_id) {
        state.sessions.grant(session.id, board_id);
    }
    Ok(Json(summary))
}

async fn verify_password(
    State(state): State<SharedState>,
    Path(board_id): Path<BoardId>,
    Json(req): Json<PasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let valid = state
        .coordinator
        .verify_password(board_id, &req.password)
        .await?;
    Ok(Json(serde_json::json!({ "valid": valid })))
}

async fn unlock_board(
    State(state): State<SharedState>,
    Path(board_id): Path<BoardId>,
    headers: HeaderMap,
    Json(req): Json<PasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut session = registered_session(&state, &headers)?;
    state
        .coordinator
        .unlock(&mut session, board_id, &req.password)
        .await?;
    // Recorded on the registry entry itself; concurrent unlocks each add theirs.
    if !state.sessions.grant(session.id, board_id) {
        return Err(ApiError::BadRequest(format!("Unknown session {}", session.id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn update_board_tag(
    State(state): State<SharedState>,
    Path((board_id, name)): Path<(BoardId, String)>,
    headers: HeaderMap,
    Json(req): Json<BoardTagRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &headers);
    let new_name = req.name.unwrap_or_else(|| name.clone());
    let summary = state
        .coordinator
        .update_board_tag(&session, board_id, &name, &new_name, &req.color)
        .await?;
    Ok(Json(summary))
}

async fn delete_board_tag(
    State(state): State<SharedState>,
    Path((board_id, name)): Path<(BoardId, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &headers);
    let summary = state
        .coordinator
        .delete_board_tag(&session, board_id, &name)
        .await?;
    Ok(Json(summary))
}

async fn rename_list(
    State(state): State<SharedState>,
    Path(list_id): Path<ListId>,
    headers: HeaderMap,
    Json(req): Json<NameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &headers);
    let list = state
        .coordinator
        .rename_list(&session, list_id, &req.name)
        .await?;
    Ok(Json(list))
}

async fn delete_list(
    State(state): State<SharedState>,
    Path(list_id): Path<ListId>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &headers);
    state.coordinator.delete_list(&session, list_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn read_list(
    State(state): State<SharedState>,
    Path(list_id): Path<ListId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.coordinator.read_list(list_id).await?))
}

async fn add_card(
    State(state): State<SharedState>,
    Path(list_id): Path<ListId>,
    headers: HeaderMap,
    Json(req): Json<AddCardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &headers);
    let card = state
        .coordinator
        .add_card(&session, list_id, req.draft, req.index)
        .await?;
    Ok((StatusCode::CREATED, Json(card)))
}

async fn update_card(
    State(state): State<SharedState>,
    Path((list_id, card_id)): Path<(ListId, CardId)>,
    headers: HeaderMap,
    Json(draft): Json<CardDraft>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &headers);
    let card = state
        .coordinator
        .update_card(&session, list_id, card_id, draft)
        .await?;
    Ok(Json(card))
}

async fn remove_card(
    State(state): State<SharedState>,
    Path((list_id, card_id)): Path<(ListId, CardId)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &headers);
    let cards = state
        .coordinator
        .remove_card(&session, list_id, card_id)
        .await?;
    Ok(Json(cards))
}

async fn get_card(
    State(state): State<SharedState>,
    Path(card_id): Path<CardId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.coordinator.get_card(card_id).await?))
}

async fn move_card(
    State(state): State<SharedState>,
    Path(card_id): Path<CardId>,
    headers: HeaderMap,
    Json(req): Json<MoveCardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &headers);
    let card = state
        .coordinator
        .move_card(&session, card_id, req.list_id, req.index)
        .await?;
    Ok(Json(card))
}

async fn add_card_tag(
    State(state): State<SharedState>,
    Path(card_id): Path<CardId>,
    headers: HeaderMap,
    Json(req): Json<CardTagRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &headers);
    let card = state
        .coordinator
        .add_card_tag(&session, card_id, &req.name, &req.color)
        .await?;
    Ok(Json(card))
}

async fn remove_card_tag(
    State(state): State<SharedState>,
    Path((card_id, name)): Path<(CardId, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &headers);
    let card = state
        .coordinator
        .remove_card_tag(&session, card_id, &name)
        .await?;
    Ok(Json(card))
}

/// Long poll: 200 with the next change, or 204 when the wait times out.
async fn wait_for_update(
    State(state): State<SharedState>,
    Query(query): Query<UpdatesQuery>,
) -> Response {
    let wait = query
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(state.default_wait);
    match state.broker().subscribe(wait).await {
        Some(change) => Json(change).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
