use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use agrolink_shared::{MessageView, UserId};
use agrolink_store::{ChatUser, NewMessage};

use crate::config::ServerConfig;
use crate::contacts::{self, ContactEntry};
use crate::error::ServerError;
use crate::media::MediaStore;
use crate::presence::PresenceRegistry;
use crate::router::{resolve_view, DeliveryRouter, SharedDb};

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDb,
    pub presence: PresenceRegistry,
    pub router: DeliveryRouter,
    pub media: Arc<MediaStore>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let body_limit = state.config.max_upload_size;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/messages/contacts", get(get_contacts))
        .route("/api/messages/{user_id}/{peer_id}", get(get_conversation))
        .route("/api/messages", post(post_message))
        .route("/api/users", post(post_user))
        .route("/api/uploads", post(upload_media))
        .route("/uploads/{name}", get(get_upload))
        .route("/ws", get(crate::ws::ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct ContactsQuery {
    user_id: Option<String>,
}

/// Contact list for the requesting user: profile attributes, unread
/// count per contact and the live online flag.
async fn get_contacts(
    State(state): State<AppState>,
    Query(query): Query<ContactsQuery>,
) -> Result<Json<Vec<ContactEntry>>, ServerError> {
    let user_id = query
        .user_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ServerError::Validation("user_id is required".to_string()))?;

    let list = contacts::contacts(&state.db, &state.presence, &UserId(user_id)).await?;
    Ok(Json(list))
}

/// Full conversation between `user_id` and `peer_id`, oldest first.
///
/// Opening a conversation is the read acknowledgment: the peer's `sent`
/// messages towards the requester flip to `read` before the fetch. This
/// coupling is intentional; there is no separate mark-as-read call.
async fn get_conversation(
    State(state): State<AppState>,
    Path((user_id, peer_id)): Path<(String, String)>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let user = UserId(user_id);
    let peer = UserId(peer_id);

    let views = {
        let db = state.db.lock().await;

        let marked = db.mark_read(&peer, &user)?;
        if marked > 0 {
            tracing::debug!(reader = %user, sender = %peer, marked, "marked messages read");
        }

        db.conversation(&user, &peer)?
            .into_iter()
            .map(|message| resolve_view(&db, message))
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(Json(views))
}

/// One-shot send, the request/response fallback to the realtime path.
/// Funnels through the same delivery router as the WebSocket gateway.
async fn post_message(
    State(state): State<AppState>,
    Json(new): Json<NewMessage>,
) -> Result<(StatusCode, Json<MessageView>), ServerError> {
    let view = state.router.send(new).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Deserialize)]
struct UpsertUserRequest {
    id: String,
    name: String,
    role: String,
    avatar: Option<String>,
    email: String,
}

/// Sync a directory entry from the surrounding application.
async fn post_user(
    State(state): State<AppState>,
    Json(req): Json<UpsertUserRequest>,
) -> Result<(StatusCode, Json<ChatUser>), ServerError> {
    if req.id.is_empty() || req.name.is_empty() || req.email.is_empty() {
        return Err(ServerError::Validation(
            "id, name and email are required".to_string(),
        ));
    }

    let user = ChatUser {
        id: UserId(req.id),
        name: req.name,
        role: req.role,
        avatar: req.avatar,
        email: req.email,
        created_at: chrono::Utc::now(),
    };

    state.db.lock().await.upsert_user(&user)?;
    info!(user = %user.id, "directory entry upserted");

    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Serialize)]
struct UploadResponse {
    media_ref: String,
}

/// Multipart media upload; returns the opaque reference to store in an
/// image message.
async fn upload_media(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::Upload(format!("Multipart error: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| ServerError::Upload(format!("Failed to read field: {e}")))?;

            let media_ref = state.media.store(&file_name, &data).await?;

            info!(media_ref = %media_ref, size = data.len(), "Media uploaded");

            return Ok(Json(UploadResponse { media_ref }));
        }
    }

    Err(ServerError::Upload(
        "Missing 'file' field in multipart form".to_string(),
    ))
}

async fn get_upload(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Vec<u8>, ServerError> {
    state.media.open(&name).await
}


pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
