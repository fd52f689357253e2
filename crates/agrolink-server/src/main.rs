//! # agrolink-server
//!
//! Chat backend for the Agrolink platform.
//!
//! This binary provides:
//! - **Durable message log** (SQLite via `agrolink-store`) with delivery
//!   status and derived unread counts
//! - **Presence registry**: in-memory map of who currently holds a live
//!   WebSocket connection, rebuilt empty on every restart
//! - **Delivery router**: persist-then-push with best-effort realtime
//!   notification to connected recipients
//! - **REST API** (axum) for contacts, conversation fetch (which marks
//!   the peer's messages read), one-shot sends and media uploads
//! - **WebSocket gateway** for register/send/typing and presence events

mod api;
mod config;
mod contacts;
mod error;
mod media;
mod presence;
mod router;
mod ws;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use agrolink_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::media::MediaStore;
use crate::presence::PresenceRegistry;
use crate::router::{DeliveryRouter, SharedDb};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,agrolink_server=debug")),
        )
        .init();

    info!("Starting Agrolink chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Durable store (runs migrations on open).
    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db: SharedDb = Arc::new(Mutex::new(Database::open_at(&config.database_path)?));

    // Media store (creates directory if missing).
    let media = Arc::new(MediaStore::new(config.upload_dir.clone(), config.max_upload_size).await?);

    // Presence starts empty: everyone is offline until they re-register
    // over a fresh connection.
    let presence = PresenceRegistry::new();

    let router = DeliveryRouter::new(db.clone(), presence.clone());

    let app_state = AppState {
        db,
        presence,
        router,
        media,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
