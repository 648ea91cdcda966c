use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState};
use super::db::{BoardDb, DbHandle};
use super::ws;
use crate::board_config::BoardConfig;

/// Capacity of the change-feed channel shared by all WebSocket clients.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the board server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            db_path: PathBuf::from(".sprintboard/board.db"),
            dev_mode: false,
        }
    }
}

impl From<&BoardConfig> for ServerConfig {
    fn from(config: &BoardConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.server.db_path.clone(),
            dev_mode: config.server.dev_mode,
        }
    }
}

/// Build the full application router: REST endpoints, the `/ws` change feed
/// and request tracing. CORS is opened up only in dev mode.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let ws_tx = state.ws_tx.clone();

    let app = api::api_router()
        .route(
            "/ws",
            get(move |ws_upgrade| ws::ws_handler_with_sender(ws_upgrade, ws_tx)),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Open (and migrate) the board database, creating its directory if needed.
pub fn open_database(db_path: &std::path::Path) -> Result<BoardDb> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    BoardDb::new(db_path).context("Failed to initialize board database")
}

/// Start the board server and run until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let db = open_database(&config.db_path)?;
    let (ws_tx, _rx) = broadcast::channel::<String>(WS_CHANNEL_CAPACITY);
    let state = Arc::new(AppState::from_db(DbHandle::new(db), ws_tx));

    let app = build_router(state, config.dev_mode);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        address = %local_addr,
        db = %config.db_path.display(),
        dev_mode = config.dev_mode,
        "sprintboard listening"
    );
    println!("Sprintboard running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router(dev_mode: bool) -> Router {
        let db = BoardDb::new_in_memory().unwrap();
        let (ws_tx, _) = broadcast::channel(16);
        let state = Arc::new(AppState::from_db(DbHandle::new(db), ws_tx));
        build_router(state, dev_mode)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = test_router(false);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = test_router(false);
        let req = Request::builder()
            .uri("/some/client/route")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let app = test_router(false);
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn test_dev_mode_adds_cors_headers() {
        let app = test_router(true);
        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://localhost:3000")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(
            resp.headers()
                .contains_key("access-control-allow-origin")
        );
    }

    #[tokio::test]
    async fn test_create_project_via_full_router() {
        let app = test_router(false);
        let req = Request::builder()
            .method("POST")
            .uri("/project/createProject")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"name": "server-test", "description": "d"}).to_string(),
            ))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let project: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(project["name"], "server-test");
        assert_eq!(project["sprints"], serde_json::json!([]));
    }

    #[test]
    fn test_open_database_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/board.db");
        open_database(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.db_path, PathBuf::from(".sprintboard/board.db"));
        assert!(!config.dev_mode);
    }
}
