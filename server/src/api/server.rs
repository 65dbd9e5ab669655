//! API server initialization

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::ApiState;
use super::routes::{chats, health};
use crate::core::CoreApp;
use crate::core::constants::DEFAULT_BODY_LIMIT;

pub struct ApiServer {
    app: CoreApp,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        Self { app }
    }

    /// Serve until the shutdown signal fires. Returns CoreApp so the caller
    /// can run the graceful teardown.
    pub async fn start(self) -> Result<CoreApp> {
        let app = self.app;
        let shutdown = app.shutdown.clone();

        let state = ApiState {
            engine: Arc::clone(&app.engine),
            database: Arc::clone(&app.database),
            cache: Arc::clone(&app.cache),
            events: Arc::clone(&app.events),
        };

        let router = Router::new()
            .route("/api/v1/health", get(health::health))
            .route("/api/v1/chats", get(chats::list_chats))
            .route("/api/v1/chats/send", post(chats::send_message))
            .route(
                "/api/v1/chats/{conv_id}",
                patch(chats::update_chat).delete(chats::delete_chat),
            )
            .route("/api/v1/chats/{conv_id}/abort", post(chats::abort))
            .route("/api/v1/chats/{conv_id}/events", get(chats::listen))
            .route("/api/v1/chats/{conv_id}/messages", get(chats::get_messages))
            .route("/api/v1/models", get(chats::list_models))
            .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let addr = SocketAddr::new(app.config.server.host.parse()?, app.config.server.port);
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, "API server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::debug!("API server stopped");
        Ok(app)
    }
}
