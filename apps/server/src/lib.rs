//! Stemdrop HTTP server
//!
//! Routes:
//! - `GET  /ping` health check
//! - `GET  /api/songs`, `GET /api/separated?model=` library listing
//! - `GET  /api/separated/:model/:song` stems of one separated song
//! - `POST /api/split` run the separation model over a library song
//! - `POST /api/music-from-video` fetch audio from a video link
//! - `POST /api/downloads` package a separated song and issue a one-time link
//! - `GET  /download/:token` deliver a packaged song exactly once

mod api;
mod state;

pub use api::*;
pub use state::AppState;

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the application router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/ping", get(|| async { "pong" }))
        .route("/api/songs", get(handle_list_songs))
        .route("/api/separated", get(handle_list_separated))
        .route("/api/separated/:model/:song", get(handle_list_stems))
        .route("/api/split", post(handle_split))
        .route("/api/music-from-video", post(handle_music_from_video))
        .route("/api/downloads", post(handle_prepare_download))
        .route("/download/:token", get(handle_download))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Stemdrop server listening on http://{}", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
