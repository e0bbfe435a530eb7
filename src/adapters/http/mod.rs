pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

use axum::{extract::DefaultBodyLimit, routing::{get, post}, Router};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::adapters::http::state::HttpState;
use crate::adapters::http::ws::ws_handler;

/// Largest accepted request body. Uploads are written to disk as they arrive.
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

pub fn router(state: HttpState) -> Router {
    let media = ServeDir::new(&state.settings.paths.outputs);
    let static_files = ServeDir::new(&state.settings.paths.static_dir);

    Router::new()
        .route("/api/config", get(routes::get_config))
        .route("/api/upload", post(routes::upload))
        .route("/api/detect", post(routes::detect))
        .route("/api/webcam/stop", post(routes::stop_webcam))
        .route("/api/webcam/snapshot", get(routes::webcam_snapshot))
        .route("/ws/stream", get(ws_handler))
        .nest_service("/media", media)
        .fallback_service(static_files)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
