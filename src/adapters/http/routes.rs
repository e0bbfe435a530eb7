use axum::{
    extract::{Multipart, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::adapters::http::state::HttpState;
use crate::application::dto::{
    DetectRequest, DetectResponse, ModeInfo, SavedUpload, StopResponse, UiConfigResponse,
};
use crate::application::services::run_blocking;
use crate::domain::{errors::DomainError, mode::DetectionMode};

pub const TITLE: &str = "Flying Object Detection";

#[derive(Deserialize)]
pub struct UploadQuery {
    mode: DetectionMode,
}

pub async fn get_config(State(st): State<HttpState>) -> Json<UiConfigResponse> {
    Json(UiConfigResponse {
        title: TITLE.to_string(),
        models: st.detection.variants(),
        modes: DetectionMode::ALL.into_iter().map(ModeInfo::from).collect(),
        default_mode: DetectionMode::default(),
        webcam_running: st.webcam.is_running(),
        webcam_error: st.webcam.last_error(),
    })
}

/// Multipart upload; the part named `file` is streamed to disk under SOURCES.
pub async fn upload(
    State(st): State<HttpState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<SavedUpload>, DomainError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| DomainError::Upload(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| DomainError::Upload("file part has no file name".into()))?;

        let mut pending = st.uploads.begin(query.mode, &name).await?;
        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    pending.discard().await;
                    return Err(DomainError::Upload(format!("reading {name} failed: {e}")));
                }
            };
            if let Err(e) = pending.write(&chunk).await {
                pending.discard().await;
                return Err(e);
            }
        }
        return Ok(Json(pending.finish().await?));
    }
    Err(DomainError::Upload("request has no `file` part".into()))
}

pub async fn detect(
    State(st): State<HttpState>,
    Json(req): Json<DetectRequest>,
) -> Result<Json<DetectResponse>, DomainError> {
    tracing::info!("Detect request: {} with {}", req.mode().label(), req.model());
    st.detection.detect(req).await.map(Json)
}

pub async fn stop_webcam(State(st): State<HttpState>) -> Result<Json<StopResponse>, DomainError> {
    let webcam = st.webcam.clone();
    let stopped = run_blocking(move || webcam.stop()).await?;
    Ok(Json(StopResponse { stopped }))
}

pub async fn webcam_snapshot(State(st): State<HttpState>) -> impl IntoResponse {
    match st.webcam.snapshot() {
        Some(jpeg) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        None => DomainError::NotFound("no webcam frame yet".into()).into_response(),
    }
}
