//! HTTP handlers
//!
//! JSON endpoints for the song library, separation and packaging, plus the
//! one-time `/download/:token` endpoint.

use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use stemdrop_core::{Delivery, Dispatch, StemdropError};
use stemdrop_types::{Device, IssuedDownload, SeparatedSong};

const DOWNLOAD_NOT_FOUND: &str = "Download not found or already used";
const DOWNLOAD_FAILED: &str = "Unable to deliver this download, please contact the operator";

// ============================================================================
// Request/Response types
// ============================================================================

/// Request to separate a song from the library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitRequest {
    pub song: String,
    pub model: Option<String>,
    pub device: Option<String>,
    pub shifts: Option<u32>,
    pub split: Option<bool>,
}

/// Request to pull the audio track of a video into the library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRequest {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoResponse {
    pub path: String,
}

/// Request to package a separated song and issue a download link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareDownloadRequest {
    pub song: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelQuery {
    pub model: Option<String>,
}

/// Body of every JSON error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

// ============================================================================
// Errors
// ============================================================================

/// Maps core errors to status codes and non-leaking messages
pub struct ApiError(StemdropError);

impl From<StemdropError> for ApiError {
    fn from(error: StemdropError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            StemdropError::SourceNotFound(_) | StemdropError::RecordNotFound(_) => {
                (StatusCode::NOT_FOUND, "Requested song was not found".to_string())
            }
            e if e.is_client_error() => (StatusCode::BAD_REQUEST, e.to_string()),
            StemdropError::Fetch(_) => (
                StatusCode::BAD_GATEWAY,
                "Unable to fetch audio from the given URL".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::info!("Request rejected: {}", self.0);
        }

        (
            status,
            Json(ErrorResponse {
                success: false,
                error: message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Library & separation
// ============================================================================

/// GET /api/songs
pub async fn handle_list_songs(State(state): State<AppState>) -> ApiResult<Vec<String>> {
    Ok(Json(state.core.library().list_songs().await?))
}

/// GET /api/separated?model=
pub async fn handle_list_separated(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
) -> ApiResult<Vec<String>> {
    let model = query
        .model
        .unwrap_or_else(|| state.core.settings().default_model.clone());
    Ok(Json(state.core.library().list_separated(&model).await?))
}

/// GET /api/separated/:model/:song
pub async fn handle_list_stems(
    State(state): State<AppState>,
    Path((model, song)): Path<(String, String)>,
) -> ApiResult<Vec<String>> {
    let stems = state.core.library().separated_stems(&model, &song).await?;
    Ok(Json(
        stems
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .collect(),
    ))
}

/// POST /api/split
pub async fn handle_split(
    State(state): State<AppState>,
    Json(req): Json<SplitRequest>,
) -> ApiResult<SeparatedSong> {
    let settings = state.core.settings();
    let mut options = settings.separation.clone();
    options.model = req.model.unwrap_or_else(|| settings.default_model.clone());
    if let Some(device) = req.device {
        options.device = device
            .parse::<Device>()
            .map_err(StemdropError::InvalidInput)?;
    }
    if let Some(shifts) = req.shifts {
        options.shifts = shifts;
    }
    if let Some(split) = req.split {
        options.split = split;
    }

    Ok(Json(state.core.split_song(&req.song, &options).await?))
}

/// POST /api/music-from-video
pub async fn handle_music_from_video(
    State(state): State<AppState>,
    Json(req): Json<VideoRequest>,
) -> ApiResult<VideoResponse> {
    let path = state.core.music_from_video(&req.url).await?;
    Ok(Json(VideoResponse {
        path: path.to_string_lossy().to_string(),
    }))
}

// ============================================================================
// Downloads
// ============================================================================

/// POST /api/downloads
pub async fn handle_prepare_download(
    State(state): State<AppState>,
    Json(req): Json<PrepareDownloadRequest>,
) -> ApiResult<IssuedDownload> {
    let model = req
        .model
        .unwrap_or_else(|| state.core.settings().default_model.clone());
    Ok(Json(state.core.prepare_download(&model, &req.song).await?))
}

/// GET /download/:token
pub async fn handle_download(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Response {
    match state.core.dispatch(&token).await {
        Ok(Dispatch::Ready(delivery)) => attachment(delivery),
        Ok(Dispatch::Absent) => {
            tracing::info!("Download token not found or already used");
            (StatusCode::NOT_FOUND, DOWNLOAD_NOT_FOUND).into_response()
        }
        Err(e) => {
            tracing::error!("Download failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, DOWNLOAD_FAILED).into_response()
        }
    }
}

/// Stream a claimed archive; the archive is removed once the body is dropped
fn attachment(delivery: Delivery) -> Response {
    let Ok(disposition) = HeaderValue::from_str(&content_disposition(&delivery.file_name)) else {
        let path = delivery.retain();
        tracing::error!(archive = %path.display(), "Unrepresentable attachment name");
        return (StatusCode::INTERNAL_SERVER_ERROR, DOWNLOAD_FAILED).into_response();
    };

    tracing::info!(
        archive = %delivery.path().display(),
        bytes = delivery.content_length,
        "Delivering download"
    );

    let length = HeaderValue::from(delivery.content_length);
    let body = Body::from_stream(delivery.into_stream());

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/zip")),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, length),
        ],
        body,
    )
        .into_response()
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 name
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();

    if fallback == file_name {
        format!("attachment; filename=\"{}\"", file_name)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(file_name)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("song1.zip"),
            "attachment; filename=\"song1.zip\""
        );
        assert_eq!(
            content_disposition("canción \"live\".zip"),
            "attachment; filename=\"canci_n _live_.zip\"; filename*=UTF-8''canci%C3%B3n%20%22live%22.zip"
        );
    }
}
