//! services/api/src/web/speech.rs
//!
//! Text-to-speech for character lines.

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use sprachwelt_core::CoreError;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

use crate::error::{ApiError, ErrorBody};
use crate::web::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct TtsRequest {
    pub text: String,
    /// Falls back to the configured default voice.
    pub voice_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TtsHealth {
    pub available: bool,
}

/// Synthesize German speech as a mono 16-bit WAV file.
#[utoipa::path(
    post,
    path = "/tts",
    request_body = TtsRequest,
    responses(
        (status = 200, description = "WAV audio", content_type = "audio/wav"),
        (status = 400, description = "Empty text or invalid voice", body = ErrorBody),
        (status = 502, description = "Synthesizer unavailable", body = ErrorBody)
    ),
    security(("user_id" = [])),
    tag = "speech"
)]
#[instrument(skip(state, request), fields(text_len = request.text.len()))]
pub async fn tts_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TtsRequest>,
) -> Result<Response, ApiError> {
    let audio = state
        .tts
        .synthesize(&request.text, request.voice_id.as_deref())
        .await
        .map_err(CoreError::from_tts)?;
    Ok(([(header::CONTENT_TYPE, "audio/wav")], audio).into_response())
}

/// Whether the synthesizer answered its last health probe.
#[utoipa::path(
    get,
    path = "/tts/health",
    responses((status = 200, description = "Cached probe result", body = TtsHealth)),
    tag = "speech"
)]
pub async fn tts_health_handler(State(state): State<Arc<AppState>>) -> Json<TtsHealth> {
    Json(TtsHealth {
        available: state.tts.is_available().await,
    })
}
