//! services/api/src/web/rest.rs
//!
//! Contains the learning-path and health handlers, and the master definition for
//! the OpenAPI specification.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use sprachwelt_core::domain::Chapter;
use sprachwelt_core::CoreError;
use std::sync::Arc;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi, ToSchema};

use crate::achievements::Achievement;
use crate::error::{ApiError, ErrorBody, ErrorDetail};
use crate::web::middleware::USER_ID_HEADER;
use crate::web::state::AppState;
use crate::web::{practice, reviews, scenarios, speech, stats};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        list_chapters_handler,
        get_chapter_handler,
        scenarios::list_scenarios_handler,
        scenarios::start_scenario_handler,
        scenarios::turn_handler,
        scenarios::turn_stream_handler,
        scenarios::abandon_handler,
        scenarios::complete_handler,
        scenarios::get_state_handler,
        reviews::due_reviews_handler,
        reviews::grade_review_handler,
        reviews::delete_review_handler,
        practice::enroll_vocab_handler,
        practice::submit_quiz_handler,
        practice::grammar_check_handler,
        stats::stats_handler,
        speech::tts_handler,
        speech::tts_health_handler,
    ),
    components(
        schemas(
            HealthResponse, ChapterView, LocationView, ErrorBody, ErrorDetail, Achievement,
            scenarios::ScenarioSummary, scenarios::ObjectiveView, scenarios::StartResponse,
            scenarios::CharacterView, scenarios::TurnRequest, scenarios::TurnResponse,
            scenarios::TurnDelta, scenarios::TurnDone, scenarios::GrammarFeedback,
            scenarios::AbandonResponse, scenarios::StateView, scenarios::MessageView,
            scenarios::ObjectiveProgressView,
            reviews::ReviewCardView, reviews::GradeRequest,
            practice::EnrollResponse, practice::QuizSubmission, practice::QuizResult,
            practice::QuestionResult, practice::GrammarCheckRequest,
            practice::GrammarCheckResponse,
            stats::StatsResponse,
            speech::TtsRequest, speech::TtsHealth,
        )
    ),
    modifiers(&UserIdSecurity),
    tags(
        (name = "Sprachwelt API", description = "Scenario conversations, reviews and progress for German learners.")
    )
)]
pub struct ApiDoc;

/// Documents the `x-user-id` header set by the authenticating proxy.
struct UserIdSecurity;

impl Modify for UserIdSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "user_id",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(USER_ID_HEADER))),
        );
    }
}

//=========================================================================================
// API Response Structs
//=========================================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LocationView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub scenario_ids: Vec<String>,
    pub vocab_set_ids: Vec<String>,
    pub quiz_ids: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChapterView {
    pub id: String,
    pub title: String,
    pub order: u32,
    pub description: String,
    pub locations: Vec<LocationView>,
}

impl From<Chapter> for ChapterView {
    fn from(chapter: Chapter) -> Self {
        Self {
            id: chapter.id,
            title: chapter.title,
            order: chapter.order,
            description: chapter.description,
            locations: chapter
                .locations
                .into_iter()
                .map(|l| LocationView {
                    id: l.id,
                    name: l.name,
                    description: l.description,
                    scenario_ids: l.scenario_ids,
                    vocab_set_ids: l.vocab_set_ids,
                    quiz_ids: l.quiz_ids,
                })
                .collect(),
        }
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "system"
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// The learning path, in order.
#[utoipa::path(
    get,
    path = "/chapters",
    responses((status = 200, description = "Chapters in order", body = [ChapterView])),
    security(("user_id" = [])),
    tag = "content"
)]
pub async fn list_chapters_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ChapterView>>, ApiError> {
    let chapters = state.content.chapters().await?;
    Ok(Json(chapters.into_iter().map(ChapterView::from).collect()))
}

/// One chapter with its locations.
#[utoipa::path(
    get,
    path = "/chapters/{chapter_id}",
    params(("chapter_id" = String, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "The chapter", body = ChapterView),
        (status = 404, description = "Unknown chapter", body = ErrorBody)
    ),
    security(("user_id" = [])),
    tag = "content"
)]
pub async fn get_chapter_handler(
    State(state): State<Arc<AppState>>,
    Path(chapter_id): Path<String>,
) -> Result<Json<ChapterView>, ApiError> {
    let chapter = state
        .content
        .chapter(&chapter_id)
        .await
        .map_err(|e| CoreError::from_store(e, || CoreError::UnknownContent(chapter_id.clone())))?;
    Ok(Json(chapter.into()))
}
