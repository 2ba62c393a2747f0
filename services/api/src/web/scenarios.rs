//! services/api/src/web/scenarios.rs
//!
//! REST handlers for the scenario conversation engine: catalogue, start, turns
//! (blocking and server-sent events), abandon, explicit completion and state
//! inspection.

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use sprachwelt_core::domain::{ConversationState, Difficulty, MessageRole, Scenario};
use sprachwelt_core::engine::TurnSummary;
use sprachwelt_core::{CoreError, GrammarCorrection, TurnEvent, TurnOutcome};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{ApiError, ErrorBody};
use crate::web::state::AppState;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CatalogueQuery {
    /// Exact category, e.g. `food`.
    pub category: Option<String>,
    /// `beginner`, `intermediate`, `advanced` or a CEFR level.
    pub difficulty: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ObjectiveView {
    pub id: String,
    pub description: String,
    pub required: bool,
    pub hint: String,
    pub xp_reward: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ScenarioSummary {
    pub id: String,
    pub name: String,
    pub difficulty: String,
    pub category: String,
    pub context: String,
    pub objectives: Vec<ObjectiveView>,
    pub xp_reward: u64,
    pub bonus_xp: u64,
    pub time_limit_minutes: Option<u32>,
}

impl From<Scenario> for ScenarioSummary {
    fn from(scenario: Scenario) -> Self {
        Self {
            difficulty: scenario.difficulty.as_str().to_string(),
            objectives: scenario
                .objectives
                .into_iter()
                .map(|o| ObjectiveView {
                    id: o.id,
                    description: o.description,
                    required: o.required,
                    hint: o.hint,
                    xp_reward: o.xp_reward,
                })
                .collect(),
            id: scenario.id,
            name: scenario.name,
            category: scenario.category,
            context: scenario.context,
            xp_reward: scenario.xp_reward,
            bonus_xp: scenario.bonus_xp,
            time_limit_minutes: scenario.time_limit_minutes,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CharacterView {
    pub name: String,
    pub role: String,
    pub voice_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StartResponse {
    pub state_id: Uuid,
    pub greeting: String,
    pub character: CharacterView,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TurnRequest {
    pub utterance: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GrammarFeedback {
    pub corrected: String,
    pub explanation: String,
}

impl From<GrammarCorrection> for GrammarFeedback {
    fn from(correction: GrammarCorrection) -> Self {
        Self {
            corrected: correction.corrected,
            explanation: correction.explanation,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TurnResponse {
    pub reply: String,
    pub completed_objective_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grammar_feedback: Option<GrammarFeedback>,
    pub scenario_complete: bool,
    pub score: i64,
}

impl From<TurnOutcome> for TurnResponse {
    fn from(outcome: TurnOutcome) -> Self {
        Self {
            reply: outcome.reply,
            completed_objective_ids: outcome.completed_objective_ids,
            grammar_feedback: outcome.grammar_feedback.map(GrammarFeedback::from),
            scenario_complete: outcome.scenario_complete,
            score: outcome.score,
        }
    }
}

/// The `delta` event of the streaming turn.
#[derive(Debug, Serialize, ToSchema)]
pub struct TurnDelta {
    pub delta: String,
}

/// The final `done` event of the streaming turn.
#[derive(Debug, Serialize, ToSchema)]
pub struct TurnDone {
    pub completed_objective_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grammar_feedback: Option<GrammarFeedback>,
    pub scenario_complete: bool,
    pub score: i64,
}

impl From<TurnSummary> for TurnDone {
    fn from(summary: TurnSummary) -> Self {
        Self {
            completed_objective_ids: summary.completed_objective_ids,
            grammar_feedback: summary.grammar_feedback.map(GrammarFeedback::from),
            scenario_complete: summary.scenario_complete,
            score: summary.score,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AbandonResponse {
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageView {
    /// `user`, `character` or `system`.
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ObjectiveProgressView {
    pub objective_id: String,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StateView {
    pub state_id: Uuid,
    pub scenario_id: String,
    pub character_id: String,
    pub attempt: u32,
    pub status: String,
    pub messages: Vec<MessageView>,
    pub objectives: Vec<ObjectiveProgressView>,
    pub score: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<ConversationState> for StateView {
    fn from(state: ConversationState) -> Self {
        Self {
            state_id: state.id,
            scenario_id: state.scenario_id,
            character_id: state.character_id,
            attempt: state.attempt,
            status: state.status.as_str().to_string(),
            messages: state
                .messages
                .into_iter()
                .map(|m| MessageView {
                    role: match m.role {
                        MessageRole::User => "user",
                        MessageRole::Character => "character",
                        MessageRole::System => "system",
                    }
                    .to_string(),
                    content: m.content,
                    timestamp: m.timestamp,
                })
                .collect(),
            objectives: state
                .objectives_progress
                .into_iter()
                .map(|(objective_id, progress)| ObjectiveProgressView {
                    objective_id,
                    completed: progress.completed,
                    completed_at: progress.completed_at,
                })
                .collect(),
            score: state.score,
            created_at: state.created_at,
            updated_at: state.updated_at,
            completed_at: state.completed_at,
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// List scenarios, optionally filtered by category and difficulty.
#[utoipa::path(
    get,
    path = "/scenarios",
    params(CatalogueQuery),
    responses(
        (status = 200, description = "Matching scenarios ordered by id", body = [ScenarioSummary]),
        (status = 400, description = "Unknown difficulty", body = ErrorBody)
    ),
    tag = "scenarios"
)]
pub async fn list_scenarios_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CatalogueQuery>,
) -> Result<Json<Vec<ScenarioSummary>>, ApiError> {
    let difficulty = query
        .difficulty
        .as_deref()
        .map(|tag| {
            Difficulty::parse(tag)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown difficulty '{tag}'")))
        })
        .transpose()?;
    let scenarios = state
        .content
        .scenarios(query.category.as_deref(), difficulty)
        .await?;
    Ok(Json(scenarios.into_iter().map(ScenarioSummary::from).collect()))
}

/// Start a new attempt at a scenario.
#[utoipa::path(
    post,
    path = "/scenarios/{scenario_id}/start",
    params(("scenario_id" = String, Path, description = "Scenario id")),
    responses(
        (status = 200, description = "Attempt created", body = StartResponse),
        (status = 404, description = "Unknown scenario", body = ErrorBody)
    ),
    security(("user_id" = [])),
    tag = "scenarios"
)]
#[instrument(skip(state))]
pub async fn start_scenario_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(scenario_id): Path<String>,
) -> Result<Json<StartResponse>, ApiError> {
    let outcome = state.engine.start(user_id, &scenario_id).await?;
    Ok(Json(StartResponse {
        state_id: outcome.state_id,
        greeting: outcome.greeting,
        character: CharacterView {
            name: outcome.character.name,
            role: outcome.character.role,
            voice_id: outcome.character.voice_id,
        },
    }))
}

/// Play one learner turn and return the character's reply.
#[utoipa::path(
    post,
    path = "/scenarios/state/{state_id}/turn",
    params(("state_id" = Uuid, Path, description = "Conversation state id")),
    request_body = TurnRequest,
    responses(
        (status = 200, description = "Turn committed", body = TurnResponse),
        (status = 400, description = "Empty or overlong utterance", body = ErrorBody),
        (status = 403, description = "State belongs to another user", body = ErrorBody),
        (status = 404, description = "Unknown state", body = ErrorBody),
        (status = 409, description = "State is no longer active", body = ErrorBody),
        (status = 502, description = "LLM unavailable or invalid", body = ErrorBody),
        (status = 504, description = "LLM timed out", body = ErrorBody)
    ),
    security(("user_id" = [])),
    tag = "scenarios"
)]
#[instrument(skip(state, request), fields(utterance_len = request.utterance.len()))]
pub async fn turn_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(state_id): Path<Uuid>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, ApiError> {
    let outcome = state
        .engine
        .turn(user_id, state_id, &request.utterance)
        .await?;
    Ok(Json(outcome.into()))
}

/// Play one learner turn, streaming the reply as server-sent events.
///
/// Emits `delta` events carrying `TurnDelta`, then one `done` event carrying
/// `TurnDone`. Failures before the first event are returned as plain error
/// responses; later failures arrive as an `error` event carrying `ErrorBody`.
#[utoipa::path(
    post,
    path = "/scenarios/state/{state_id}/turn/stream",
    params(("state_id" = Uuid, Path, description = "Conversation state id")),
    request_body = TurnRequest,
    responses(
        (status = 200, description = "Event stream of the reply", content_type = "text/event-stream", body = TurnDone),
        (status = 400, description = "Empty or overlong utterance", body = ErrorBody),
        (status = 409, description = "State is no longer active", body = ErrorBody),
        (status = 502, description = "LLM unavailable or invalid", body = ErrorBody)
    ),
    security(("user_id" = [])),
    tag = "scenarios"
)]
#[instrument(skip(state, request), fields(utterance_len = request.utterance.len()))]
pub async fn turn_stream_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(state_id): Path<Uuid>,
    Json(request): Json<TurnRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let mut events = state
        .engine
        .turn_stream(user_id, state_id, request.utterance);

    let first = match events.next().await {
        Some(Ok(event)) => event,
        Some(Err(e)) => return Err(e.into()),
        None => {
            return Err(ApiError::Core(CoreError::InvariantViolation(
                "turn stream ended without events".into(),
            )))
        }
    };

    let stream = async_stream::stream! {
        yield Ok(sse_event(first));
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => yield Ok(sse_event(event)),
                Err(e) => {
                    yield Ok(error_event(&e));
                    return;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(event: TurnEvent) -> Event {
    let framed = match event {
        TurnEvent::Delta(delta) => Event::default().event("delta").json_data(TurnDelta { delta }),
        TurnEvent::Done(summary) => Event::default().event("done").json_data(TurnDone::from(summary)),
    };
    framed.unwrap_or_else(|e| {
        warn!("Failed to encode turn event: {}", e);
        error_event(&CoreError::InvariantViolation(e.to_string()))
    })
}

fn error_event(err: &CoreError) -> Event {
    let body = ErrorBody::new(err.code(), err.to_string());
    Event::default()
        .event("error")
        .json_data(body)
        .unwrap_or_else(|_| Event::default().event("error").data(err.code()))
}

/// Abandon an active attempt.
#[utoipa::path(
    post,
    path = "/scenarios/state/{state_id}/abandon",
    params(("state_id" = Uuid, Path, description = "Conversation state id")),
    responses(
        (status = 200, description = "Attempt abandoned", body = AbandonResponse),
        (status = 409, description = "State is no longer active", body = ErrorBody)
    ),
    security(("user_id" = [])),
    tag = "scenarios"
)]
#[instrument(skip(state))]
pub async fn abandon_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(state_id): Path<Uuid>,
) -> Result<Json<AbandonResponse>, ApiError> {
    let abandoned = state.engine.abandon(user_id, state_id).await?;
    Ok(Json(AbandonResponse {
        status: abandoned.status.as_str().to_string(),
    }))
}

/// Finish an active attempt with its current score. The scenario XP and bonus are
/// only granted once every required objective is done.
#[utoipa::path(
    post,
    path = "/scenarios/state/{state_id}/complete",
    params(("state_id" = Uuid, Path, description = "Conversation state id")),
    responses(
        (status = 200, description = "Attempt completed", body = StateView),
        (status = 409, description = "State is no longer active", body = ErrorBody)
    ),
    security(("user_id" = [])),
    tag = "scenarios"
)]
#[instrument(skip(state))]
pub async fn complete_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(state_id): Path<Uuid>,
) -> Result<Json<StateView>, ApiError> {
    let completed = state.engine.complete(user_id, state_id).await?;
    Ok(Json(completed.into()))
}

/// Inspect the transcript and progress of an attempt.
#[utoipa::path(
    get,
    path = "/scenarios/state/{state_id}",
    params(("state_id" = Uuid, Path, description = "Conversation state id")),
    responses(
        (status = 200, description = "The conversation state", body = StateView),
        (status = 403, description = "State belongs to another user", body = ErrorBody),
        (status = 404, description = "Unknown state", body = ErrorBody)
    ),
    security(("user_id" = [])),
    tag = "scenarios"
)]
pub async fn get_state_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(state_id): Path<Uuid>,
) -> Result<Json<StateView>, ApiError> {
    let conversation = state.engine.load(user_id, state_id).await?;
    Ok(Json(conversation.into()))
}
