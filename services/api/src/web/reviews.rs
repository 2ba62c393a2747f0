//! services/api/src/web/reviews.rs
//!
//! REST handlers for the spaced-repetition review cards.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sprachwelt_core::domain::ReviewCard;
use sprachwelt_core::CoreError;
use std::sync::Arc;
use tracing::instrument;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{ApiError, ErrorBody};
use crate::web::state::AppState;

pub const DEFAULT_DUE_LIMIT: usize = 20;
pub const MAX_DUE_LIMIT: usize = 100;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DueQuery {
    /// At most this many cards, 1 to 100. Defaults to 20.
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GradeRequest {
    /// Recall quality from 0 (blackout) to 5 (perfect).
    pub quality: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReviewCardView {
    pub card_id: Uuid,
    /// `vocabulary` or `grammar`.
    pub card_type: String,
    pub content: String,
    pub easiness_factor: f64,
    pub interval_days: u32,
    pub repetitions: u32,
    pub next_review: DateTime<Utc>,
    pub last_review: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<ReviewCard> for ReviewCardView {
    fn from(card: ReviewCard) -> Self {
        Self {
            card_id: card.id,
            card_type: card.card_type.as_str().to_string(),
            content: card.content,
            easiness_factor: card.easiness_factor,
            interval_days: card.interval_days,
            repetitions: card.repetitions,
            next_review: card.next_review,
            last_review: card.last_review,
            created_at: card.created_at,
        }
    }
}

/// List the caller's cards that are due now, soonest first.
#[utoipa::path(
    get,
    path = "/reviews/due",
    params(DueQuery),
    responses(
        (status = 200, description = "Due cards ordered by next review", body = [ReviewCardView]),
        (status = 400, description = "Limit out of range", body = ErrorBody)
    ),
    security(("user_id" = [])),
    tag = "reviews"
)]
pub async fn due_reviews_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Query(query): Query<DueQuery>,
) -> Result<Json<Vec<ReviewCardView>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_DUE_LIMIT);
    if limit == 0 || limit > MAX_DUE_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_DUE_LIMIT}"
        )));
    }
    let cards = state.reviews.due(user_id, Utc::now(), limit).await?;
    Ok(Json(cards.into_iter().map(ReviewCardView::from).collect()))
}

/// Grade one review of a card and reschedule it.
#[utoipa::path(
    post,
    path = "/reviews/{card_id}/grade",
    params(("card_id" = Uuid, Path, description = "Review card id")),
    request_body = GradeRequest,
    responses(
        (status = 200, description = "The rescheduled card", body = ReviewCardView),
        (status = 400, description = "Quality outside 0..5", body = ErrorBody),
        (status = 403, description = "Card belongs to another user", body = ErrorBody),
        (status = 404, description = "Unknown card", body = ErrorBody)
    ),
    security(("user_id" = [])),
    tag = "reviews"
)]
#[instrument(skip(state))]
pub async fn grade_review_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(card_id): Path<Uuid>,
    Json(request): Json<GradeRequest>,
) -> Result<Json<ReviewCardView>, ApiError> {
    let quality =
        u8::try_from(request.quality).map_err(|_| CoreError::InvalidGrade(request.quality))?;
    let card = state.reviews.grade(user_id, card_id, quality).await?;
    Ok(Json(card.into()))
}

/// Delete one of the caller's cards.
#[utoipa::path(
    delete,
    path = "/reviews/{card_id}",
    params(("card_id" = Uuid, Path, description = "Review card id")),
    responses(
        (status = 204, description = "Card deleted"),
        (status = 403, description = "Card belongs to another user", body = ErrorBody),
        (status = 404, description = "Unknown card", body = ErrorBody)
    ),
    security(("user_id" = [])),
    tag = "reviews"
)]
#[instrument(skip(state))]
pub async fn delete_review_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(card_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.reviews.delete_card(user_id, card_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
