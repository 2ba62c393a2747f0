//! services/api/src/web/stats.rs
//!
//! The caller's progress: XP, level, streaks, counters and derived achievements.

use axum::{extract::State, Extension, Json};
use chrono::NaiveDate;
use serde::Serialize;
use sprachwelt_core::domain::UserStats;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::achievements::{self, Achievement};
use crate::error::{ApiError, ErrorBody};
use crate::web::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub total_xp: u64,
    pub level: u32,
    pub xp_to_next_level: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_activity_date: Option<NaiveDate>,
    pub scenarios_completed: u32,
    pub words_learned: u32,
    pub quizzes_completed: u32,
    pub perfect_quizzes: u32,
    pub grammar_checks: u32,
    pub grammar_errors_fixed: u32,
    pub achievements: Vec<Achievement>,
}

impl From<UserStats> for StatsResponse {
    fn from(stats: UserStats) -> Self {
        Self {
            achievements: achievements::unlocked(&stats),
            total_xp: stats.total_xp,
            level: stats.level,
            xp_to_next_level: stats.xp_to_next_level,
            current_streak: stats.current_streak,
            longest_streak: stats.longest_streak,
            last_activity_date: stats.last_activity_date,
            scenarios_completed: stats.scenarios_completed,
            words_learned: stats.words_learned,
            quizzes_completed: stats.quizzes_completed,
            perfect_quizzes: stats.perfect_quizzes,
            grammar_checks: stats.grammar_checks,
            grammar_errors_fixed: stats.grammar_errors_fixed,
        }
    }
}

/// The caller's stats and unlocked achievements.
#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, description = "Current stats", body = StatsResponse),
        (status = 503, description = "Store unavailable", body = ErrorBody)
    ),
    security(("user_id" = [])),
    tag = "progress"
)]
pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.progress.stats(user_id).await?;
    Ok(Json(stats.into()))
}
