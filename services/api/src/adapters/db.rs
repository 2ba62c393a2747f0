//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the PostgreSQL implementation of the
//! persistence ports from the `core` crate. It handles all interactions with the
//! database using `sqlx` runtime queries.
//!
//! A conversation state is one row whose transcript and objective progress are JSONB
//! documents, so committing a turn is a single `UPDATE`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sprachwelt_core::domain::{
    CardType, ConversationState, ConversationStatus, Message, ObjectiveProgress, ReviewCard,
    UserStats,
};
use sprachwelt_core::ports::{
    ConversationRepository, PortError, PortResult, ReviewCardRepository, StatsRepository,
};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements every persistence port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn db_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound("row not found".to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PortError::Unavailable(e.to_string())
        }
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            PortError::InvalidInput(db.message().to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ConversationStateRecord {
    id: Uuid,
    user_id: Uuid,
    scenario_id: String,
    character_id: String,
    attempt: i32,
    status: String,
    messages: Json<Vec<Message>>,
    objectives_progress: Json<BTreeMap<String, ObjectiveProgress>>,
    score: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}
impl ConversationStateRecord {
    fn to_domain(self) -> PortResult<ConversationState> {
        let status = match self.status.as_str() {
            "active" => ConversationStatus::Active,
            "completed" => ConversationStatus::Completed,
            "abandoned" => ConversationStatus::Abandoned,
            other => {
                return Err(PortError::InvalidResponse(format!(
                    "state {} has unknown status '{}'",
                    self.id, other
                )))
            }
        };
        Ok(ConversationState {
            id: self.id,
            user_id: self.user_id,
            scenario_id: self.scenario_id,
            character_id: self.character_id,
            attempt: self.attempt as u32,
            status,
            messages: self.messages.0,
            objectives_progress: self.objectives_progress.0,
            score: self.score,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(FromRow)]
struct ReviewCardRecord {
    id: Uuid,
    user_id: Uuid,
    card_type: String,
    content: String,
    easiness_factor: f64,
    interval_days: i32,
    repetitions: i32,
    next_review: DateTime<Utc>,
    last_review: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}
impl ReviewCardRecord {
    fn to_domain(self) -> PortResult<ReviewCard> {
        let card_type = CardType::parse(&self.card_type).ok_or_else(|| {
            PortError::InvalidResponse(format!(
                "card {} has unknown type '{}'",
                self.id, self.card_type
            ))
        })?;
        Ok(ReviewCard {
            id: self.id,
            user_id: self.user_id,
            card_type,
            content: self.content,
            easiness_factor: self.easiness_factor,
            interval_days: self.interval_days as u32,
            repetitions: self.repetitions as u32,
            next_review: self.next_review,
            last_review: self.last_review,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct UserStatsRecord {
    user_id: Uuid,
    total_xp: i64,
    level: i32,
    xp_to_next_level: i64,
    current_streak: i32,
    longest_streak: i32,
    last_activity_date: Option<NaiveDate>,
    scenarios_completed: i32,
    words_learned: i32,
    quizzes_completed: i32,
    perfect_quizzes: i32,
    grammar_checks: i32,
    grammar_errors_fixed: i32,
    updated_at: DateTime<Utc>,
}
impl UserStatsRecord {
    fn to_domain(self) -> UserStats {
        UserStats {
            user_id: self.user_id,
            total_xp: self.total_xp as u64,
            level: self.level as u32,
            xp_to_next_level: self.xp_to_next_level as u64,
            current_streak: self.current_streak as u32,
            longest_streak: self.longest_streak as u32,
            last_activity_date: self.last_activity_date,
            scenarios_completed: self.scenarios_completed as u32,
            words_learned: self.words_learned as u32,
            quizzes_completed: self.quizzes_completed as u32,
            perfect_quizzes: self.perfect_quizzes as u32,
            grammar_checks: self.grammar_checks as u32,
            grammar_errors_fixed: self.grammar_errors_fixed as u32,
            updated_at: self.updated_at,
        }
    }
}

const STATE_COLUMNS: &str = "id, user_id, scenario_id, character_id, attempt, status, messages, \
     objectives_progress, score, created_at, updated_at, completed_at";

const CARD_COLUMNS: &str = "id, user_id, card_type, content, easiness_factor, interval_days, \
     repetitions, next_review, last_review, created_at";

//=========================================================================================
// `ConversationRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl ConversationRepository for DbAdapter {
    async fn insert_state(&self, state: &ConversationState) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO conversation_states (id, user_id, scenario_id, character_id, attempt, \
             status, messages, objectives_progress, score, created_at, updated_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(state.id)
        .bind(state.user_id)
        .bind(&state.scenario_id)
        .bind(&state.character_id)
        .bind(state.attempt as i32)
        .bind(state.status.as_str())
        .bind(Json(&state.messages))
        .bind(Json(&state.objectives_progress))
        .bind(state.score)
        .bind(state.created_at)
        .bind(state.updated_at)
        .bind(state.completed_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_state(&self, state_id: Uuid) -> PortResult<ConversationState> {
        let query = format!("SELECT {STATE_COLUMNS} FROM conversation_states WHERE id = $1");
        sqlx::query_as::<_, ConversationStateRecord>(&query)
            .bind(state_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?
            .to_domain()
    }

    async fn save_state(&self, state: &ConversationState) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE conversation_states SET status = $2, messages = $3, objectives_progress = $4, \
             score = $5, updated_at = $6, completed_at = $7 WHERE id = $1",
        )
        .bind(state.id)
        .bind(state.status.as_str())
        .bind(Json(&state.messages))
        .bind(Json(&state.objectives_progress))
        .bind(state.score)
        .bind(state.updated_at)
        .bind(state.completed_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("state {}", state.id)));
        }
        Ok(())
    }

    async fn count_attempts(&self, user_id: Uuid, scenario_id: &str) -> PortResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM conversation_states WHERE user_id = $1 AND scenario_id = $2",
        )
        .bind(user_id)
        .bind(scenario_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(count as u32)
    }
}

//=========================================================================================
// `ReviewCardRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl ReviewCardRepository for DbAdapter {
    async fn find_card(&self, user_id: Uuid, content: &str) -> PortResult<Option<ReviewCard>> {
        let query =
            format!("SELECT {CARD_COLUMNS} FROM review_cards WHERE user_id = $1 AND content = $2");
        sqlx::query_as::<_, ReviewCardRecord>(&query)
            .bind(user_id)
            .bind(content)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(ReviewCardRecord::to_domain)
            .transpose()
    }

    async fn get_card(&self, card_id: Uuid) -> PortResult<ReviewCard> {
        let query = format!("SELECT {CARD_COLUMNS} FROM review_cards WHERE id = $1");
        sqlx::query_as::<_, ReviewCardRecord>(&query)
            .bind(card_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?
            .to_domain()
    }

    async fn insert_card(&self, card: &ReviewCard) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO review_cards (id, user_id, card_type, content, easiness_factor, \
             interval_days, repetitions, next_review, last_review, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(card.id)
        .bind(card.user_id)
        .bind(card.card_type.as_str())
        .bind(&card.content)
        .bind(card.easiness_factor)
        .bind(card.interval_days as i32)
        .bind(card.repetitions as i32)
        .bind(card.next_review)
        .bind(card.last_review)
        .bind(card.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn save_card(&self, card: &ReviewCard) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE review_cards SET easiness_factor = $2, interval_days = $3, repetitions = $4, \
             next_review = $5, last_review = $6 WHERE id = $1",
        )
        .bind(card.id)
        .bind(card.easiness_factor)
        .bind(card.interval_days as i32)
        .bind(card.repetitions as i32)
        .bind(card.next_review)
        .bind(card.last_review)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("card {}", card.id)));
        }
        Ok(())
    }

    async fn delete_card(&self, card_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM review_cards WHERE id = $1")
            .bind(card_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("card {card_id}")));
        }
        Ok(())
    }

    async fn due_cards(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
        limit: usize,
    ) -> PortResult<Vec<ReviewCard>> {
        let query = format!(
            "SELECT {CARD_COLUMNS} FROM review_cards WHERE user_id = $1 AND next_review <= $2 \
             ORDER BY next_review ASC, created_at ASC LIMIT $3"
        );
        sqlx::query_as::<_, ReviewCardRecord>(&query)
            .bind(user_id)
            .bind(at)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(ReviewCardRecord::to_domain)
            .collect()
    }
}

//=========================================================================================
// `StatsRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl StatsRepository for DbAdapter {
    async fn get_stats(&self, user_id: Uuid) -> PortResult<Option<UserStats>> {
        let record = sqlx::query_as::<_, UserStatsRecord>(
            "SELECT user_id, total_xp, level, xp_to_next_level, current_streak, longest_streak, \
             last_activity_date, scenarios_completed, words_learned, quizzes_completed, \
             perfect_quizzes, grammar_checks, grammar_errors_fixed, updated_at \
             FROM user_stats WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(record.map(UserStatsRecord::to_domain))
    }

    async fn save_stats(&self, stats: &UserStats) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO user_stats (user_id, total_xp, level, xp_to_next_level, current_streak, \
             longest_streak, last_activity_date, scenarios_completed, words_learned, \
             quizzes_completed, perfect_quizzes, grammar_checks, grammar_errors_fixed, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (user_id) DO UPDATE SET \
             total_xp = EXCLUDED.total_xp, level = EXCLUDED.level, \
             xp_to_next_level = EXCLUDED.xp_to_next_level, \
             current_streak = EXCLUDED.current_streak, longest_streak = EXCLUDED.longest_streak, \
             last_activity_date = EXCLUDED.last_activity_date, \
             scenarios_completed = EXCLUDED.scenarios_completed, \
             words_learned = EXCLUDED.words_learned, \
             quizzes_completed = EXCLUDED.quizzes_completed, \
             perfect_quizzes = EXCLUDED.perfect_quizzes, \
             grammar_checks = EXCLUDED.grammar_checks, \
             grammar_errors_fixed = EXCLUDED.grammar_errors_fixed, \
             updated_at = EXCLUDED.updated_at",
        )
        .bind(stats.user_id)
        .bind(stats.total_xp as i64)
        .bind(stats.level as i32)
        .bind(stats.xp_to_next_level as i64)
        .bind(stats.current_streak as i32)
        .bind(stats.longest_streak as i32)
        .bind(stats.last_activity_date)
        .bind(stats.scenarios_completed as i32)
        .bind(stats.words_learned as i32)
        .bind(stats.quizzes_completed as i32)
        .bind(stats.perfect_quizzes as i32)
        .bind(stats.grammar_checks as i32)
        .bind(stats.grammar_errors_fixed as i32)
        .bind(stats.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}
