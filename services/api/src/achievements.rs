//! services/api/src/achievements.rs
//!
//! Achievements are derived from `UserStats` on demand and never stored. A background
//! watcher follows the stats-changed signal and logs unlocks as they happen.

use serde::Serialize;
use sprachwelt_core::domain::UserStats;
use sprachwelt_core::{ProgressTracker, StatsEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Achievement {
    FirstScenario,
    ThreeDayStreak,
    SevenDayStreak,
    LevelFive,
    TenGrammarFixes,
    FirstPerfectQuiz,
}

impl Achievement {
    pub const ALL: [Achievement; 6] = [
        Achievement::FirstScenario,
        Achievement::ThreeDayStreak,
        Achievement::SevenDayStreak,
        Achievement::LevelFive,
        Achievement::TenGrammarFixes,
        Achievement::FirstPerfectQuiz,
    ];

    pub fn is_unlocked(self, stats: &UserStats) -> bool {
        match self {
            Achievement::FirstScenario => stats.scenarios_completed >= 1,
            Achievement::ThreeDayStreak => stats.longest_streak >= 3,
            Achievement::SevenDayStreak => stats.longest_streak >= 7,
            Achievement::LevelFive => stats.level >= 5,
            Achievement::TenGrammarFixes => stats.grammar_errors_fixed >= 10,
            Achievement::FirstPerfectQuiz => stats.perfect_quizzes >= 1,
        }
    }
}

pub fn unlocked(stats: &UserStats) -> Vec<Achievement> {
    Achievement::ALL
        .into_iter()
        .filter(|a| a.is_unlocked(stats))
        .collect()
}

/// Achievements present in `new` but not in `old`.
pub fn newly_unlocked(old: &UserStats, new: &UserStats) -> Vec<Achievement> {
    Achievement::ALL
        .into_iter()
        .filter(|a| a.is_unlocked(new) && !a.is_unlocked(old))
        .collect()
}

/// Follows the progress signal until `shutdown` fires.
pub fn spawn_watcher(progress: &ProgressTracker, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut events = progress.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(StatsEvent::Changed { old, new }) => {
                    for achievement in newly_unlocked(&old, &new) {
                        info!(user_id = %new.user_id, ?achievement, "achievement unlocked");
                    }
                }
                Ok(StatsEvent::Failed { user_id, operation, error }) => {
                    warn!(%user_id, operation, code = error.code(), "stats update failed: {}", error);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "achievement watcher fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
