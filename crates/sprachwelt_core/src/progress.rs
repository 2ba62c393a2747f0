//! crates/sprachwelt_core/src/progress.rs
//!
//! Per-user XP, level, streak and counters. Every mutation runs under the user's
//! lock and announces the old and new values on a broadcast channel so that
//! achievement logic can live outside the core.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::domain::{Counter, UserStats};
use crate::error::{CoreError, CoreResult};
use crate::locks::KeyedLocks;
use crate::ports::StatsRepository;

const EVENT_CAPACITY: usize = 256;

/// Total XP required to reach `level`.
pub fn xp_for_level(level: u32) -> u64 {
    if level < 2 {
        return 0;
    }
    (100.0 * f64::from(level - 1).powf(1.5)).floor() as u64
}

/// The highest level whose threshold `total_xp` has reached.
pub fn level_for_xp(total_xp: u64) -> u32 {
    let mut level = 1;
    while xp_for_level(level + 1) <= total_xp {
        level += 1;
    }
    level
}

impl UserStats {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            total_xp: 0,
            level: 1,
            xp_to_next_level: xp_for_level(2),
            current_streak: 0,
            longest_streak: 0,
            last_activity_date: None,
            scenarios_completed: 0,
            words_learned: 0,
            quizzes_completed: 0,
            perfect_quizzes: 0,
            grammar_checks: 0,
            grammar_errors_fixed: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn add_xp(&mut self, amount: u64) {
        self.total_xp = self.total_xp.saturating_add(amount);
        self.recompute_level();
    }

    pub fn recompute_level(&mut self) {
        self.level = level_for_xp(self.total_xp);
        self.xp_to_next_level = xp_for_level(self.level + 1) - self.total_xp;
    }

    /// Applies the daily streak rule for an activity on `date`.
    pub fn record_activity(&mut self, date: NaiveDate) {
        match self.last_activity_date {
            Some(last) if last == date => return,
            Some(last) if last.succ_opt() == Some(date) => self.current_streak += 1,
            _ => self.current_streak = 1,
        }
        self.longest_streak = self.longest_streak.max(self.current_streak);
        self.last_activity_date = Some(date);
    }

    fn level_is_consistent(&self) -> bool {
        self.level == level_for_xp(self.total_xp)
            && self.xp_to_next_level == xp_for_level(self.level + 1) - self.total_xp
    }
}

/// Emitted after every stats mutation attempt.
#[derive(Debug, Clone)]
pub enum StatsEvent {
    Changed {
        old: Box<UserStats>,
        new: Box<UserStats>,
    },
    Failed {
        user_id: Uuid,
        operation: &'static str,
        error: CoreError,
    },
}

pub struct ProgressTracker {
    stats: Arc<dyn StatsRepository>,
    locks: KeyedLocks<Uuid>,
    events: broadcast::Sender<StatsEvent>,
}

impl ProgressTracker {
    pub fn new(stats: Arc<dyn StatsRepository>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            stats,
            locks: KeyedLocks::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatsEvent> {
        self.events.subscribe()
    }

    /// The user's stats; a user without a record gets zeroed stats.
    pub async fn stats(&self, user_id: Uuid) -> CoreResult<UserStats> {
        self.load(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn award_xp(&self, user_id: Uuid, amount: u64) -> CoreResult<UserStats> {
        self.update(user_id, "award_xp", |stats| stats.add_xp(amount)).await
    }

    #[instrument(skip(self))]
    pub async fn record_activity(&self, user_id: Uuid, date: NaiveDate) -> CoreResult<UserStats> {
        self.update(user_id, "record_activity", |stats| stats.record_activity(date))
            .await
    }

    #[instrument(skip(self))]
    pub async fn increment_counter(
        &self,
        user_id: Uuid,
        counter: Counter,
        n: u32,
    ) -> CoreResult<UserStats> {
        self.update(user_id, "increment_counter", |stats| {
            let value = stats.counter_mut(counter);
            *value = value.saturating_add(n);
        })
        .await
    }

    async fn update(
        &self,
        user_id: Uuid,
        operation: &'static str,
        mutate: impl FnOnce(&mut UserStats),
    ) -> CoreResult<UserStats> {
        let _guard = self.locks.acquire(user_id).await;
        let result = self.update_locked(user_id, mutate).await;

        match &result {
            Ok((old, new)) if old != new => {
                let _ = self.events.send(StatsEvent::Changed {
                    old: Box::new(old.clone()),
                    new: Box::new(new.clone()),
                });
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%user_id, operation, error = %err, "stats update failed");
                let _ = self.events.send(StatsEvent::Failed {
                    user_id,
                    operation,
                    error: err.clone(),
                });
            }
        }
        result.map(|(_, new)| new)
    }

    async fn update_locked(
        &self,
        user_id: Uuid,
        mutate: impl FnOnce(&mut UserStats),
    ) -> CoreResult<(UserStats, UserStats)> {
        let old = self.load(user_id).await?;
        let mut new = old.clone();
        mutate(&mut new);
        new.recompute_level();
        if new == old {
            return Ok((old, new));
        }
        new.updated_at = Utc::now();
        self.stats
            .save_stats(&new)
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        Ok((old, new))
    }

    async fn load(&self, user_id: Uuid) -> CoreResult<UserStats> {
        let stored = self
            .stats
            .get_stats(user_id)
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        let Some(stats) = stored else {
            return Ok(UserStats::new(user_id));
        };
        if !stats.level_is_consistent() {
            let violation = format!(
                "user {user_id} has level {} for {} XP",
                stats.level, stats.total_xp
            );
            error!(target: "invariant", %user_id, %violation, "level formula mismatch");
            return Err(CoreError::InvariantViolation(violation));
        }
        Ok(stats)
    }
}
