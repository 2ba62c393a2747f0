//! crates/sprachwelt_core/src/review.rs
//!
//! SM-2 spaced repetition. `next_schedule` is the pure grading function; the
//! `ReviewScheduler` service owns card persistence, ownership checks and the
//! per-card serialization of grades.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::domain::{CardType, ReviewCard};
use crate::error::{CoreError, CoreResult};
use crate::locks::KeyedLocks;
use crate::ports::ReviewCardRepository;

pub const INITIAL_EASINESS: f64 = 2.5;
pub const MIN_EASINESS: f64 = 1.3;
pub const MAX_EASINESS: f64 = 3.0;
pub const MAX_QUALITY: u8 = 5;
/// Longest gap between two reviews, about a century.
pub const MAX_INTERVAL_DAYS: u32 = 36_500;

/// The part of a card that grading rewrites.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sm2State {
    pub easiness_factor: f64,
    pub interval_days: u32,
    pub repetitions: u32,
}

impl Sm2State {
    pub fn fresh() -> Self {
        Self {
            easiness_factor: INITIAL_EASINESS,
            interval_days: 0,
            repetitions: 0,
        }
    }
}

/// Applies one grade. The interval growth uses the easiness factor from before
/// this grade; the factor is updated afterwards and clamped to `[1.3, 3.0]`.
/// Intervals are capped at `MAX_INTERVAL_DAYS`.
pub fn next_schedule(state: Sm2State, quality: u8) -> CoreResult<Sm2State> {
    if quality > MAX_QUALITY {
        return Err(CoreError::InvalidGrade(i64::from(quality)));
    }

    let (interval_days, repetitions) = if quality < 3 {
        (1, 0)
    } else {
        let interval = match state.repetitions {
            0 => 1,
            1 => 6,
            _ => (f64::from(state.interval_days) * state.easiness_factor)
                .round()
                .min(f64::from(MAX_INTERVAL_DAYS)) as u32,
        };
        (interval, state.repetitions + 1)
    };

    let lapse = f64::from(MAX_QUALITY - quality);
    let easiness_factor = (state.easiness_factor + (0.1 - lapse * (0.08 + lapse * 0.02)))
        .clamp(MIN_EASINESS, MAX_EASINESS);

    Ok(Sm2State {
        easiness_factor,
        interval_days,
        repetitions,
    })
}

impl ReviewCard {
    pub fn new(user_id: Uuid, card_type: CardType, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        let fresh = Sm2State::fresh();
        Self {
            id: Uuid::new_v4(),
            user_id,
            card_type,
            content: content.into(),
            easiness_factor: fresh.easiness_factor,
            interval_days: fresh.interval_days,
            repetitions: fresh.repetitions,
            next_review: now,
            last_review: None,
            created_at: now,
        }
    }

    pub fn sm2(&self) -> Sm2State {
        Sm2State {
            easiness_factor: self.easiness_factor,
            interval_days: self.interval_days,
            repetitions: self.repetitions,
        }
    }

    /// Grades the card as reviewed at `now`.
    pub fn apply_grade(&mut self, quality: u8, now: DateTime<Utc>) -> CoreResult<()> {
        let next = next_schedule(self.sm2(), quality)?;
        let next_review = now
            .checked_add_signed(Duration::days(i64::from(next.interval_days)))
            .ok_or_else(|| {
                CoreError::InvariantViolation(format!(
                    "card {} cannot be scheduled {} days after {now}",
                    self.id, next.interval_days
                ))
            })?;
        self.easiness_factor = next.easiness_factor;
        self.interval_days = next.interval_days;
        self.repetitions = next.repetitions;
        self.next_review = next_review;
        self.last_review = Some(now);
        Ok(())
    }

    /// Returns a description of the first broken scheduling invariant, if any.
    pub fn check_invariants(&self) -> Result<(), String> {
        if !(MIN_EASINESS..=MAX_EASINESS).contains(&self.easiness_factor) {
            return Err(format!(
                "card {} has easiness factor {} outside [{MIN_EASINESS}, {MAX_EASINESS}]",
                self.id, self.easiness_factor
            ));
        }
        if let Some(last) = self.last_review {
            if self.next_review < last {
                return Err(format!("card {} is scheduled before its last review", self.id));
            }
        }
        Ok(())
    }
}

/// Result of `ReviewScheduler::upsert_card`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardUpsert {
    pub card_id: Uuid,
    /// False when the user already had a card with the same content.
    pub created: bool,
}

pub struct ReviewScheduler {
    cards: Arc<dyn ReviewCardRepository>,
    user_locks: KeyedLocks<Uuid>,
    card_locks: KeyedLocks<Uuid>,
}

impl ReviewScheduler {
    pub fn new(cards: Arc<dyn ReviewCardRepository>) -> Self {
        Self {
            cards,
            user_locks: KeyedLocks::new(),
            card_locks: KeyedLocks::new(),
        }
    }

    /// Creates a card for `content` unless the user already has one.
    #[instrument(skip(self, content), fields(content_len = content.len()))]
    pub async fn upsert_card(
        &self,
        user_id: Uuid,
        card_type: CardType,
        content: &str,
    ) -> CoreResult<CardUpsert> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CoreError::InvalidInput("card content is empty".into()));
        }

        let _guard = self.user_locks.acquire(user_id).await;
        let existing = self
            .cards
            .find_card(user_id, content)
            .await
            .map_err(store_error)?;
        if let Some(card) = existing {
            return Ok(CardUpsert { card_id: card.id, created: false });
        }

        let card = ReviewCard::new(user_id, card_type, content, Utc::now());
        self.cards.insert_card(&card).await.map_err(store_error)?;
        Ok(CardUpsert { card_id: card.id, created: true })
    }

    pub async fn grade(&self, user_id: Uuid, card_id: Uuid, quality: u8) -> CoreResult<ReviewCard> {
        self.grade_at(user_id, card_id, quality, Utc::now()).await
    }

    /// Grades a card the user owns, as if reviewed at `now`.
    #[instrument(skip(self))]
    pub async fn grade_at(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        quality: u8,
        now: DateTime<Utc>,
    ) -> CoreResult<ReviewCard> {
        if quality > MAX_QUALITY {
            return Err(CoreError::InvalidGrade(i64::from(quality)));
        }

        let _guard = self.card_locks.acquire(card_id).await;
        let mut card = self.owned_card(user_id, card_id).await?;
        card.apply_grade(quality, now)?;

        if let Err(violation) = card.check_invariants() {
            error!(target: "invariant", %card_id, %violation, "review card invariant violated");
            return Err(CoreError::InvariantViolation(violation));
        }

        self.cards.save_card(&card).await.map_err(store_error)?;
        Ok(card)
    }

    /// Cards due at `at`, soonest first.
    pub async fn due(&self, user_id: Uuid, at: DateTime<Utc>, limit: usize) -> CoreResult<Vec<ReviewCard>> {
        self.cards
            .due_cards(user_id, at, limit)
            .await
            .map_err(store_error)
    }

    #[instrument(skip(self))]
    pub async fn delete_card(&self, user_id: Uuid, card_id: Uuid) -> CoreResult<()> {
        let _guard = self.card_locks.acquire(card_id).await;
        self.owned_card(user_id, card_id).await?;
        self.cards
            .delete_card(card_id)
            .await
            .map_err(|e| CoreError::from_store(e, || CoreError::UnknownCard(card_id)))
    }

    async fn owned_card(&self, user_id: Uuid, card_id: Uuid) -> CoreResult<ReviewCard> {
        let card = self
            .cards
            .get_card(card_id)
            .await
            .map_err(|e| CoreError::from_store(e, || CoreError::UnknownCard(card_id)))?;
        if card.user_id != user_id {
            return Err(CoreError::Forbidden);
        }
        Ok(card)
    }
}

fn store_error(err: crate::ports::PortError) -> CoreError {
    CoreError::StoreUnavailable(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryReviewCards;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn failing_grade_resets_the_card() {
        let next = next_schedule(Sm2State::fresh(), 2).unwrap();
        assert_eq!(next.interval_days, 1);
        assert_eq!(next.repetitions, 0);
        // 2.5 + (0.1 - 3 * (0.08 + 3 * 0.02))
        assert!(approx(next.easiness_factor, 2.18));
    }

    #[test]
    fn passing_grade_three_lowers_easiness_slightly() {
        let next = next_schedule(Sm2State::fresh(), 3).unwrap();
        assert_eq!(next.interval_days, 1);
        assert_eq!(next.repetitions, 1);
        assert!(approx(next.easiness_factor, 2.36));
    }

    #[test]
    fn perfect_grades_follow_the_sm2_sequence() {
        let first = next_schedule(Sm2State::fresh(), 5).unwrap();
        assert_eq!((first.interval_days, first.repetitions), (1, 1));
        assert!(approx(first.easiness_factor, 2.6));

        let second = next_schedule(first, 5).unwrap();
        assert_eq!((second.interval_days, second.repetitions), (6, 2));

        let third = next_schedule(second, 5).unwrap();
        assert_eq!(third.interval_days, 16);
        assert_eq!(third.repetitions, 3);
    }

    #[test]
    fn easiness_stays_within_bounds() {
        let mut state = Sm2State::fresh();
        for _ in 0..20 {
            state = next_schedule(state, 0).unwrap();
        }
        assert!(approx(state.easiness_factor, MIN_EASINESS));

        for _ in 0..20 {
            state = next_schedule(state, 5).unwrap();
        }
        assert!(approx(state.easiness_factor, MAX_EASINESS));
    }

    #[test]
    fn grades_above_five_are_rejected() {
        assert_eq!(
            next_schedule(Sm2State::fresh(), 6),
            Err(CoreError::InvalidGrade(6))
        );
    }

    #[test]
    fn intervals_stop_growing_at_the_cap() {
        let mut state = Sm2State::fresh();
        for _ in 0..40 {
            state = next_schedule(state, 5).unwrap();
        }
        assert_eq!(state.interval_days, MAX_INTERVAL_DAYS);
    }

    #[tokio::test]
    async fn a_card_survives_many_perfect_grades() {
        let scheduler = ReviewScheduler::new(Arc::new(InMemoryReviewCards::default()));
        let user = Uuid::new_v4();
        let card = scheduler.upsert_card(user, CardType::Vocabulary, "brot").await.unwrap();

        let now = Utc::now();
        let mut graded = None;
        for _ in 0..30 {
            graded = Some(scheduler.grade_at(user, card.card_id, 5, now).await.unwrap());
        }
        let graded = graded.unwrap();
        assert_eq!(graded.repetitions, 30);
        assert_eq!(graded.interval_days, MAX_INTERVAL_DAYS);
        assert_eq!(graded.next_review, now + Duration::days(i64::from(MAX_INTERVAL_DAYS)));
    }

    #[test]
    fn grading_moves_next_review_forward() {
        let now = Utc::now();
        let mut card = ReviewCard::new(Uuid::new_v4(), CardType::Vocabulary, "kaffee", now);
        card.apply_grade(5, now).unwrap();
        assert_eq!(card.next_review, now + Duration::days(1));
        assert_eq!(card.last_review, Some(now));
        assert!(card.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_user_and_content() {
        let scheduler = ReviewScheduler::new(Arc::new(InMemoryReviewCards::default()));
        let user = Uuid::new_v4();

        let first = scheduler.upsert_card(user, CardType::Vocabulary, "tee").await.unwrap();
        let again = scheduler.upsert_card(user, CardType::Vocabulary, "tee").await.unwrap();
        assert!(first.created);
        assert!(!again.created);
        assert_eq!(first.card_id, again.card_id);

        let other = scheduler
            .upsert_card(Uuid::new_v4(), CardType::Vocabulary, "tee")
            .await
            .unwrap();
        assert_ne!(other.card_id, first.card_id);
    }

    #[tokio::test]
    async fn grade_checks_ownership_and_existence() {
        let scheduler = ReviewScheduler::new(Arc::new(InMemoryReviewCards::default()));
        let owner = Uuid::new_v4();
        let card = scheduler.upsert_card(owner, CardType::Vocabulary, "danke").await.unwrap();

        let stranger = scheduler.grade(Uuid::new_v4(), card.card_id, 5).await;
        assert_eq!(stranger, Err(CoreError::Forbidden));

        let missing = Uuid::new_v4();
        assert_eq!(
            scheduler.grade(owner, missing, 5).await,
            Err(CoreError::UnknownCard(missing))
        );

        let graded = scheduler.grade(owner, card.card_id, 4).await.unwrap();
        assert_eq!(graded.repetitions, 1);
    }

    #[tokio::test]
    async fn due_cards_are_ordered_and_limited() {
        let repo = Arc::new(InMemoryReviewCards::default());
        let scheduler = ReviewScheduler::new(repo.clone());
        let user = Uuid::new_v4();

        let early = scheduler.upsert_card(user, CardType::Vocabulary, "brot").await.unwrap();
        let late = scheduler.upsert_card(user, CardType::Vocabulary, "wasser").await.unwrap();
        let graded = scheduler.upsert_card(user, CardType::Grammar, "mit der").await.unwrap();
        scheduler.grade(user, graded.card_id, 5).await.unwrap();

        let now = Utc::now();
        let due = scheduler.due(user, now, 10).await.unwrap();
        let ids: Vec<Uuid> = due.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![early.card_id, late.card_id]);

        let limited = scheduler.due(user, now, 1).await.unwrap();
        assert_eq!(limited.len(), 1);

        let later = scheduler.due(user, now + Duration::days(2), 10).await.unwrap();
        assert_eq!(later.len(), 3);
    }

    #[tokio::test]
    async fn delete_removes_only_owned_cards() {
        let scheduler = ReviewScheduler::new(Arc::new(InMemoryReviewCards::default()));
        let owner = Uuid::new_v4();
        let card = scheduler.upsert_card(owner, CardType::Vocabulary, "bitte").await.unwrap();

        assert_eq!(
            scheduler.delete_card(Uuid::new_v4(), card.card_id).await,
            Err(CoreError::Forbidden)
        );
        scheduler.delete_card(owner, card.card_id).await.unwrap();
        assert_eq!(
            scheduler.delete_card(owner, card.card_id).await,
            Err(CoreError::UnknownCard(card.card_id))
        );
    }
}
