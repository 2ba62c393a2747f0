//! crates/sprachwelt_core/src/memory.rs
//!
//! In-process implementations of every persistence port and of the content store.
//! They back the test suites and database-less runs of the service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    Chapter, ConversationState, Difficulty, Quiz, ReviewCard, Scenario, UserStats, VocabSet,
};
use crate::ports::{
    ContentStore, ConversationRepository, PortError, PortResult, ReviewCardRepository,
    StatsRepository,
};

//=========================================================================================
// Conversation states
//=========================================================================================

#[derive(Default)]
pub struct InMemoryConversations {
    states: RwLock<HashMap<Uuid, ConversationState>>,
}

#[async_trait]
impl ConversationRepository for InMemoryConversations {
    async fn insert_state(&self, state: &ConversationState) -> PortResult<()> {
        let mut states = self.states.write().await;
        if states.contains_key(&state.id) {
            return Err(PortError::InvalidInput(format!("state {} already exists", state.id)));
        }
        states.insert(state.id, state.clone());
        Ok(())
    }

    async fn get_state(&self, state_id: Uuid) -> PortResult<ConversationState> {
        self.states
            .read()
            .await
            .get(&state_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("state {state_id}")))
    }

    async fn save_state(&self, state: &ConversationState) -> PortResult<()> {
        let mut states = self.states.write().await;
        match states.get_mut(&state.id) {
            Some(slot) => {
                *slot = state.clone();
                Ok(())
            }
            None => Err(PortError::NotFound(format!("state {}", state.id))),
        }
    }

    async fn count_attempts(&self, user_id: Uuid, scenario_id: &str) -> PortResult<u32> {
        let states = self.states.read().await;
        let count = states
            .values()
            .filter(|s| s.user_id == user_id && s.scenario_id == scenario_id)
            .count();
        Ok(count as u32)
    }
}

//=========================================================================================
// Review cards
//=========================================================================================

/// Cards kept in insertion order, so ties on `next_review` resolve by age.
#[derive(Default)]
pub struct InMemoryReviewCards {
    cards: RwLock<Vec<ReviewCard>>,
}

#[async_trait]
impl ReviewCardRepository for InMemoryReviewCards {
    async fn find_card(&self, user_id: Uuid, content: &str) -> PortResult<Option<ReviewCard>> {
        Ok(self
            .cards
            .read()
            .await
            .iter()
            .find(|c| c.user_id == user_id && c.content == content)
            .cloned())
    }

    async fn get_card(&self, card_id: Uuid) -> PortResult<ReviewCard> {
        self.cards
            .read()
            .await
            .iter()
            .find(|c| c.id == card_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("card {card_id}")))
    }

    async fn insert_card(&self, card: &ReviewCard) -> PortResult<()> {
        let mut cards = self.cards.write().await;
        if cards
            .iter()
            .any(|c| c.user_id == card.user_id && c.content == card.content)
        {
            return Err(PortError::InvalidInput(format!(
                "user {} already has a card for '{}'",
                card.user_id, card.content
            )));
        }
        cards.push(card.clone());
        Ok(())
    }

    async fn save_card(&self, card: &ReviewCard) -> PortResult<()> {
        let mut cards = self.cards.write().await;
        let slot = cards
            .iter_mut()
            .find(|c| c.id == card.id)
            .ok_or_else(|| PortError::NotFound(format!("card {}", card.id)))?;
        *slot = card.clone();
        Ok(())
    }

    async fn delete_card(&self, card_id: Uuid) -> PortResult<()> {
        let mut cards = self.cards.write().await;
        let before = cards.len();
        cards.retain(|c| c.id != card_id);
        if cards.len() == before {
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
        let mut due: Vec<ReviewCard> = self
            .cards
            .read()
            .await
            .iter()
            .filter(|c| c.user_id == user_id && c.next_review <= at)
            .cloned()
            .collect();
        due.sort_by_key(|c| c.next_review);
        due.truncate(limit);
        Ok(due)
    }
}

//=========================================================================================
// Stats
//=========================================================================================

#[derive(Default)]
pub struct InMemoryStats {
    stats: RwLock<HashMap<Uuid, UserStats>>,
}

#[async_trait]
impl StatsRepository for InMemoryStats {
    async fn get_stats(&self, user_id: Uuid) -> PortResult<Option<UserStats>> {
        Ok(self.stats.read().await.get(&user_id).cloned())
    }

    async fn save_stats(&self, stats: &UserStats) -> PortResult<()> {
        self.stats.write().await.insert(stats.user_id, stats.clone());
        Ok(())
    }
}

//=========================================================================================
// Content
//=========================================================================================

/// An immutable content snapshot. Scenarios are validated on insertion.
#[derive(Debug, Default, Clone)]
pub struct InMemoryContent {
    scenarios: BTreeMap<String, Scenario>,
    vocab_sets: BTreeMap<String, VocabSet>,
    quizzes: BTreeMap<String, Quiz>,
    chapters: BTreeMap<String, Chapter>,
}

impl InMemoryContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes and adds a scenario. Duplicate ids are rejected.
    pub fn with_scenario(mut self, scenario: Scenario) -> Result<Self, String> {
        let scenario = scenario.normalize()?;
        if self.scenarios.contains_key(&scenario.id) {
            return Err(format!("duplicate scenario id '{}'", scenario.id));
        }
        self.scenarios.insert(scenario.id.clone(), scenario);
        Ok(self)
    }

    pub fn with_vocab_set(mut self, set: VocabSet) -> Result<Self, String> {
        if self.vocab_sets.contains_key(&set.id) {
            return Err(format!("duplicate vocabulary set id '{}'", set.id));
        }
        self.vocab_sets.insert(set.id.clone(), set);
        Ok(self)
    }

    pub fn with_quiz(mut self, quiz: Quiz) -> Result<Self, String> {
        if quiz
            .questions
            .iter()
            .any(|q| q.answer_index >= q.options.len())
        {
            return Err(format!("quiz '{}' has an answer outside its options", quiz.id));
        }
        if self.quizzes.contains_key(&quiz.id) {
            return Err(format!("duplicate quiz id '{}'", quiz.id));
        }
        self.quizzes.insert(quiz.id.clone(), quiz);
        Ok(self)
    }

    pub fn with_chapter(mut self, chapter: Chapter) -> Result<Self, String> {
        if self.chapters.contains_key(&chapter.id) {
            return Err(format!("duplicate chapter id '{}'", chapter.id));
        }
        self.chapters.insert(chapter.id.clone(), chapter);
        Ok(self)
    }

    pub fn scenario_count(&self) -> usize {
        self.scenarios.len()
    }
}

#[async_trait]
impl ContentStore for InMemoryContent {
    async fn scenario(&self, scenario_id: &str) -> PortResult<Scenario> {
        self.scenarios
            .get(scenario_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("scenario {scenario_id}")))
    }

    async fn scenarios(
        &self,
        category: Option<&str>,
        difficulty: Option<Difficulty>,
    ) -> PortResult<Vec<Scenario>> {
        Ok(self
            .scenarios
            .values()
            .filter(|s| category.map_or(true, |c| s.category == c))
            .filter(|s| difficulty.map_or(true, |d| s.difficulty == d))
            .cloned()
            .collect())
    }

    async fn vocab_set(&self, set_id: &str) -> PortResult<VocabSet> {
        self.vocab_sets
            .get(set_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("vocabulary set {set_id}")))
    }

    async fn quiz(&self, quiz_id: &str) -> PortResult<Quiz> {
        self.quizzes
            .get(quiz_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("quiz {quiz_id}")))
    }

    async fn chapters(&self) -> PortResult<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> = self.chapters.values().cloned().collect();
        chapters.sort_by_key(|c| c.order);
        Ok(chapters)
    }

    async fn chapter(&self, chapter_id: &str) -> PortResult<Chapter> {
        self.chapters
            .get(chapter_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("chapter {chapter_id}")))
    }
}
