//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and how it is assembled from adapters.

use crate::adapters::DbAdapter;
use crate::config::Config;
use crate::error::ApiError;
use sprachwelt_core::memory::{InMemoryConversations, InMemoryReviewCards, InMemoryStats};
use sprachwelt_core::ports::{
    ContentStore, ConversationRepository, LlmService, ReviewCardRepository, StatsRepository,
    TextToSpeechService,
};
use sprachwelt_core::{ConversationStore, GrammarRules, ProgressTracker, ReviewScheduler, ScenarioEngine};
use std::sync::Arc;

//=========================================================================================
// Repositories
//=========================================================================================

/// The persistence ports, backed either by PostgreSQL or by process memory.
#[derive(Clone)]
pub struct Repositories {
    pub conversations: Arc<dyn ConversationRepository>,
    pub cards: Arc<dyn ReviewCardRepository>,
    pub stats: Arc<dyn StatsRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            conversations: Arc::new(InMemoryConversations::default()),
            cards: Arc::new(InMemoryReviewCards::default()),
            stats: Arc::new(InMemoryStats::default()),
        }
    }

    pub fn postgres(db: Arc<DbAdapter>) -> Self {
        Self {
            conversations: db.clone(),
            cards: db.clone(),
            stats: db,
        }
    }
}

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub content: Arc<dyn ContentStore>,
    pub engine: ScenarioEngine,
    pub reviews: Arc<ReviewScheduler>,
    pub progress: Arc<ProgressTracker>,
    pub grammar: Arc<GrammarRules>,
    pub tts: Arc<dyn TextToSpeechService>,
}

impl AppState {
    /// Wires the core components on top of the given adapters.
    pub fn new(
        config: Arc<Config>,
        content: Arc<dyn ContentStore>,
        llm: Arc<dyn LlmService>,
        tts: Arc<dyn TextToSpeechService>,
        repositories: Repositories,
    ) -> Result<Self, ApiError> {
        let grammar = Arc::new(
            GrammarRules::german()
                .map_err(|e| ApiError::Internal(format!("Grammar rules failed to compile: {e}")))?,
        );
        let conversations = Arc::new(ConversationStore::new(repositories.conversations));
        let reviews = Arc::new(ReviewScheduler::new(repositories.cards));
        let progress = Arc::new(ProgressTracker::new(repositories.stats));

        let engine = ScenarioEngine::new(
            content.clone(),
            llm,
            conversations,
            reviews.clone(),
            progress.clone(),
            grammar.clone(),
        )
        .with_llm_timeout(config.llm_timeout);

        Ok(Self {
            config,
            content,
            engine,
            reviews,
            progress,
            grammar,
            tts,
        })
    }
}
