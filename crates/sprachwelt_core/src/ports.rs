//! crates/sprachwelt_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases, the LLM
//! backend or the speech synthesizer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{
    Chapter, ConversationState, Difficulty, Quiz, ReviewCard, Scenario, UserStats,
    VocabSet,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (database, network).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Malformed response: {0}")]
    InvalidResponse(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// LLM Gateway
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Decoding parameters. These are the only knobs the gateway exposes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
    pub max_output_tokens: u32,
    pub stop: BTreeSet<String>,
    pub context_window: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            max_output_tokens: 256,
            stop: BTreeSet::new(),
            context_window: 2048,
        }
    }
}

/// A finite, non-restartable sequence of text deltas.
/// Dropping it aborts the underlying request.
pub type TextStream = Pin<Box<dyn Stream<Item = PortResult<String>> + Send>>;

#[async_trait]
pub trait LlmService: Send + Sync {
    /// Streams the reply as text deltas whose concatenation is the full reply.
    async fn chat_stream(&self, messages: &[ChatMessage], options: &ChatOptions)
        -> PortResult<TextStream>;

    /// Returns the full reply. Defaults to draining `chat_stream`.
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> PortResult<String> {
        let mut stream = self.chat_stream(messages, options).await?;
        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            text.push_str(&delta?);
        }
        Ok(text)
    }
}

//=========================================================================================
// TTS Gateway
//=========================================================================================

#[async_trait]
pub trait TextToSpeechService: Send + Sync {
    /// Synthesizes `text` as a mono 16-bit PCM WAV file.
    /// `None` selects the configured default voice.
    async fn synthesize(&self, text: &str, voice_id: Option<&str>) -> PortResult<Vec<u8>>;

    /// Cached health probe of the synthesizer.
    async fn is_available(&self) -> bool;
}

//=========================================================================================
// Content Store (read-only)
//=========================================================================================

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn scenario(&self, scenario_id: &str) -> PortResult<Scenario>;

    /// Scenarios filtered by category and/or difficulty, ordered by id.
    async fn scenarios(
        &self,
        category: Option<&str>,
        difficulty: Option<Difficulty>,
    ) -> PortResult<Vec<Scenario>>;

    async fn vocab_set(&self, set_id: &str) -> PortResult<VocabSet>;

    async fn quiz(&self, quiz_id: &str) -> PortResult<Quiz>;

    /// Chapters in learning-path order.
    async fn chapters(&self) -> PortResult<Vec<Chapter>>;

    async fn chapter(&self, chapter_id: &str) -> PortResult<Chapter>;
}

//=========================================================================================
// Persistence Ports
//=========================================================================================

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn insert_state(&self, state: &ConversationState) -> PortResult<()>;

    async fn get_state(&self, state_id: Uuid) -> PortResult<ConversationState>;

    /// Replaces the whole document in one write.
    async fn save_state(&self, state: &ConversationState) -> PortResult<()>;

    /// Number of attempts the user already made at the scenario.
    async fn count_attempts(&self, user_id: Uuid, scenario_id: &str) -> PortResult<u32>;
}

#[async_trait]
pub trait ReviewCardRepository: Send + Sync {
    /// Cards are unique per `(user_id, content)`.
    async fn find_card(&self, user_id: Uuid, content: &str) -> PortResult<Option<ReviewCard>>;

    async fn get_card(&self, card_id: Uuid) -> PortResult<ReviewCard>;

    async fn insert_card(&self, card: &ReviewCard) -> PortResult<()>;

    async fn save_card(&self, card: &ReviewCard) -> PortResult<()>;

    async fn delete_card(&self, card_id: Uuid) -> PortResult<()>;

    /// Cards with `next_review <= at`, ordered by `next_review` ascending.
    async fn due_cards(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
        limit: usize,
    ) -> PortResult<Vec<ReviewCard>>;
}

#[async_trait]
pub trait StatsRepository: Send + Sync {
    /// Returns `None` for a user without a stats record yet.
    async fn get_stats(&self, user_id: Uuid) -> PortResult<Option<UserStats>>;

    async fn save_stats(&self, stats: &UserStats) -> PortResult<()>;
}
