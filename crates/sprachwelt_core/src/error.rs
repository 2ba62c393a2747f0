//! crates/sprachwelt_core/src/error.rs
//!
//! The error taxonomy shared by every core component: client errors, dependency
//! errors and invariant violations. Each variant carries a stable machine code.

use uuid::Uuid;

use crate::ports::PortError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    // --- Client errors ---
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),
    #[error("Unknown conversation state: {0}")]
    UnknownState(Uuid),
    #[error("Unknown review card: {0}")]
    UnknownCard(Uuid),
    #[error("Unknown content: {0}")]
    UnknownContent(String),
    #[error("Conversation {0} is no longer active")]
    StateFrozen(Uuid),
    #[error("Grade {0} is outside 0..=5")]
    InvalidGrade(i64),
    #[error("Invalid utterance: {0}")]
    InvalidUtterance(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("The requested record belongs to another user")]
    Forbidden,

    // --- Dependency errors ---
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),
    #[error("LLM timed out")]
    LlmTimeout,
    #[error("LLM returned an invalid response: {0}")]
    LlmInvalidResponse(String),
    #[error("TTS unavailable: {0}")]
    TtsUnavailable(String),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    // --- Bugs ---
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
}

/// A convenience type alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Stable code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownScenario(_) => "unknown_scenario",
            Self::UnknownState(_) => "unknown_state",
            Self::UnknownCard(_) => "unknown_card",
            Self::UnknownContent(_) => "unknown_content",
            Self::StateFrozen(_) => "state_frozen",
            Self::InvalidGrade(_) => "invalid_grade",
            Self::InvalidUtterance(_) => "invalid_utterance",
            Self::InvalidInput(_) => "invalid_input",
            Self::Forbidden => "forbidden",
            Self::LlmUnavailable(_) => "llm_unavailable",
            Self::LlmTimeout => "llm_timeout",
            Self::LlmInvalidResponse(_) => "llm_invalid_response",
            Self::TtsUnavailable(_) => "tts_unavailable",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::InvariantViolation(_) => "invariant_violation",
        }
    }

    /// True for failures of an external dependency that a retry may fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LlmUnavailable(_)
                | Self::LlmTimeout
                | Self::LlmInvalidResponse(_)
                | Self::TtsUnavailable(_)
                | Self::StoreUnavailable(_)
        )
    }

    /// Maps an LLM gateway failure.
    pub fn from_llm(err: PortError) -> Self {
        match err {
            PortError::Timeout(_) => Self::LlmTimeout,
            PortError::InvalidResponse(msg) => Self::LlmInvalidResponse(msg),
            other => Self::LlmUnavailable(other.to_string()),
        }
    }

    /// Maps a TTS gateway failure.
    pub fn from_tts(err: PortError) -> Self {
        match err {
            PortError::InvalidInput(msg) => Self::InvalidInput(msg),
            other => Self::TtsUnavailable(other.to_string()),
        }
    }

    /// Maps a persistence failure; `NotFound` is turned into `not_found`.
    pub fn from_store(err: PortError, not_found: impl FnOnce() -> Self) -> Self {
        match err {
            PortError::NotFound(_) => not_found(),
            other => Self::StoreUnavailable(other.to_string()),
        }
    }
}
