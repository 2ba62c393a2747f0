pub mod conversation;
pub mod domain;
pub mod engine;
pub mod error;
pub mod grammar;
pub mod locks;
pub mod memory;
pub mod ports;
pub mod progress;
pub mod review;

pub use conversation::ConversationStore;
pub use domain::{
    CardType, Chapter, Character, ConversationState, ConversationStatus, Counter, Difficulty,
    Message, MessageRole, Objective, Quiz, ReviewCard, Scenario, UserStats, VocabSet,
};
pub use engine::{ScenarioEngine, StartOutcome, TurnEvent, TurnOutcome};
pub use error::{CoreError, CoreResult};
pub use grammar::{GrammarCorrection, GrammarRules};
pub use ports::{
    ChatMessage, ChatOptions, ContentStore, ConversationRepository, LlmService, PortError,
    PortResult, ReviewCardRepository, StatsRepository, TextToSpeechService,
};
pub use progress::{ProgressTracker, StatsEvent};
pub use review::ReviewScheduler;
