//! crates/sprachwelt_core/src/domain.rs
//!
//! Defines the core data structures for the application: authored content
//! (scenarios, characters, objectives, vocabulary sets, quizzes, chapters) and the
//! per-user records the components mutate (conversation states, review cards, stats).
//!
//! Authored content is modelled as closed types: an unknown enum tag in a content file
//! is a load error, never coerced into a default.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

//=========================================================================================
// Authored Content
//=========================================================================================

/// Difficulty of a scenario or vocabulary set, either coarse or as a CEFR level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
    #[serde(rename = "A1")]
    A1,
    #[serde(rename = "A2")]
    A2,
    #[serde(rename = "B1")]
    B1,
    #[serde(rename = "B2")]
    B2,
    #[serde(rename = "C1")]
    C1,
    #[serde(rename = "C2")]
    C2,
}

impl Difficulty {
    /// The tag used in content files and query strings.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::B1 => "B1",
            Self::B2 => "B2",
            Self::C1 => "C1",
            Self::C2 => "C2",
        }
    }

    /// Parses a query-string tag. CEFR levels are accepted in either case.
    pub fn parse(tag: &str) -> Option<Self> {
        let difficulty = match tag.trim().to_ascii_lowercase().as_str() {
            "beginner" => Self::Beginner,
            "intermediate" => Self::Intermediate,
            "advanced" => Self::Advanced,
            "a1" => Self::A1,
            "a2" => Self::A2,
            "b1" => Self::B1,
            "b2" => Self::B2,
            "c1" => Self::C1,
            "c2" => Self::C2,
            _ => return None,
        };
        Some(difficulty)
    }
}

/// The emotional state a character is played with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emotion {
    pub label: String,
    /// 1 (barely noticeable) to 10 (overwhelming).
    pub intensity: u8,
}

impl Default for Emotion {
    fn default() -> Self {
        Self {
            label: "neutral".to_string(),
            intensity: 5,
        }
    }
}

/// A character the learner talks to inside a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub name: String,
    pub role: String,
    pub personality: String,
    #[serde(default)]
    pub voice_id: Option<String>,
    /// First message injected into every new transcript.
    pub greeting: String,
    #[serde(default)]
    pub remembers_user: bool,
    /// Named 1-10 axes such as `friendliness` or `patience`.
    #[serde(default)]
    pub personality_traits: BTreeMap<String, u8>,
    #[serde(default)]
    pub emotion: Emotion,
}

/// A task the learner must accomplish, detected through keyword matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    pub description: String,
    pub keywords: Vec<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub hint: String,
    #[serde(default)]
    pub xp_reward: u64,
    #[serde(default = "default_difficulty_level")]
    pub difficulty_level: u8,
}

fn default_required() -> bool {
    true
}

fn default_difficulty_level() -> u8 {
    1
}

/// An authored role-play episode. Immutable at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub difficulty: Difficulty,
    pub category: String,
    pub characters: Vec<Character>,
    pub objectives: Vec<Objective>,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub xp_reward: u64,
    #[serde(default)]
    pub bonus_xp: u64,
    #[serde(default)]
    pub time_limit_minutes: Option<u32>,
}

impl Scenario {
    /// Checks the authoring invariants and lowercases every keyword.
    pub fn normalize(mut self) -> Result<Self, String> {
        if self.characters.is_empty() {
            return Err(format!("scenario '{}' has no characters", self.id));
        }
        let mut seen = std::collections::HashSet::new();
        for objective in &mut self.objectives {
            if !seen.insert(objective.id.clone()) {
                return Err(format!(
                    "scenario '{}' repeats objective id '{}'",
                    self.id, objective.id
                ));
            }
            objective.keywords = objective
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
        }
        Ok(self)
    }

    /// The character that opens every attempt (first in authoring order).
    pub fn lead_character(&self) -> Option<&Character> {
        self.characters.first()
    }

    pub fn character(&self, character_id: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.id == character_id)
    }

    pub fn objective(&self, objective_id: &str) -> Option<&Objective> {
        self.objectives.iter().find(|o| o.id == objective_id)
    }

    /// The score of an attempt that completed every objective.
    pub fn perfect_score(&self) -> i64 {
        POINTS_PER_OBJECTIVE * self.objectives.len() as i64
    }
}

/// Score awarded per completed objective.
pub const POINTS_PER_OBJECTIVE: i64 = 20;

/// A single word or phrase in a vocabulary set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabEntry {
    pub word: String,
    pub translation: String,
    #[serde(default)]
    pub example: Option<String>,
}

/// A themed list of words the vocabulary coach can enrol a learner in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabSet {
    pub id: String,
    pub title: String,
    pub difficulty: Difficulty,
    pub words: Vec<VocabEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub prompt: String,
    pub options: Vec<String>,
    pub answer_index: usize,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub xp_reward: u64,
    pub questions: Vec<QuizQuestion>,
}

/// A place inside a chapter that bundles scenarios, vocabulary and quizzes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scenario_ids: Vec<String>,
    #[serde(default)]
    pub vocab_set_ids: Vec<String>,
    #[serde(default)]
    pub quiz_ids: Vec<String>,
}

/// One step of a learning path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    pub order: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub locations: Vec<Location>,
}

//=========================================================================================
// Conversation State
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Completed,
    Abandoned,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Character,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveProgress {
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The mutable record of one attempt of one user at one scenario.
///
/// Treated as an append-only message log plus a small header (objective progress,
/// score, status). The methods enforcing that live in `conversation.rs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: Uuid,
    pub user_id: Uuid,
    pub scenario_id: String,
    /// Held by reference; the character itself lives in the scenario.
    pub character_id: String,
    pub attempt: u32,
    pub status: ConversationStatus,
    pub messages: Vec<Message>,
    pub objectives_progress: BTreeMap<String, ObjectiveProgress>,
    pub score: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

//=========================================================================================
// Review Cards
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    Vocabulary,
    Grammar,
}

impl CardType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vocabulary => "vocabulary",
            Self::Grammar => "grammar",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "vocabulary" => Some(Self::Vocabulary),
            "grammar" => Some(Self::Grammar),
            _ => None,
        }
    }
}

/// A spaced-repetition item owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCard {
    pub id: Uuid,
    pub user_id: Uuid,
    pub card_type: CardType,
    pub content: String,
    pub easiness_factor: f64,
    pub interval_days: u32,
    pub repetitions: u32,
    pub next_review: DateTime<Utc>,
    pub last_review: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// User Stats
//=========================================================================================

/// Per-user gamification counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: Uuid,
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
    pub updated_at: DateTime<Utc>,
}

/// The named counters on `UserStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    ScenariosCompleted,
    WordsLearned,
    QuizzesCompleted,
    PerfectQuizzes,
    GrammarChecks,
    GrammarErrorsFixed,
}

impl UserStats {
    pub fn counter_mut(&mut self, counter: Counter) -> &mut u32 {
        match counter {
            Counter::ScenariosCompleted => &mut self.scenarios_completed,
            Counter::WordsLearned => &mut self.words_learned,
            Counter::QuizzesCompleted => &mut self.quizzes_completed,
            Counter::PerfectQuizzes => &mut self.perfect_quizzes,
            Counter::GrammarChecks => &mut self.grammar_checks,
            Counter::GrammarErrorsFixed => &mut self.grammar_errors_fixed,
        }
    }

    pub fn counter(&self, counter: Counter) -> u32 {
        match counter {
            Counter::ScenariosCompleted => self.scenarios_completed,
            Counter::WordsLearned => self.words_learned,
            Counter::QuizzesCompleted => self.quizzes_completed,
            Counter::PerfectQuizzes => self.perfect_quizzes,
            Counter::GrammarChecks => self.grammar_checks,
            Counter::GrammarErrorsFixed => self.grammar_errors_fixed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_accepts_coarse_and_cefr_tags() {
        let parsed: Vec<Difficulty> =
            serde_json::from_str(r#"["beginner", "B1", "advanced"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![Difficulty::Beginner, Difficulty::B1, Difficulty::Advanced]
        );
        assert_eq!(Difficulty::parse("c2"), Some(Difficulty::C2));
        assert!(serde_json::from_str::<Difficulty>(r#""expert""#).is_err());
    }

    #[test]
    fn normalize_rejects_duplicate_objectives_and_lowercases_keywords() {
        let character = Character {
            id: "anna".into(),
            name: "Anna".into(),
            role: "Kellnerin".into(),
            personality: "freundlich".into(),
            voice_id: None,
            greeting: "Hallo!".into(),
            remembers_user: false,
            personality_traits: BTreeMap::new(),
            emotion: Emotion::default(),
        };
        let objective = Objective {
            id: "order".into(),
            description: "Bestelle etwas".into(),
            keywords: vec![" Kaffee ".into(), "TEE".into()],
            required: true,
            hint: String::new(),
            xp_reward: 0,
            difficulty_level: 1,
        };
        let scenario = Scenario {
            id: "cafe".into(),
            name: "Café".into(),
            difficulty: Difficulty::Beginner,
            category: "food".into(),
            characters: vec![character],
            objectives: vec![objective.clone()],
            context: String::new(),
            system_prompt: String::new(),
            xp_reward: 100,
            bonus_xp: 50,
            time_limit_minutes: None,
        };

        let normalized = scenario.clone().normalize().unwrap();
        assert_eq!(normalized.objectives[0].keywords, vec!["kaffee", "tee"]);

        let mut duplicated = scenario.clone();
        duplicated.objectives.push(objective);
        assert!(duplicated.normalize().is_err());

        let mut empty = scenario;
        empty.characters.clear();
        assert!(empty.normalize().is_err());
    }
}
