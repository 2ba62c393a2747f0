//! Rule-based objective detection over a learner utterance.

use crate::domain::{ConversationState, Objective, Scenario};

/// Substantive learner messages required before a conversational objective
/// completes without a keyword match.
pub const MIN_SUBSTANTIVE_MESSAGES: usize = 2;

/// Description fragments that mark an objective as "respond / converse".
const CONVERSATIONAL_MARKERS: &[&str] = &["fragen", "antwort", "question"];

/// Core German function words; a single one makes a message substantive.
const FUNCTION_WORDS: &[&str] = &[
    "ich", "du", "er", "sie", "es", "wir", "ihr", "bin", "bist", "ist", "sind", "habe", "hast",
    "hat", "haben", "und", "aber", "oder", "nicht", "kein", "keine", "der", "die", "das", "ein",
    "eine", "mit", "für", "bitte", "danke", "ja", "nein", "gerne", "möchte",
];

/// An objective completed by the current utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectiveMatch {
    pub objective_id: String,
    /// Keywords found in the utterance; empty for a conversational completion.
    pub matched_keywords: Vec<String>,
}

/// True if `keyword` occurs in `text` with no letter or digit directly on either side.
/// Both sides are expected in lowercase.
pub fn contains_word(text: &str, keyword: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    text.match_indices(keyword).any(|(start, found)| {
        let before = text[..start].chars().next_back();
        let after = text[start + found.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

pub fn is_conversational(objective: &Objective) -> bool {
    let description = objective.description.to_lowercase();
    CONVERSATIONAL_MARKERS
        .iter()
        .any(|marker| description.contains(marker))
}

pub fn is_substantive(message: &str) -> bool {
    let lowered = message.to_lowercase();
    let mut tokens = lowered.split_whitespace();
    let first = tokens.next();
    if first.is_some() && tokens.next().is_some() {
        return true;
    }
    FUNCTION_WORDS.iter().any(|word| contains_word(&lowered, word))
}

/// Open objectives completed by `utterance`, in authoring order.
///
/// Keyword matches come first. A conversational objective without a keyword match
/// also completes once every other objective is done (counting this utterance's
/// matches) and the learner has sent enough substantive messages, this one included.
pub fn match_objectives(
    scenario: &Scenario,
    state: &ConversationState,
    utterance: &str,
) -> Vec<ObjectiveMatch> {
    let lowered = utterance.to_lowercase();
    let open = state.open_objectives(scenario);

    let mut matches: Vec<ObjectiveMatch> = open
        .iter()
        .filter_map(|objective| {
            let matched_keywords: Vec<String> = objective
                .keywords
                .iter()
                .filter(|k| contains_word(&lowered, k))
                .cloned()
                .collect();
            (!matched_keywords.is_empty()).then(|| ObjectiveMatch {
                objective_id: objective.id.clone(),
                matched_keywords,
            })
        })
        .collect();

    let substantive = state
        .user_messages()
        .filter(|m| is_substantive(&m.content))
        .count()
        + usize::from(is_substantive(utterance));

    if substantive >= MIN_SUBSTANTIVE_MESSAGES {
        let done = |id: &str| {
            state.is_objective_completed(id) || matches.iter().any(|m| m.objective_id == id)
        };
        let fallback: Vec<String> = open
            .iter()
            .filter(|o| is_conversational(o) && !done(&o.id))
            .filter(|o| {
                scenario
                    .objectives
                    .iter()
                    .filter(|other| other.id != o.id)
                    .all(|other| done(&other.id))
            })
            .map(|o| o.id.clone())
            .collect();
        for objective_id in fallback {
            matches.push(ObjectiveMatch {
                objective_id,
                matched_keywords: Vec::new(),
            });
        }
        let order = |id: &str| scenario.objectives.iter().position(|o| o.id == id);
        matches.sort_by_key(|m| order(&m.objective_id));
    }

    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Character, Difficulty, Emotion, MessageRole};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn objective(id: &str, description: &str, keywords: &[&str]) -> Objective {
        Objective {
            id: id.into(),
            description: description.into(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            required: true,
            hint: String::new(),
            xp_reward: 0,
            difficulty_level: 1,
        }
    }

    fn scenario(objectives: Vec<Objective>) -> Scenario {
        Scenario {
            id: "market".into(),
            name: "Wochenmarkt".into(),
            difficulty: Difficulty::Beginner,
            category: "shopping".into(),
            characters: vec![Character {
                id: "jonas".into(),
                name: "Jonas".into(),
                role: "Händler".into(),
                personality: "gesprächig".into(),
                voice_id: None,
                greeting: "Frische Äpfel!".into(),
                remembers_user: false,
                personality_traits: BTreeMap::new(),
                emotion: Emotion::default(),
            }],
            objectives,
            context: String::new(),
            system_prompt: String::new(),
            xp_reward: 0,
            bonus_xp: 0,
            time_limit_minutes: None,
        }
    }

    #[test]
    fn keywords_match_whole_words_only() {
        assert!(contains_word("ich möchte einen kaffee, bitte.", "kaffee"));
        assert!(!contains_word("ich arbeite in einem kaffeehaus.", "kaffee"));
        assert!(!contains_word("milchkaffee", "kaffee"));
        assert!(contains_word("grüß gott", "grüß"));
        assert!(!contains_word("größe", "größ"));
        assert!(contains_word("zwei äpfel und eine birne", "eine birne"));
    }

    #[test]
    fn compound_word_does_not_complete_objective() {
        let scenario = scenario(vec![objective("drink", "Bestelle ein Getränk", &["kaffee"])]);
        let state = ConversationState::new(Uuid::new_v4(), &scenario, 1, Utc::now()).unwrap();
        assert!(match_objectives(&scenario, &state, "Ich arbeite in einem Kaffeehaus.").is_empty());

        let matches = match_objectives(&scenario, &state, "Einen KAFFEE!");
        assert_eq!(matches[0].objective_id, "drink");
        assert_eq!(matches[0].matched_keywords, vec!["kaffee".to_string()]);
    }

    #[test]
    fn completed_objectives_are_not_matched_again() {
        let scenario = scenario(vec![objective("thank", "Bedanke dich", &["danke"])]);
        let mut state = ConversationState::new(Uuid::new_v4(), &scenario, 1, Utc::now()).unwrap();
        state.mark_objective("thank", Utc::now()).unwrap();
        assert!(match_objectives(&scenario, &state, "Danke!").is_empty());
    }

    #[test]
    fn conversational_objective_needs_other_objectives_and_substantive_messages() {
        let scenario = scenario(vec![
            objective("apples", "Kaufe Äpfel", &["äpfel"]),
            objective("chat", "Beantworte die Fragen des Händlers", &["zufrieden"]),
        ]);
        let now = Utc::now();
        let mut state = ConversationState::new(Uuid::new_v4(), &scenario, 1, now).unwrap();

        // Only one substantive message so far.
        let matches = match_objectives(&scenario, &state, "Zwei Äpfel, bitte.");
        assert_eq!(matches.len(), 1);

        state.append_message(MessageRole::User, "Zwei Äpfel, bitte.", now).unwrap();
        state.append_message(MessageRole::Character, "Gerne.", now).unwrap();
        state.mark_objective("apples", now).unwrap();

        let matches = match_objectives(&scenario, &state, "Ja, sehr gut.");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].objective_id, "chat");
        assert!(matches[0].matched_keywords.is_empty());
    }

    #[test]
    fn conversational_fallback_counts_this_turns_matches() {
        let scenario = scenario(vec![
            objective("apples", "Kaufe Äpfel", &["äpfel"]),
            objective("chat", "Answer the question", &[]),
        ]);
        let now = Utc::now();
        let mut state = ConversationState::new(Uuid::new_v4(), &scenario, 1, now).unwrap();
        state.append_message(MessageRole::User, "Guten Tag, wie geht's?", now).unwrap();
        state.append_message(MessageRole::Character, "Gut!", now).unwrap();

        let ids: Vec<String> = match_objectives(&scenario, &state, "Ich nehme drei Äpfel.")
            .into_iter()
            .map(|m| m.objective_id)
            .collect();
        assert_eq!(ids, vec!["apples".to_string(), "chat".to_string()]);
    }

    #[test]
    fn substantive_messages() {
        assert!(is_substantive("Guten Tag"));
        assert!(is_substantive("Danke!"));
        assert!(!is_substantive("Hm."));
        assert!(!is_substantive(""));
    }
}
