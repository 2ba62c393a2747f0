//! Deterministic assembly of the LLM request for a character reply.

use std::collections::BTreeSet;

use crate::domain::{Character, ConversationState, MessageRole, Objective, Scenario};
use crate::ports::{ChatMessage, ChatOptions};

/// Non-system messages from the transcript replayed to the model.
pub const HISTORY_WINDOW: usize = 4;
/// Open objectives named in the system prompt.
pub const MAX_PROMPT_OBJECTIVES: usize = 2;

pub const STOP_SEQUENCES: [&str; 4] = ["\n", "Gast:", "User:", "\n\n"];

pub fn chat_options() -> ChatOptions {
    ChatOptions {
        temperature: 0.7,
        top_p: 0.9,
        top_k: 40,
        repeat_penalty: 1.2,
        max_output_tokens: 25,
        stop: STOP_SEQUENCES.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        context_window: 1024,
    }
}

pub fn system_prompt(scenario: &Scenario, character: &Character, open: &[&Objective]) -> String {
    let mut prompt = format!(
        "Du bist {name}, {role}. Persönlichkeit: {personality}.\n",
        name = character.name,
        role = character.role,
        personality = character.personality,
    );
    if character.emotion.label != "neutral" {
        prompt.push_str(&format!(
            "Deine Stimmung: {} (Stärke {}/10).\n",
            character.emotion.label, character.emotion.intensity
        ));
    }
    prompt.push_str(&format!("Szene: {}.", scenario.name));
    if !scenario.context.trim().is_empty() {
        prompt.push_str(&format!(" {}", scenario.context.trim()));
    }
    prompt.push('\n');
    if !scenario.system_prompt.trim().is_empty() {
        prompt.push_str(scenario.system_prompt.trim());
        prompt.push('\n');
    }

    let goals: Vec<&str> = open
        .iter()
        .take(MAX_PROMPT_OBJECTIVES)
        .map(|o| o.description.as_str())
        .collect();
    if !goals.is_empty() {
        prompt.push_str("Der Gast möchte noch: ");
        prompt.push_str(&goals.join("; "));
        prompt.push_str(".\n");
    }

    prompt.push_str(
        "Regeln: Antworte nur auf Deutsch. Höchstens 10 bis 15 Wörter, genau ein Satz. \
         Bleib immer in deiner Rolle. Der Gast lernt Deutsch; verstehe auch fehlerhafte \
         Sätze und korrigiere sie nicht. Schreibe keine Sprecherbezeichnungen wie \"Gast:\".",
    );
    prompt
}

/// System prompt, the last `HISTORY_WINDOW` non-system messages, then the new utterance.
pub fn build_messages(system: String, state: &ConversationState, utterance: &str) -> Vec<ChatMessage> {
    let history: Vec<ChatMessage> = state
        .messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .rev()
        .take(HISTORY_WINDOW)
        .map(|m| match m.role {
            MessageRole::User => ChatMessage::user(m.content.clone()),
            _ => ChatMessage::assistant(m.content.clone()),
        })
        .collect();

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system));
    messages.extend(history.into_iter().rev());
    messages.push(ChatMessage::user(utterance));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Difficulty, Emotion};
    use crate::ports::ChatRole;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn objective(id: &str, description: &str) -> Objective {
        Objective {
            id: id.into(),
            description: description.into(),
            keywords: vec![],
            required: true,
            hint: String::new(),
            xp_reward: 0,
            difficulty_level: 1,
        }
    }

    fn scenario() -> Scenario {
        Scenario {
            id: "hotel".into(),
            name: "Hotelrezeption".into(),
            difficulty: Difficulty::A2,
            category: "travel".into(),
            characters: vec![Character {
                id: "max".into(),
                name: "Max".into(),
                role: "Rezeptionist".into(),
                personality: "höflich".into(),
                voice_id: None,
                greeting: "Willkommen!".into(),
                remembers_user: false,
                personality_traits: BTreeMap::new(),
                emotion: Emotion::default(),
            }],
            objectives: vec![
                objective("checkin", "Checke ein"),
                objective("breakfast", "Frage nach dem Frühstück"),
                objective("wifi", "Frage nach dem WLAN"),
            ],
            context: "Ein kleines Hotel in Hamburg.".into(),
            system_prompt: String::new(),
            xp_reward: 0,
            bonus_xp: 0,
            time_limit_minutes: None,
        }
    }

    #[test]
    fn prompt_names_at_most_two_open_objectives() {
        let scenario = scenario();
        let open: Vec<&Objective> = scenario.objectives.iter().collect();
        let prompt = system_prompt(&scenario, &scenario.characters[0], &open);
        assert!(prompt.starts_with("Du bist Max, Rezeptionist."));
        assert!(prompt.contains("Hotelrezeption"));
        assert!(prompt.contains("Checke ein; Frage nach dem Frühstück"));
        assert!(!prompt.contains("WLAN"));
        assert!(prompt.contains("nur auf Deutsch"));
    }

    #[test]
    fn transcript_keeps_the_last_four_turns() {
        let scenario = scenario();
        let now = Utc::now();
        let mut state = ConversationState::new(Uuid::new_v4(), &scenario, 1, now).unwrap();
        for i in 0..3 {
            state.append_message(MessageRole::User, format!("u{i}"), now).unwrap();
            state.append_message(MessageRole::System, "note", now).unwrap();
            state.append_message(MessageRole::Character, format!("c{i}"), now).unwrap();
        }

        let messages = build_messages("sys".into(), &state, "neu");
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["sys", "u1", "c1", "u2", "c2", "neu"]);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[1].role, ChatRole::User);
        assert_eq!(messages[2].role, ChatRole::Assistant);
    }

    #[test]
    fn options_use_short_reply_decoding() {
        let options = chat_options();
        assert_eq!(options.max_output_tokens, 25);
        assert_eq!(options.context_window, 1024);
        assert!(options.stop.contains("Gast:"));
        assert!((options.repeat_penalty - 1.2).abs() < f32::EPSILON);
    }
}
