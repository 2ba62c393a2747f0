//! crates/sprachwelt_core/src/grammar.rs
//!
//! A deterministic, ordered pipeline of German grammar rules. Each rule is a
//! whole-word, case-insensitive pattern with a replacement and an explanation.
//! The first rule that matches produces the correction and the pipeline stops.
//! This engine never calls the LLM.

use regex::{Captures, Regex};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    SubjectVerbAgreement,
    CaseGovernment,
    VerbConjugation,
}

/// The outcome of a successful rule match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrammarCorrection {
    pub corrected: String,
    pub explanation: String,
    #[serde(skip)]
    pub category: RuleCategory,
}

struct GrammarRule {
    category: RuleCategory,
    pattern: Regex,
    replacement: &'static str,
    explanation: &'static str,
}

/// Singular nouns whose gender the case rules rely on. A noun outside these lists
/// (or in the plural) leaves the article alone.
const FEMININE_NOUNS: &str = r"(?:\w*(?:ung|heit|keit|schaft|tion|tät|bahn)|frau|mutter|schwester|tochter|familie|freundin|stadt|straße|arbeit|schule)";
const MASCULINE_NOUNS: &str = r"(?:bruder|vater|sohn|freund|mann|onkel|hund|zug|bus|chef|arzt|kaffee|tee)";
const NEUTER_NOUNS: &str = r"(?:kind|auto|fahrrad|handy|haus|hotel|restaurant|café)";

/// (category, pattern, replacement, explanation), in evaluation order.
/// `{FEM}`, `{MASC}` and `{NEUT}` stand for the noun lists above. Patterns are
/// wrapped in `(?i)\b ... \b` at compile time.
const RULES: &[(RuleCategory, &str, &str, &str)] = &[
    // --- Subject-verb agreement ---
    (
        RuleCategory::SubjectVerbAgreement,
        r"das sind (meine|deine|seine|ihre|unsere|eure|eine|die) (\w+(?:ung|heit|keit|schaft|tion))",
        "das ist $1 $2",
        "Changed 'sind' to 'ist': the noun is singular, so 'das' takes the singular verb 'ist'.",
    ),
    (
        RuleCategory::SubjectVerbAgreement,
        r"ich (?:bist|ist|sind)",
        "ich bin",
        "Changed the verb to 'bin': 'sein' with 'ich' is 'ich bin'.",
    ),
    (
        RuleCategory::SubjectVerbAgreement,
        r"du (?:bin|ist|sind)",
        "du bist",
        "Changed the verb to 'bist': 'sein' with 'du' is 'du bist'.",
    ),
    (
        RuleCategory::SubjectVerbAgreement,
        r"er (?:bin|bist|sind)",
        "er ist",
        "Changed the verb to 'ist': a singular third-person subject takes 'ist'.",
    ),
    (
        RuleCategory::SubjectVerbAgreement,
        r"wir (?:bin|bist|ist)",
        "wir sind",
        "Changed the verb to 'sind': 'sein' with 'wir' is 'wir sind'.",
    ),
    (
        RuleCategory::SubjectVerbAgreement,
        r"ihr (?:bin|bist|ist|sind)",
        "ihr seid",
        "Changed the verb to 'seid': 'sein' with 'ihr' is 'ihr seid'.",
    ),
    // --- Case government ---
    (
        RuleCategory::CaseGovernment,
        r"(mit|nach|aus|bei|von|seit|zu) die ({FEM})",
        "$1 der $2",
        "Changed 'die' to 'der': this preposition requires the dative case, and feminine nouns take 'der' in the dative.",
    ),
    (
        RuleCategory::CaseGovernment,
        r"(mit|nach|aus|bei|von|seit|zu) das",
        "$1 dem",
        "Changed 'das' to 'dem': this preposition requires the dative case, and neuter nouns take 'dem' in the dative.",
    ),
    (
        RuleCategory::CaseGovernment,
        r"(mit|nach|aus|bei|von|seit|zu) (mein|dein|sein|unser|ein) ({MASC}|{NEUT})",
        "$1 ${2}em $3",
        "Added the dative ending '-em': this preposition requires the dative case, and masculine and neuter nouns take '-em'.",
    ),
    (
        RuleCategory::CaseGovernment,
        r"(mit|nach|aus|bei|von|seit|zu) (mein|dein|sein|unser|ein) ({FEM})",
        "$1 ${2}er $3",
        "Added the dative ending '-er': this preposition requires the dative case, and feminine nouns take '-er'.",
    ),
    (
        RuleCategory::CaseGovernment,
        r"(für|durch|gegen|ohne|um) (?:dem|der) ({MASC})",
        "$1 den $2",
        "Changed the article to 'den': this preposition requires the accusative case, and masculine nouns take 'den'.",
    ),
    (
        RuleCategory::CaseGovernment,
        r"(für|durch|gegen|ohne|um) (?:dem|der) ({FEM})",
        "$1 die $2",
        "Changed the article to 'die': this preposition requires the accusative case, and feminine nouns take 'die'.",
    ),
    (
        RuleCategory::CaseGovernment,
        r"(für|durch|gegen|ohne|um) dem ({NEUT})",
        "$1 das $2",
        "Changed 'dem' to 'das': this preposition requires the accusative case, and neuter nouns take 'das'.",
    ),
    // --- Verb conjugation ---
    (
        RuleCategory::VerbConjugation,
        r"ich haben",
        "ich habe",
        "Changed 'haben' to 'habe': the first person singular of 'haben' is 'habe'.",
    ),
    (
        RuleCategory::VerbConjugation,
        r"ich möchten",
        "ich möchte",
        "Changed 'möchten' to 'möchte': the first person singular is 'ich möchte'.",
    ),
    (
        RuleCategory::VerbConjugation,
        r"ich (?:können|kannst)",
        "ich kann",
        "Changed the verb to 'kann': the first person singular of 'können' is 'kann'.",
    ),
    (
        RuleCategory::VerbConjugation,
        r"ich (?:wollen|willst)",
        "ich will",
        "Changed the verb to 'will': the first person singular of 'wollen' is 'will'.",
    ),
    (
        RuleCategory::VerbConjugation,
        r"ich (?:müssen|musst)",
        "ich muss",
        "Changed the verb to 'muss': the first person singular of 'müssen' is 'muss'.",
    ),
    (
        RuleCategory::VerbConjugation,
        r"du (?:haben|habe|hat)",
        "du hast",
        "Changed the verb to 'hast': the second person singular of 'haben' is 'hast'.",
    ),
    (
        RuleCategory::VerbConjugation,
        r"er (?:haben|hast)",
        "er hat",
        "Changed the verb to 'hat': the third person singular of 'haben' is 'hat'.",
    ),
    (
        RuleCategory::VerbConjugation,
        r"wir (?:hat|habe|hast)",
        "wir haben",
        "Changed the verb to 'haben': the first person plural of 'haben' is 'haben'.",
    ),
];

/// The compiled rule set. Build once at startup and share.
pub struct GrammarRules {
    rules: Vec<GrammarRule>,
}

impl GrammarRules {
    /// Compiles the built-in German rule set.
    pub fn german() -> Result<Self, regex::Error> {
        let rules = RULES
            .iter()
            .map(|(category, pattern, replacement, explanation)| {
                Ok(GrammarRule {
                    category: *category,
                    pattern: Regex::new(&format!(r"(?i)\b{}\b", expand_nouns(pattern)))?,
                    replacement: *replacement,
                    explanation: *explanation,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// Tries each rule in order; the first match wins.
    pub fn check(&self, sentence: &str) -> Option<GrammarCorrection> {
        self.rules.iter().find_map(|rule| {
            let caps = rule.pattern.captures(sentence)?;
            let matched = caps.get(0)?;
            let replacement = render_replacement(&caps, rule.replacement, matched.as_str());

            let mut corrected = String::with_capacity(sentence.len() + 4);
            corrected.push_str(&sentence[..matched.start()]);
            corrected.push_str(&replacement);
            corrected.push_str(&sentence[matched.end()..]);

            Some(GrammarCorrection {
                corrected,
                explanation: rule.explanation.to_string(),
                category: rule.category,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn expand_nouns(pattern: &str) -> String {
    pattern
        .replace("{FEM}", FEMININE_NOUNS)
        .replace("{MASC}", MASCULINE_NOUNS)
        .replace("{NEUT}", NEUTER_NOUNS)
}

/// Expands capture groups, then restores the capitalization of the first letter of
/// the original match (templates are written in lowercase).
fn render_replacement(caps: &Captures<'_>, template: &str, original: &str) -> String {
    let mut expanded = String::new();
    caps.expand(template, &mut expanded);

    let starts_upper = original.chars().next().is_some_and(char::is_uppercase);
    if !starts_upper {
        return expanded;
    }
    let mut chars = expanded.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
