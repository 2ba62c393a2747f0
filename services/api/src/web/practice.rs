//! services/api/src/web/practice.rs
//!
//! REST handlers for the practice features around the conversations: vocabulary
//! enrolment, quizzes and the stand-alone grammar check.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sprachwelt_core::domain::{CardType, Counter, Quiz};
use sprachwelt_core::{CoreError, CoreResult};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, ErrorBody};
use crate::web::state::AppState;

/// Longest text the grammar check accepts.
pub const MAX_GRAMMAR_TEXT_CHARS: usize = 500;

//=========================================================================================
// Vocabulary
//=========================================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct EnrollResponse {
    pub set_id: String,
    pub cards_created: u32,
    pub cards_existing: u32,
    pub words_learned: u32,
}

/// Enrol the caller in a vocabulary set: one review card per word.
#[utoipa::path(
    post,
    path = "/vocab/{set_id}/enroll",
    params(("set_id" = String, Path, description = "Vocabulary set id")),
    responses(
        (status = 200, description = "Cards created or already present", body = EnrollResponse),
        (status = 404, description = "Unknown vocabulary set", body = ErrorBody)
    ),
    security(("user_id" = [])),
    tag = "practice"
)]
#[instrument(skip(state))]
pub async fn enroll_vocab_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(set_id): Path<String>,
) -> Result<Json<EnrollResponse>, ApiError> {
    let set = state
        .content
        .vocab_set(&set_id)
        .await
        .map_err(|e| CoreError::from_store(e, || CoreError::UnknownContent(set_id.clone())))?;

    let mut cards_created = 0;
    let mut cards_existing = 0;
    for entry in &set.words {
        let upsert = state
            .reviews
            .upsert_card(user_id, CardType::Vocabulary, &entry.word.to_lowercase())
            .await?;
        if upsert.created {
            cards_created += 1;
        } else {
            cards_existing += 1;
        }
    }

    let stats = if cards_created > 0 {
        state
            .progress
            .increment_counter(user_id, Counter::WordsLearned, cards_created)
            .await?
    } else {
        state.progress.stats(user_id).await?
    };
    info!(set_id = %set.id, cards_created, "vocabulary set enrolled");

    Ok(Json(EnrollResponse {
        set_id: set.id,
        cards_created,
        cards_existing,
        words_learned: stats.words_learned,
    }))
}

//=========================================================================================
// Quizzes
//=========================================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct QuizSubmission {
    /// The chosen option index for each question, in question order.
    pub answers: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct QuestionResult {
    pub correct: bool,
    pub answer_index: usize,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct QuizResult {
    pub quiz_id: String,
    pub correct: u32,
    pub total: u32,
    pub perfect: bool,
    pub xp_awarded: u64,
    pub questions: Vec<QuestionResult>,
}

/// Scores a submission. XP is the quiz reward scaled by the share of correct
/// answers, rounded down.
pub fn score_quiz(quiz: &Quiz, answers: &[usize]) -> CoreResult<QuizResult> {
    if answers.len() != quiz.questions.len() {
        return Err(CoreError::InvalidInput(format!(
            "expected {} answers, got {}",
            quiz.questions.len(),
            answers.len()
        )));
    }

    let questions: Vec<QuestionResult> = quiz
        .questions
        .iter()
        .zip(answers)
        .map(|(question, &answer)| QuestionResult {
            correct: answer == question.answer_index,
            answer_index: question.answer_index,
            explanation: question.explanation.clone(),
        })
        .collect();

    let total = questions.len() as u32;
    let correct = questions.iter().filter(|q| q.correct).count() as u32;
    let xp_awarded = if total == 0 {
        0
    } else {
        quiz.xp_reward * u64::from(correct) / u64::from(total)
    };

    Ok(QuizResult {
        quiz_id: quiz.id.clone(),
        correct,
        total,
        perfect: total > 0 && correct == total,
        xp_awarded,
        questions,
    })
}

/// Submit answers to a quiz and collect the XP.
#[utoipa::path(
    post,
    path = "/quizzes/{quiz_id}/submit",
    params(("quiz_id" = String, Path, description = "Quiz id")),
    request_body = QuizSubmission,
    responses(
        (status = 200, description = "The scored submission", body = QuizResult),
        (status = 400, description = "Wrong number of answers", body = ErrorBody),
        (status = 404, description = "Unknown quiz", body = ErrorBody)
    ),
    security(("user_id" = [])),
    tag = "practice"
)]
#[instrument(skip(state, submission))]
pub async fn submit_quiz_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(quiz_id): Path<String>,
    Json(submission): Json<QuizSubmission>,
) -> Result<Json<QuizResult>, ApiError> {
    let quiz = state
        .content
        .quiz(&quiz_id)
        .await
        .map_err(|e| CoreError::from_store(e, || CoreError::UnknownContent(quiz_id.clone())))?;
    let result = score_quiz(&quiz, &submission.answers)?;

    if result.xp_awarded > 0 {
        state.progress.award_xp(user_id, result.xp_awarded).await?;
    }
    state
        .progress
        .increment_counter(user_id, Counter::QuizzesCompleted, 1)
        .await?;
    if result.perfect {
        state
            .progress
            .increment_counter(user_id, Counter::PerfectQuizzes, 1)
            .await?;
    }
    state
        .progress
        .record_activity(user_id, Utc::now().date_naive())
        .await?;

    info!(quiz_id = %quiz.id, correct = result.correct, total = result.total, "quiz submitted");
    Ok(Json(result))
}

//=========================================================================================
// Grammar
//=========================================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrammarCheckRequest {
    pub text: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GrammarCheckResponse {
    pub has_correction: bool,
    pub corrected: Option<String>,
    pub explanation: Option<String>,
}

/// Run the rule-based grammar check on a sentence.
///
/// A correction also files the corrected sentence as a grammar review card.
#[utoipa::path(
    post,
    path = "/grammar/check",
    request_body = GrammarCheckRequest,
    responses(
        (status = 200, description = "The first correction, if any", body = GrammarCheckResponse),
        (status = 400, description = "Empty or overlong text", body = ErrorBody)
    ),
    security(("user_id" = [])),
    tag = "practice"
)]
#[instrument(skip(state, request), fields(text_len = request.text.len()))]
pub async fn grammar_check_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(request): Json<GrammarCheckRequest>,
) -> Result<Json<GrammarCheckResponse>, ApiError> {
    let text = request.text.trim();
    if text.is_empty() {
        return Err(CoreError::InvalidInput("text is empty".into()).into());
    }
    if text.chars().count() > MAX_GRAMMAR_TEXT_CHARS {
        return Err(CoreError::InvalidInput(format!(
            "text exceeds {MAX_GRAMMAR_TEXT_CHARS} characters"
        ))
        .into());
    }

    let correction = state.grammar.check(text);

    if let Err(e) = state
        .progress
        .increment_counter(user_id, Counter::GrammarChecks, 1)
        .await
    {
        warn!(error = %e, "grammar_checks not updated");
    }
    if let Some(correction) = &correction {
        if let Err(e) = state
            .progress
            .increment_counter(user_id, Counter::GrammarErrorsFixed, 1)
            .await
        {
            warn!(error = %e, "grammar_errors_fixed not updated");
        }
        if let Err(e) = state
            .reviews
            .upsert_card(user_id, CardType::Grammar, &correction.corrected)
            .await
        {
            warn!(error = %e, "grammar review card not created");
        }
    }

    Ok(Json(match correction {
        Some(correction) => GrammarCheckResponse {
            has_correction: true,
            corrected: Some(correction.corrected),
            explanation: Some(correction.explanation),
        },
        None => GrammarCheckResponse {
            has_correction: false,
            corrected: None,
            explanation: None,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprachwelt_core::domain::QuizQuestion;

    fn quiz(xp_reward: u64) -> Quiz {
        let question = |answer_index| QuizQuestion {
            prompt: "Welcher Artikel?".into(),
            options: vec!["der".into(), "die".into(), "das".into()],
            answer_index,
            explanation: None,
        };
        Quiz {
            id: "artikel".into(),
            title: "Artikel".into(),
            xp_reward,
            questions: vec![question(0), question(1), question(2)],
        }
    }

    #[test]
    fn xp_scales_with_correct_answers_rounded_down() {
        let result = score_quiz(&quiz(50), &[0, 1, 0]).unwrap();
        assert_eq!((result.correct, result.total), (2, 3));
        assert_eq!(result.xp_awarded, 33);
        assert!(!result.perfect);
        assert!(!result.questions[2].correct);

        let perfect = score_quiz(&quiz(50), &[0, 1, 2]).unwrap();
        assert!(perfect.perfect);
        assert_eq!(perfect.xp_awarded, 50);
    }

    #[test]
    fn answer_count_must_match() {
        assert!(matches!(
            score_quiz(&quiz(50), &[0, 1]),
            Err(CoreError::InvalidInput(_))
        ));
    }
}
