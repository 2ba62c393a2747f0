//! crates/sprachwelt_core/src/engine/mod.rs
//!
//! The scenario conversation engine. It couples an LLM-played character with the
//! conversation state store, objective detection, grammar feedback, review cards
//! and progress.
//!
//! A turn holds the state's lock from the first read to the final commit. The LLM
//! runs before anything is written: the user message, the character reply, the
//! objective completions and the score are persisted together in one commit, so a
//! failed or abandoned turn leaves the stored transcript untouched. The blocking
//! `turn` is the streaming `turn_stream` collected.

pub mod objectives;
pub mod prompt;
pub mod reply;

use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::conversation::{ConversationStore, StateLease};
use crate::domain::{
    CardType, Character, ConversationState, Counter, MessageRole, Scenario, POINTS_PER_OBJECTIVE,
};
use crate::error::{CoreError, CoreResult};
use crate::grammar::{GrammarCorrection, GrammarRules};
use crate::ports::{ContentStore, LlmService, TextStream};
use crate::progress::ProgressTracker;
use crate::review::ReviewScheduler;

use objectives::ObjectiveMatch;
use reply::ReplyShaper;

pub const MAX_UTTERANCE_CHARS: usize = 500;
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(30);

//=========================================================================================
// Results
//=========================================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub state_id: Uuid,
    pub greeting: String,
    pub character: Character,
}

/// Everything a turn reports besides the reply text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnSummary {
    pub completed_objective_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grammar_feedback: Option<GrammarCorrection>,
    pub scenario_complete: bool,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub completed_objective_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grammar_feedback: Option<GrammarCorrection>,
    pub scenario_complete: bool,
    pub score: i64,
}

impl TurnOutcome {
    pub fn new(reply: String, summary: TurnSummary) -> Self {
        Self {
            reply,
            completed_objective_ids: summary.completed_objective_ids,
            grammar_feedback: summary.grammar_feedback,
            scenario_complete: summary.scenario_complete,
            score: summary.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// A piece of the shaped reply.
    Delta(String),
    /// The turn was committed. Always the last event.
    Done(TurnSummary),
}

pub type TurnStream = Pin<Box<dyn Stream<Item = CoreResult<TurnEvent>> + Send>>;

//=========================================================================================
// In-flight turn
//=========================================================================================

/// A validated turn waiting for the character reply.
struct PendingTurn {
    user_id: Uuid,
    lease: StateLease,
    scenario: Scenario,
    utterance: String,
    matches: Vec<ObjectiveMatch>,
    grammar: Option<GrammarCorrection>,
    llm: TextStream,
    shaper: ReplyShaper,
    deadline: Instant,
}

impl PendingTurn {
    /// Pulls one raw delta from the LLM. `None` once the reply is complete.
    async fn next_deltas(&mut self) -> CoreResult<Option<Vec<String>>> {
        if self.shaper.is_done() {
            return Ok(None);
        }
        match timeout_at(self.deadline, self.llm.next()).await {
            Err(_) => Err(CoreError::LlmTimeout),
            Ok(None) => Ok(None),
            Ok(Some(Err(e))) => Err(CoreError::from_llm(e)),
            Ok(Some(Ok(raw))) => Ok(Some(self.shaper.push(&raw))),
        }
    }
}

/// A turn whose reply is final, ready to be committed.
struct ReadyTurn {
    user_id: Uuid,
    lease: StateLease,
    scenario: Scenario,
    utterance: String,
    matches: Vec<ObjectiveMatch>,
    grammar: Option<GrammarCorrection>,
    reply: String,
}

//=========================================================================================
// Engine
//=========================================================================================

/// Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct ScenarioEngine {
    content: Arc<dyn ContentStore>,
    llm: Arc<dyn LlmService>,
    conversations: Arc<ConversationStore>,
    reviews: Arc<ReviewScheduler>,
    progress: Arc<ProgressTracker>,
    grammar: Arc<GrammarRules>,
    llm_timeout: Duration,
}

impl ScenarioEngine {
    pub fn new(
        content: Arc<dyn ContentStore>,
        llm: Arc<dyn LlmService>,
        conversations: Arc<ConversationStore>,
        reviews: Arc<ReviewScheduler>,
        progress: Arc<ProgressTracker>,
        grammar: Arc<GrammarRules>,
    ) -> Self {
        Self {
            content,
            llm,
            conversations,
            reviews,
            progress,
            grammar,
            llm_timeout: DEFAULT_LLM_TIMEOUT,
        }
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    /// Opens a new attempt at the scenario, greeted by its lead character.
    #[instrument(skip(self))]
    pub async fn start(&self, user_id: Uuid, scenario_id: &str) -> CoreResult<StartOutcome> {
        let scenario = self.scenario(scenario_id).await?;
        let state = self.conversations.create(user_id, &scenario).await?;
        let character = self.character(&scenario, &state)?.clone();
        info!(state_id = %state.id, character = %character.id, "scenario started");
        Ok(StartOutcome {
            state_id: state.id,
            greeting: character.greeting.clone(),
            character,
        })
    }

    /// Plays one learner turn and returns the collected result.
    pub async fn turn(&self, user_id: Uuid, state_id: Uuid, utterance: &str) -> CoreResult<TurnOutcome> {
        let mut events = self.turn_stream(user_id, state_id, utterance.to_string());
        let mut reply = String::new();
        while let Some(event) = events.next().await {
            match event? {
                TurnEvent::Delta(delta) => reply.push_str(&delta),
                TurnEvent::Done(summary) => return Ok(TurnOutcome::new(reply, summary)),
            }
        }
        Err(CoreError::InvariantViolation(
            "turn stream ended without a summary".into(),
        ))
    }

    /// Plays one learner turn, streaming the reply as it is generated.
    ///
    /// Dropping the stream before `Done` cancels the LLM request and persists nothing.
    /// Once the reply is complete the commit runs to the end even if the consumer
    /// goes away.
    pub fn turn_stream(&self, user_id: Uuid, state_id: Uuid, utterance: String) -> TurnStream {
        let engine = self.clone();
        Box::pin(async_stream::stream! {
            let mut pending = match engine.begin_turn(user_id, state_id, &utterance).await {
                Ok(pending) => pending,
                Err(e) => {
                    warn!(%state_id, code = e.code(), "turn rejected");
                    yield Err(e);
                    return;
                }
            };

            loop {
                match pending.next_deltas().await {
                    Ok(Some(deltas)) => {
                        for delta in deltas {
                            yield Ok(TurnEvent::Delta(delta));
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%state_id, code = e.code(), "LLM failed; turn rolled back");
                        yield Err(e);
                        return;
                    }
                }
            }

            let PendingTurn { user_id, lease, scenario, utterance, matches, grammar, llm, mut shaper, .. } = pending;
            drop(llm);
            match shaper.finish() {
                Ok(deltas) => {
                    for delta in deltas {
                        yield Ok(TurnEvent::Delta(delta));
                    }
                }
                Err(e) => {
                    warn!(%state_id, code = e.code(), "LLM reply unusable; turn rolled back");
                    yield Err(e);
                    return;
                }
            }

            let ready = ReadyTurn {
                user_id,
                lease,
                scenario,
                utterance,
                matches,
                grammar,
                reply: shaper.into_reply(),
            };
            let committer = engine.clone();
            let summary = match tokio::spawn(async move { committer.commit_turn(ready).await }).await {
                Ok(result) => result,
                Err(join) => Err(CoreError::InvariantViolation(format!("turn commit aborted: {join}"))),
            };
            yield summary.map(TurnEvent::Done);
        })
    }

    /// Moves an active attempt to `abandoned`.
    #[instrument(skip(self))]
    pub async fn abandon(&self, user_id: Uuid, state_id: Uuid) -> CoreResult<ConversationState> {
        let mut lease = self.owned_lease(user_id, state_id).await?;
        lease.state.abandon(Utc::now())?;
        self.conversations.commit(&lease).await?;
        info!(%state_id, "scenario abandoned");
        Ok(lease.state)
    }

    /// Ends an active attempt with its current score.
    ///
    /// The scenario rewards are granted only when every required objective is done;
    /// ending early keeps the objective XP already earned and nothing more.
    #[instrument(skip(self))]
    pub async fn complete(&self, user_id: Uuid, state_id: Uuid) -> CoreResult<ConversationState> {
        let mut lease = self.owned_lease(user_id, state_id).await?;
        let scenario = self.scenario(&lease.state.scenario_id).await?;
        let score = lease.state.score;
        let earned = lease.state.all_required_completed(&scenario);
        lease.state.complete(score, Utc::now())?;
        self.conversations.commit(&lease).await?;
        if earned {
            self.reward_completion(user_id, &scenario, score).await;
        } else {
            info!(%state_id, score, "scenario ended early; no completion reward");
        }
        Ok(lease.state)
    }

    pub async fn load(&self, user_id: Uuid, state_id: Uuid) -> CoreResult<ConversationState> {
        let state = self.conversations.load(state_id).await?;
        if state.user_id != user_id {
            return Err(CoreError::Forbidden);
        }
        Ok(state)
    }

    //-------------------------------------------------------------------------------------
    // Turn phases
    //-------------------------------------------------------------------------------------

    async fn begin_turn(&self, user_id: Uuid, state_id: Uuid, utterance: &str) -> CoreResult<PendingTurn> {
        let utterance = validate_utterance(utterance)?;
        let mut lease = self.owned_lease(user_id, state_id).await?;
        lease.state.ensure_active()?;

        let scenario = self.scenario(&lease.state.scenario_id).await?;
        if lease.state.is_expired(&scenario, Utc::now()) {
            lease.state.abandon(Utc::now())?;
            self.conversations.commit(&lease).await?;
            info!(%state_id, "time limit reached; scenario abandoned");
            return Err(CoreError::StateFrozen(state_id));
        }

        let character = self.character(&scenario, &lease.state)?;
        let matches = objectives::match_objectives(&scenario, &lease.state, &utterance);
        let grammar = self.grammar.check(&utterance);

        let open: Vec<_> = lease
            .state
            .open_objectives(&scenario)
            .into_iter()
            .filter(|o| !matches.iter().any(|m| m.objective_id == o.id))
            .collect();
        let system = prompt::system_prompt(&scenario, character, &open);
        let messages = prompt::build_messages(system, &lease.state, &utterance);
        let shaper = ReplyShaper::new(&character.name);

        let deadline = Instant::now() + self.llm_timeout;
        let llm = timeout_at(deadline, self.llm.chat_stream(&messages, &prompt::chat_options()))
            .await
            .map_err(|_| CoreError::LlmTimeout)?
            .map_err(CoreError::from_llm)?;

        Ok(PendingTurn {
            user_id,
            lease,
            scenario,
            utterance,
            matches,
            grammar,
            llm,
            shaper,
            deadline,
        })
    }

    /// Writes the turn in one commit, then applies the side effects.
    async fn commit_turn(&self, turn: ReadyTurn) -> CoreResult<TurnSummary> {
        let ReadyTurn {
            user_id,
            mut lease,
            scenario,
            utterance,
            matches,
            grammar,
            reply,
        } = turn;
        let state_id = lease.state.id;
        let now = Utc::now();

        let state = &mut lease.state;
        state.append_message(MessageRole::User, utterance, now)?;
        state.append_message(MessageRole::Character, reply, now)?;
        let mut completed_objective_ids = Vec::new();
        for m in &matches {
            if state.mark_objective(&m.objective_id, now)? {
                completed_objective_ids.push(m.objective_id.clone());
            }
        }
        let scenario_complete = state.all_required_completed(&scenario);
        let score = state.score;
        if scenario_complete {
            state.complete(score, now)?;
        }
        check_score(state)?;
        self.conversations.commit(&lease).await?;
        info!(
            %state_id,
            completed = completed_objective_ids.len(),
            score,
            scenario_complete,
            "turn committed"
        );

        self.reward_objectives(user_id, &scenario, &matches).await;
        if grammar.is_some() {
            if let Err(e) = self
                .progress
                .increment_counter(user_id, Counter::GrammarErrorsFixed, 1)
                .await
            {
                warn!(%state_id, error = %e, "could not count grammar fix");
            }
        }
        if scenario_complete {
            self.reward_completion(user_id, &scenario, score).await;
        }

        Ok(TurnSummary {
            completed_objective_ids,
            grammar_feedback: grammar,
            scenario_complete,
            score,
        })
    }

    //-------------------------------------------------------------------------------------
    // Side effects. Failures are logged and never abort the turn.
    //-------------------------------------------------------------------------------------

    async fn reward_objectives(&self, user_id: Uuid, scenario: &Scenario, matches: &[ObjectiveMatch]) {
        for m in matches {
            let Some(objective) = scenario.objective(&m.objective_id) else {
                continue;
            };
            if objective.xp_reward > 0 {
                if let Err(e) = self.progress.award_xp(user_id, objective.xp_reward).await {
                    warn!(objective = %objective.id, error = %e, "objective XP not awarded");
                }
            }
            for keyword in &m.matched_keywords {
                match self
                    .reviews
                    .upsert_card(user_id, CardType::Vocabulary, keyword)
                    .await
                {
                    Ok(upsert) if upsert.created => {
                        if let Err(e) = self
                            .progress
                            .increment_counter(user_id, Counter::WordsLearned, 1)
                            .await
                        {
                            warn!(error = %e, "words_learned not updated");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(keyword = %keyword, error = %e, "review card not queued"),
                }
            }
        }
    }

    async fn reward_completion(&self, user_id: Uuid, scenario: &Scenario, score: i64) {
        let mut xp = scenario.xp_reward;
        if score == scenario.perfect_score() {
            xp += scenario.bonus_xp;
        }
        if let Err(e) = self.progress.award_xp(user_id, xp).await {
            warn!(scenario = %scenario.id, error = %e, "completion XP not awarded");
        }
        if let Err(e) = self
            .progress
            .increment_counter(user_id, Counter::ScenariosCompleted, 1)
            .await
        {
            warn!(scenario = %scenario.id, error = %e, "scenarios_completed not updated");
        }
        if let Err(e) = self
            .progress
            .record_activity(user_id, Utc::now().date_naive())
            .await
        {
            warn!(scenario = %scenario.id, error = %e, "activity not recorded");
        }
        info!(scenario = %scenario.id, xp, score, "scenario completed");
    }

    //-------------------------------------------------------------------------------------
    // Lookups
    //-------------------------------------------------------------------------------------

    async fn scenario(&self, scenario_id: &str) -> CoreResult<Scenario> {
        self.content.scenario(scenario_id).await.map_err(|e| {
            CoreError::from_store(e, || CoreError::UnknownScenario(scenario_id.to_string()))
        })
    }

    fn character<'s>(&self, scenario: &'s Scenario, state: &ConversationState) -> CoreResult<&'s Character> {
        scenario.character(&state.character_id).ok_or_else(|| {
            CoreError::InvariantViolation(format!(
                "state {} refers to unknown character '{}'",
                state.id, state.character_id
            ))
        })
    }

    async fn owned_lease(&self, user_id: Uuid, state_id: Uuid) -> CoreResult<StateLease> {
        let lease = self.conversations.lease(state_id).await?;
        if lease.state.user_id != user_id {
            return Err(CoreError::Forbidden);
        }
        Ok(lease)
    }
}

fn validate_utterance(utterance: &str) -> CoreResult<String> {
    let trimmed = utterance.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidUtterance("utterance is empty".into()));
    }
    if trimmed.chars().count() > MAX_UTTERANCE_CHARS {
        return Err(CoreError::InvalidUtterance(format!(
            "utterance is longer than {MAX_UTTERANCE_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn check_score(state: &ConversationState) -> CoreResult<()> {
    let completed = state.objectives_progress.values().filter(|p| p.completed).count() as i64;
    if state.score != POINTS_PER_OBJECTIVE * completed {
        let violation = format!(
            "state {} has score {} for {completed} completed objectives",
            state.id, state.score
        );
        error!(target: "invariant", state_id = %state.id, %violation, "score mismatch");
        return Err(CoreError::InvariantViolation(violation));
    }
    Ok(())
}
