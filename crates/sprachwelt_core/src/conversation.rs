//! crates/sprachwelt_core/src/conversation.rs
//!
//! The conversation state document and its store. A state is an append-only
//! message log plus a small header (objective progress, score, status). All
//! mutations of one state run under that state's lock; the engine holds the lock
//! for a whole turn through a `StateLease` and writes everything in one commit.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::domain::{
    ConversationState, ConversationStatus, Message, MessageRole, Objective, ObjectiveProgress,
    Scenario, POINTS_PER_OBJECTIVE,
};
use crate::error::{CoreError, CoreResult};
use crate::locks::{KeyGuard, KeyedLocks};
use crate::ports::ConversationRepository;

//=========================================================================================
// State document rules
//=========================================================================================

impl ConversationState {
    /// A fresh attempt: active, greeted by the scenario's lead character, nothing completed.
    pub fn new(user_id: Uuid, scenario: &Scenario, attempt: u32, now: DateTime<Utc>) -> CoreResult<Self> {
        let character = scenario.lead_character().ok_or_else(|| {
            CoreError::InvariantViolation(format!("scenario '{}' has no characters", scenario.id))
        })?;
        let objectives_progress = scenario
            .objectives
            .iter()
            .map(|o| (o.id.clone(), ObjectiveProgress::default()))
            .collect::<BTreeMap<_, _>>();

        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            scenario_id: scenario.id.clone(),
            character_id: character.id.clone(),
            attempt,
            status: ConversationStatus::Active,
            messages: vec![Message {
                role: MessageRole::Character,
                content: character.greeting.clone(),
                timestamp: now,
            }],
            objectives_progress,
            score: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == ConversationStatus::Active
    }

    pub fn ensure_active(&self) -> CoreResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CoreError::StateFrozen(self.id))
        }
    }

    /// True once the scenario's wall-clock limit has run out for this attempt.
    pub fn is_expired(&self, scenario: &Scenario, now: DateTime<Utc>) -> bool {
        match scenario.time_limit_minutes {
            Some(minutes) => now >= self.created_at + Duration::minutes(i64::from(minutes)),
            None => false,
        }
    }

    /// The role the next user or character message must have.
    pub fn expected_role(&self) -> MessageRole {
        match self
            .messages
            .iter()
            .rev()
            .find(|m| m.role != MessageRole::System)
            .map(|m| m.role)
        {
            Some(MessageRole::Character) => MessageRole::User,
            Some(_) => MessageRole::Character,
            None => MessageRole::Character,
        }
    }

    pub fn append_message(
        &mut self,
        role: MessageRole,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        self.ensure_active()?;
        if role != MessageRole::System && role != self.expected_role() {
            let violation = format!(
                "state {} expected a {:?} message, got {:?}",
                self.id,
                self.expected_role(),
                role
            );
            error!(target: "invariant", state_id = %self.id, %violation, "message out of order");
            return Err(CoreError::InvariantViolation(violation));
        }
        self.messages.push(Message {
            role,
            content: content.into(),
            timestamp: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Marks an objective as completed. Returns false if it already was.
    pub fn mark_objective(&mut self, objective_id: &str, now: DateTime<Utc>) -> CoreResult<bool> {
        self.ensure_active()?;
        let progress = self
            .objectives_progress
            .get_mut(objective_id)
            .ok_or_else(|| CoreError::UnknownContent(format!("objective '{objective_id}'")))?;
        if progress.completed {
            return Ok(false);
        }
        progress.completed = true;
        progress.completed_at = Some(now);
        self.score += POINTS_PER_OBJECTIVE;
        self.updated_at = now;
        Ok(true)
    }

    pub fn complete(&mut self, final_score: i64, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_active()?;
        self.status = ConversationStatus::Completed;
        self.score = final_score;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn abandon(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_active()?;
        self.status = ConversationStatus::Abandoned;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_objective_completed(&self, objective_id: &str) -> bool {
        self.objectives_progress
            .get(objective_id)
            .is_some_and(|p| p.completed)
    }

    pub fn completed_objective_ids(&self) -> Vec<String> {
        self.objectives_progress
            .iter()
            .filter(|(_, p)| p.completed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Objectives not yet completed, in authoring order.
    pub fn open_objectives<'s>(&self, scenario: &'s Scenario) -> Vec<&'s Objective> {
        scenario
            .objectives
            .iter()
            .filter(|o| !self.is_objective_completed(&o.id))
            .collect()
    }

    pub fn all_required_completed(&self, scenario: &Scenario) -> bool {
        scenario
            .objectives
            .iter()
            .filter(|o| o.required)
            .all(|o| self.is_objective_completed(&o.id))
    }

    pub fn user_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == MessageRole::User)
    }
}

//=========================================================================================
// Store
//=========================================================================================

/// Exclusive, loaded access to one state. Changes become visible through
/// `ConversationStore::commit`; dropping the lease without committing discards them.
pub struct StateLease {
    _guard: KeyGuard,
    pub state: ConversationState,
}

pub struct ConversationStore {
    repo: Arc<dyn ConversationRepository>,
    locks: KeyedLocks<Uuid>,
}

impl ConversationStore {
    pub fn new(repo: Arc<dyn ConversationRepository>) -> Self {
        Self {
            repo,
            locks: KeyedLocks::new(),
        }
    }

    #[instrument(skip(self, scenario), fields(scenario_id = %scenario.id))]
    pub async fn create(&self, user_id: Uuid, scenario: &Scenario) -> CoreResult<ConversationState> {
        let previous = self
            .repo
            .count_attempts(user_id, &scenario.id)
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        let state = ConversationState::new(user_id, scenario, previous + 1, Utc::now())?;
        self.repo
            .insert_state(&state)
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        info!(state_id = %state.id, attempt = state.attempt, "conversation created");
        Ok(state)
    }

    pub async fn load(&self, state_id: Uuid) -> CoreResult<ConversationState> {
        self.repo
            .get_state(state_id)
            .await
            .map_err(|e| CoreError::from_store(e, || CoreError::UnknownState(state_id)))
    }

    /// Waits for the state's lock, then loads the current document.
    pub async fn lease(&self, state_id: Uuid) -> CoreResult<StateLease> {
        let guard = self.locks.acquire(state_id).await;
        let state = self.load(state_id).await?;
        Ok(StateLease { _guard: guard, state })
    }

    /// Persists the leased document in a single write.
    pub async fn commit(&self, lease: &StateLease) -> CoreResult<()> {
        self.repo
            .save_state(&lease.state)
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))
    }

    pub async fn append_message(
        &self,
        state_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> CoreResult<ConversationState> {
        self.mutate(state_id, |state, now| state.append_message(role, content, now))
            .await
    }

    pub async fn mark_objective(&self, state_id: Uuid, objective_id: &str) -> CoreResult<ConversationState> {
        self.mutate(state_id, |state, now| state.mark_objective(objective_id, now).map(|_| ()))
            .await
    }

    pub async fn complete(&self, state_id: Uuid, final_score: i64) -> CoreResult<ConversationState> {
        self.mutate(state_id, |state, now| state.complete(final_score, now))
            .await
    }

    pub async fn abandon(&self, state_id: Uuid) -> CoreResult<ConversationState> {
        self.mutate(state_id, |state, now| state.abandon(now)).await
    }

    async fn mutate(
        &self,
        state_id: Uuid,
        change: impl FnOnce(&mut ConversationState, DateTime<Utc>) -> CoreResult<()>,
    ) -> CoreResult<ConversationState> {
        let mut lease = self.lease(state_id).await?;
        change(&mut lease.state, Utc::now())?;
        self.commit(&lease).await?;
        Ok(lease.state)
    }
}
