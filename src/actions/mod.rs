//! Action lifecycle
//!
//! ```text
//! Proposed ──confirm──▶ Confirmed ──execute──▶ Executed
//!    │                      └──────────────────▶ Failed
//!    ├──cancel──▶ Cancelled
//!    └──window elapsed──▶ Expired
//! ```
//!
//! Exactly-once execution rests on two guards:
//! - every status write is a compare-and-set in the store, so only one
//!   caller can move an action out of `Proposed`;
//! - within this process, confirm/cancel on the same id are serialised by a
//!   per-action lock, so a losing confirmer waits and then observes the
//!   winner's terminal state instead of reporting a conflict.
//!
//! Once an action is `Confirmed`, the collaborator call and the final status
//! write run in a spawned task. A caller that disconnects mid-confirm drops
//! only its wait, never the settle. An action found `Confirmed` without
//! holding the lock is polled until it settles; one left `Confirmed` past the
//! execution timeout (a process died mid-call) is swept to `Failed`.

pub mod store;

pub use store::{build_action_store, ActionStore, InMemoryActionStore, PgActionStore, TransitionPatch};

use crate::error::AssistantError;
use crate::execution::ActionExecutor;
use crate::models::{ActionStatus, AgentAction, ProposedAction};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Slack on top of the execution timeout before a `Confirmed` action counts as stranded
const STRANDED_GRACE: Duration = Duration::from_secs(5);

const STRANDED_REASON: &str = "execution was interrupted before it completed";

pub struct ActionStateMachine {
    store: Arc<dyn ActionStore>,
    executor: Arc<ActionExecutor>,
    confirmation_window: Duration,
    execution_timeout: Duration,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ActionStateMachine {
    pub fn new(
        store: Arc<dyn ActionStore>,
        executor: Arc<ActionExecutor>,
        confirmation_window: Duration,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            confirmation_window,
            execution_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn confirmation_window(&self) -> Duration {
        self.confirmation_window
    }

    /// Persist a validated proposal as `Proposed`
    pub async fn create(&self, user_id: Uuid, proposal: ProposedAction) -> Result<AgentAction> {
        let action = AgentAction::proposed(user_id, proposal);
        self.store.insert(&action).await?;

        info!(
            action_id = %action.id,
            user_id = %user_id,
            action_type = %action.action_type,
            "Action proposed"
        );

        Ok(action)
    }

    pub async fn get(&self, user_id: Uuid, action_id: Uuid) -> Result<AgentAction> {
        self.store
            .get(user_id, action_id)
            .await?
            .ok_or(AssistantError::NotFound(action_id))
    }

    /// Confirm and immediately execute. Re-confirming an `Executed` or
    /// `Failed` action returns it unchanged without executing again.
    pub async fn confirm(&self, user_id: Uuid, action_id: Uuid) -> Result<AgentAction> {
        let lock = self.lock_for(action_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.confirm_locked(user_id, action_id).await
        };
        self.release(action_id, lock).await;
        result
    }

    /// Valid only from `Proposed`; cancelling twice is a no-op
    pub async fn cancel(&self, user_id: Uuid, action_id: Uuid) -> Result<AgentAction> {
        let lock = self.lock_for(action_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.cancel_locked(user_id, action_id).await
        };
        self.release(action_id, lock).await;
        result
    }

    /// A user's actions, newest first. Stale proposals are reported as expired.
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<AgentAction>> {
        let now = Utc::now();
        let mut actions = self.store.list_for_user(user_id).await?;

        for action in actions.iter_mut() {
            if action.status == ActionStatus::Proposed && self.is_stale(action, now) {
                if let Some(expired) = self
                    .transition(user_id, action.id, ActionStatus::Proposed, TransitionPatch::expired())
                    .await?
                {
                    *action = expired;
                }
            }
        }

        Ok(actions)
    }

    /// Expire every proposal older than the confirmation window and fail
    /// every action stranded in `Confirmed` past the execution timeout.
    /// Returns how many actions changed.
    pub async fn expire_stale(&self) -> Result<usize> {
        let now = Utc::now();
        let window = chrono::Duration::from_std(self.confirmation_window)
            .map_err(|e| AssistantError::Config(format!("Confirmation window out of range: {}", e)))?;
        let stranded_after = chrono::Duration::from_std(self.execution_timeout + STRANDED_GRACE)
            .map_err(|e| AssistantError::Config(format!("Execution timeout out of range: {}", e)))?;

        let expired = self.store.expire_proposed_before(now - window).await?;
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired stale action proposals");
        }

        let failed = self
            .store
            .fail_confirmed_before(now - stranded_after, STRANDED_REASON)
            .await?;
        for id in &failed {
            warn!(action_id = %id, "Stranded confirmed action marked failed");
        }

        Ok(expired.len() + failed.len())
    }

    // =============================
    // Transitions
    // =============================

    async fn confirm_locked(&self, user_id: Uuid, id: Uuid) -> Result<AgentAction> {
        loop {
            let action = self.get(user_id, id).await?;

            match action.status {
                ActionStatus::Executed | ActionStatus::Failed => {
                    debug!(action_id = %id, status = %action.status, "Action already settled");
                    return Ok(action);
                }
                ActionStatus::Cancelled => {
                    return Err(AssistantError::InvalidState {
                        id,
                        status: action.status,
                    })
                }
                ActionStatus::Expired => return Err(AssistantError::Expired(id)),
                ActionStatus::Confirmed => return self.await_settled(user_id, id).await,
                ActionStatus::Proposed => {
                    let now = Utc::now();

                    if self.is_stale(&action, now) {
                        if self.expire(user_id, id).await? {
                            return Err(AssistantError::Expired(id));
                        }
                        continue;
                    }

                    match self
                        .transition(user_id, id, ActionStatus::Proposed, TransitionPatch::confirmed(now))
                        .await?
                    {
                        Some(confirmed) => return self.execute(confirmed).await,
                        // Moved on between read and write; re-evaluate
                        None => continue,
                    }
                }
            }
        }
    }

    async fn cancel_locked(&self, user_id: Uuid, id: Uuid) -> Result<AgentAction> {
        loop {
            let action = self.get(user_id, id).await?;

            match action.status {
                ActionStatus::Cancelled => return Ok(action),
                ActionStatus::Expired => return Err(AssistantError::Expired(id)),
                ActionStatus::Proposed => {
                    if self.is_stale(&action, Utc::now()) {
                        if self.expire(user_id, id).await? {
                            return Err(AssistantError::Expired(id));
                        }
                        continue;
                    }

                    if let Some(cancelled) = self
                        .transition(user_id, id, ActionStatus::Proposed, TransitionPatch::cancelled())
                        .await?
                    {
                        info!(action_id = %id, user_id = %user_id, "Action cancelled");
                        return Ok(cancelled);
                    }
                }
                status => return Err(AssistantError::InvalidState { id, status }),
            }
        }
    }

    async fn expire(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        let expired = self
            .transition(user_id, id, ActionStatus::Proposed, TransitionPatch::expired())
            .await?
            .is_some();
        if expired {
            info!(action_id = %id, "Action expired before confirmation");
        }
        Ok(expired)
    }

    /// Compare-and-set guarded by the lifecycle; a backwards move is a bug
    /// in the caller and is refused before reaching the store.
    async fn transition(
        &self,
        user_id: Uuid,
        id: Uuid,
        from: ActionStatus,
        patch: TransitionPatch,
    ) -> Result<Option<AgentAction>> {
        if !from.can_transition_to(patch.status) {
            return Err(AssistantError::InvalidState { id, status: from });
        }
        self.store.transition(user_id, id, from, patch).await
    }

    /// Run the collaborator call for an action this caller moved to
    /// `Confirmed`. The settle runs detached so that dropping this future
    /// cannot leave the action `Confirmed`.
    async fn execute(&self, confirmed: AgentAction) -> Result<AgentAction> {
        let id = confirmed.id;

        info!(
            action_id = %id,
            action_type = %confirmed.action_type,
            "Action confirmed, executing"
        );

        let task = tokio::spawn(settle(
            self.store.clone(),
            self.executor.clone(),
            self.execution_timeout,
            confirmed,
        ));

        match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(action_id = %id, error = %e, "Execution task ended abnormally");
                Err(AssistantError::Execution(STRANDED_REASON.to_string()))
            }
        }
    }

    /// Another process holds the action in `Confirmed`; wait for it to settle
    async fn await_settled(&self, user_id: Uuid, id: Uuid) -> Result<AgentAction> {
        let deadline = tokio::time::Instant::now() + self.execution_timeout + SETTLE_POLL_INTERVAL;

        loop {
            let action = self.get(user_id, id).await?;
            if action.status.is_terminal() {
                return Ok(action);
            }
            if tokio::time::Instant::now() >= deadline {
                if let Some(failed) = self.fail_if_stranded(&action).await? {
                    return Ok(failed);
                }
                return Err(AssistantError::InvalidState {
                    id,
                    status: action.status,
                });
            }
            tokio::time::sleep(SETTLE_POLL_INTERVAL).await;
        }
    }

    /// Fail a `Confirmed` action whose executor is gone
    async fn fail_if_stranded(&self, action: &AgentAction) -> Result<Option<AgentAction>> {
        let now = Utc::now();
        let stranded = match action.confirmed_at.map(|at| (now - at).to_std()) {
            Some(Ok(age)) => age >= self.execution_timeout + STRANDED_GRACE,
            _ => false,
        };
        if !stranded {
            return Ok(None);
        }

        let failed = self
            .transition(
                action.user_id,
                action.id,
                ActionStatus::Confirmed,
                TransitionPatch::failed(now, STRANDED_REASON),
            )
            .await?;
        if failed.is_some() {
            warn!(action_id = %action.id, "Stranded confirmed action marked failed");
        }
        Ok(failed)
    }

    fn is_stale(&self, action: &AgentAction, now: DateTime<Utc>) -> bool {
        match (now - action.created_at).to_std() {
            Ok(age) => age >= self.confirmation_window,
            // Created "in the future" relative to this clock
            Err(_) => false,
        }
    }

    // =============================
    // Per-action locks
    // =============================

    async fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release(&self, id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // Map entry + ours: nobody else is waiting
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(&id);
        }
    }
}

/// Collaborator call plus the `Confirmed` → terminal write
async fn settle(
    store: Arc<dyn ActionStore>,
    executor: Arc<ActionExecutor>,
    execution_timeout: Duration,
    confirmed: AgentAction,
) -> Result<AgentAction> {
    let user_id = confirmed.user_id;
    let id = confirmed.id;

    let outcome = tokio::time::timeout(execution_timeout, executor.execute(&confirmed)).await;
    let now = Utc::now();

    let (patch, failure) = match outcome {
        Ok(Ok(result)) => (TransitionPatch::executed(now, result), None),
        Ok(Err(e)) => {
            let reason = match e {
                AssistantError::Execution(reason) => reason,
                other => other.user_message(),
            };
            (TransitionPatch::failed(now, reason.clone()), Some(reason))
        }
        Err(_) => {
            let reason = format!(
                "the finance service did not respond within {}s",
                execution_timeout.as_secs_f32()
            );
            (TransitionPatch::failed(now, reason.clone()), Some(reason))
        }
    };

    let settled = match store
        .transition(user_id, id, ActionStatus::Confirmed, patch)
        .await?
    {
        Some(settled) => settled,
        None => {
            warn!(action_id = %id, "Confirmed action changed during execution");
            store
                .get(user_id, id)
                .await?
                .ok_or(AssistantError::NotFound(id))?
        }
    };

    match failure {
        None => {
            info!(
                action_id = %id,
                related_entity_id = ?settled.related_entity_id,
                "Action executed"
            );
            Ok(settled)
        }
        Some(reason) => {
            warn!(action_id = %id, %reason, "Action failed");
            Err(AssistantError::Execution(reason))
        }
    }
}
