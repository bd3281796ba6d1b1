//! Action persistence
//!
//! `AgentAction` is the only durable entity. Every status change goes through
//! `transition`, a compare-and-set on the current status: the write happens
//! only if the row is still in the expected state. In memory that check runs
//! under the write lock; in Postgres it is a single conditional UPDATE.

use crate::error::AssistantError;
use crate::models::{ActionParameters, ActionStatus, ActionType, AgentAction, ExecutionResult};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Fields written together with a status change
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPatch {
    pub status: ActionStatus,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub result_message: Option<String>,
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>,
}

impl TransitionPatch {
    fn to(status: ActionStatus) -> Self {
        Self {
            status,
            confirmed_at: None,
            executed_at: None,
            result_message: None,
            related_entity_id: None,
            related_entity_type: None,
        }
    }

    pub fn confirmed(at: DateTime<Utc>) -> Self {
        Self {
            confirmed_at: Some(at),
            ..Self::to(ActionStatus::Confirmed)
        }
    }

    pub fn executed(at: DateTime<Utc>, result: ExecutionResult) -> Self {
        Self {
            executed_at: Some(at),
            result_message: Some(result.message),
            related_entity_id: result.related_entity_id,
            related_entity_type: result.related_entity_type,
            ..Self::to(ActionStatus::Executed)
        }
    }

    pub fn failed(at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            executed_at: Some(at),
            result_message: Some(reason.into()),
            ..Self::to(ActionStatus::Failed)
        }
    }

    pub fn cancelled() -> Self {
        Self {
            result_message: Some("Cancelled by user".to_string()),
            ..Self::to(ActionStatus::Cancelled)
        }
    }

    pub fn expired() -> Self {
        Self {
            result_message: Some("Not confirmed in time".to_string()),
            ..Self::to(ActionStatus::Expired)
        }
    }

    fn apply(&self, action: &mut AgentAction) {
        action.status = self.status;
        if self.confirmed_at.is_some() {
            action.confirmed_at = self.confirmed_at;
        }
        if self.executed_at.is_some() {
            action.executed_at = self.executed_at;
        }
        if self.result_message.is_some() {
            action.result_message = self.result_message.clone();
        }
        if self.related_entity_id.is_some() {
            action.related_entity_id = self.related_entity_id.clone();
        }
        if self.related_entity_type.is_some() {
            action.related_entity_type = self.related_entity_type.clone();
        }
    }
}

#[async_trait]
pub trait ActionStore: Send + Sync {
    async fn insert(&self, action: &AgentAction) -> Result<()>;

    /// Scoped to the owner: another user's action is indistinguishable from
    /// a missing one.
    async fn get(&self, user_id: Uuid, id: Uuid) -> Result<Option<AgentAction>>;

    /// Newest first
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<AgentAction>>;

    /// Apply `patch` only if the action is currently `from`. Returns the
    /// updated action, or `None` when the status had already moved on.
    async fn transition(
        &self,
        user_id: Uuid,
        id: Uuid,
        from: ActionStatus,
        patch: TransitionPatch,
    ) -> Result<Option<AgentAction>>;

    /// Expire every `Proposed` action created at or before `cutoff`.
    /// Returns the ids that changed.
    async fn expire_proposed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>>;

    /// Fail every `Confirmed` action confirmed at or before `cutoff`.
    /// Returns the ids that changed.
    async fn fail_confirmed_before(&self, cutoff: DateTime<Utc>, reason: &str) -> Result<Vec<Uuid>>;
}

// =============================
// In-memory
// =============================

#[derive(Default)]
pub struct InMemoryActionStore {
    actions: Arc<RwLock<HashMap<Uuid, AgentAction>>>,
}

impl InMemoryActionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActionStore for InMemoryActionStore {
    async fn insert(&self, action: &AgentAction) -> Result<()> {
        self.actions.write().await.insert(action.id, action.clone());
        Ok(())
    }

    async fn get(&self, user_id: Uuid, id: Uuid) -> Result<Option<AgentAction>> {
        Ok(self
            .actions
            .read()
            .await
            .get(&id)
            .filter(|a| a.user_id == user_id)
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<AgentAction>> {
        let mut actions: Vec<AgentAction> = self
            .actions
            .read()
            .await
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        actions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(actions)
    }

    async fn transition(
        &self,
        user_id: Uuid,
        id: Uuid,
        from: ActionStatus,
        patch: TransitionPatch,
    ) -> Result<Option<AgentAction>> {
        let mut actions = self.actions.write().await;
        match actions.get_mut(&id) {
            Some(action) if action.user_id == user_id && action.status == from => {
                patch.apply(action);
                Ok(Some(action.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn expire_proposed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let patch = TransitionPatch::expired();
        let mut expired = Vec::new();
        for action in self.actions.write().await.values_mut() {
            if action.status == ActionStatus::Proposed && action.created_at <= cutoff {
                patch.apply(action);
                expired.push(action.id);
            }
        }
        Ok(expired)
    }

    async fn fail_confirmed_before(&self, cutoff: DateTime<Utc>, reason: &str) -> Result<Vec<Uuid>> {
        let patch = TransitionPatch::failed(Utc::now(), reason);
        let mut failed = Vec::new();
        for action in self.actions.write().await.values_mut() {
            let stranded = action.status == ActionStatus::Confirmed
                && action.confirmed_at.map_or(false, |at| at <= cutoff);
            if stranded {
                patch.apply(action);
                failed.push(action.id);
            }
        }
        Ok(failed)
    }
}

// =============================
// Postgres
// =============================

const SELECT_COLUMNS: &str = "id, user_id, action_type, parameters, status, result_message, \
     created_at, confirmed_at, executed_at, related_entity_id, related_entity_type";

pub struct PgActionStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgActionStore {
    /// Connects lazily; the schema is created on first use
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| AssistantError::Database(format!("Invalid database URL: {}", e)))?;

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS agent_actions (
                      id UUID PRIMARY KEY,
                      user_id UUID NOT NULL,
                      action_type TEXT NOT NULL,
                      parameters JSONB NOT NULL,
                      status TEXT NOT NULL,
                      result_message TEXT,
                      created_at TIMESTAMPTZ NOT NULL,
                      confirmed_at TIMESTAMPTZ,
                      executed_at TIMESTAMPTZ,
                      related_entity_id TEXT,
                      related_entity_type TEXT
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_agent_actions_user_time
                    ON agent_actions (user_id, created_at DESC);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_agent_actions_proposed
                    ON agent_actions (created_at) WHERE status = 'proposed';
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AssistantError::Database(format!("Failed to initialize action schema: {}", e))
            })?;

        Ok(())
    }
}

fn db_error(context: &str) -> impl Fn(sqlx::Error) -> AssistantError + '_ {
    move |e| AssistantError::Database(format!("{}: {}", context, e))
}

fn row_to_action(row: &PgRow) -> Result<AgentAction> {
    let get_err = db_error("Failed to decode action row");

    let action_type: String = row.try_get("action_type").map_err(&get_err)?;
    let status: String = row.try_get("status").map_err(&get_err)?;
    let parameters: serde_json::Value = row.try_get("parameters").map_err(&get_err)?;

    let action_type = action_type
        .parse::<ActionType>()
        .map_err(AssistantError::Database)?;
    let status = status
        .parse::<ActionStatus>()
        .map_err(AssistantError::Database)?;
    let parameters: ActionParameters = serde_json::from_value(parameters)?;

    Ok(AgentAction {
        id: row.try_get("id").map_err(&get_err)?,
        user_id: row.try_get("user_id").map_err(&get_err)?,
        action_type,
        parameters,
        status,
        result_message: row.try_get("result_message").map_err(&get_err)?,
        created_at: row.try_get("created_at").map_err(&get_err)?,
        confirmed_at: row.try_get("confirmed_at").map_err(&get_err)?,
        executed_at: row.try_get("executed_at").map_err(&get_err)?,
        related_entity_id: row.try_get("related_entity_id").map_err(&get_err)?,
        related_entity_type: row.try_get("related_entity_type").map_err(&get_err)?,
    })
}

#[async_trait]
impl ActionStore for PgActionStore {
    async fn insert(&self, action: &AgentAction) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO agent_actions
              (id, user_id, action_type, parameters, status, result_message,
               created_at, confirmed_at, executed_at, related_entity_id, related_entity_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(action.id)
        .bind(action.user_id)
        .bind(action.action_type.as_str())
        .bind(serde_json::to_value(&action.parameters)?)
        .bind(action.status.as_str())
        .bind(&action.result_message)
        .bind(action.created_at)
        .bind(action.confirmed_at)
        .bind(action.executed_at)
        .bind(&action.related_entity_id)
        .bind(&action.related_entity_type)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to insert action"))?;

        Ok(())
    }

    async fn get(&self, user_id: Uuid, id: Uuid) -> Result<Option<AgentAction>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM agent_actions WHERE id = $1 AND user_id = $2",
            SELECT_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load action"))?;

        row.as_ref().map(row_to_action).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<AgentAction>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM agent_actions WHERE user_id = $1 ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list actions"))?;

        rows.iter().map(row_to_action).collect()
    }

    async fn transition(
        &self,
        user_id: Uuid,
        id: Uuid,
        from: ActionStatus,
        patch: TransitionPatch,
    ) -> Result<Option<AgentAction>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE agent_actions SET
              status = $4,
              confirmed_at = COALESCE($5, confirmed_at),
              executed_at = COALESCE($6, executed_at),
              result_message = COALESCE($7, result_message),
              related_entity_id = COALESCE($8, related_entity_id),
              related_entity_type = COALESCE($9, related_entity_type)
            WHERE id = $1 AND user_id = $2 AND status = $3
            RETURNING {}
            "#,
            SELECT_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .bind(from.as_str())
        .bind(patch.status.as_str())
        .bind(patch.confirmed_at)
        .bind(patch.executed_at)
        .bind(&patch.result_message)
        .bind(&patch.related_entity_id)
        .bind(&patch.related_entity_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to update action status"))?;

        row.as_ref().map(row_to_action).transpose()
    }

    async fn expire_proposed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
        self.ensure_schema().await?;

        let patch = TransitionPatch::expired();
        let rows = sqlx::query(
            r#"
            UPDATE agent_actions SET
              status = $2,
              result_message = COALESCE(result_message, $3)
            WHERE status = 'proposed' AND created_at <= $1
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .bind(patch.status.as_str())
        .bind(&patch.result_message)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to expire actions"))?;

        rows.iter()
            .map(|row| row.try_get("id").map_err(db_error("Failed to decode action id")))
            .collect()
    }

    async fn fail_confirmed_before(&self, cutoff: DateTime<Utc>, reason: &str) -> Result<Vec<Uuid>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            UPDATE agent_actions SET
              status = 'failed',
              executed_at = $2,
              result_message = $3
            WHERE status = 'confirmed' AND confirmed_at <= $1
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .bind(Utc::now())
        .bind(reason)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to fail stranded actions"))?;

        rows.iter()
            .map(|row| row.try_get("id").map_err(db_error("Failed to decode action id")))
            .collect()
    }
}

/// Postgres when a database URL is configured, in-memory otherwise
pub fn build_action_store(database_url: Option<&str>) -> Arc<dyn ActionStore> {
    if let Some(url) = database_url {
        match PgActionStore::connect_lazy(url) {
            Ok(store) => {
                info!("Action store backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres action store, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Action store backend: in-memory");
    Arc::new(InMemoryActionStore::new())
}
