//! Action execution
//!
//! A fixed dispatch table from `ActionType` to the domain collaborator that
//! owns the mutation. The LLM is NOT involved here: by the time an action
//! reaches the executor its parameters are typed and validated.

mod calculator;
mod http;
mod ledger;

pub use calculator::{CompoundingCalculator, InvestmentProjection};
pub use http::FinanceApiClient;
pub use ledger::InMemoryLedger;

use crate::error::AssistantError;
use crate::models::{
    format_inr, ActionParameters, AgentAction, BudgetPeriod, ExecutionResult, InvestmentKind,
    PaymentFrequency,
};
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

// =============================
// Collaborator interfaces
// =============================

/// Each mutating collaborator returns the id of the entity it created or
/// updated. Rejections (constraint violations) are `AssistantError::Execution`.
#[async_trait]
pub trait BudgetService: Send + Sync {
    async fn upsert_budget(
        &self,
        user_id: Uuid,
        category: &str,
        limit: f64,
        period: BudgetPeriod,
    ) -> Result<String>;
}

#[async_trait]
pub trait GoalService: Send + Sync {
    async fn create_goal(
        &self,
        user_id: Uuid,
        name: &str,
        target_amount: f64,
        deadline: NaiveDate,
    ) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewDebt {
    pub name: String,
    pub principal: f64,
    pub rate: f64,
    pub emi: Option<f64>,
    pub start_date: NaiveDate,
    pub tenure_months: Option<u32>,
}

#[async_trait]
pub trait DebtService: Send + Sync {
    async fn add_debt(&self, user_id: Uuid, debt: &NewDebt) -> Result<String>;
}

#[async_trait]
pub trait PaymentScheduleService: Send + Sync {
    async fn schedule_payment(
        &self,
        user_id: Uuid,
        name: &str,
        amount: f64,
        frequency: PaymentFrequency,
        next_due: NaiveDate,
        auto_track: bool,
    ) -> Result<String>;
}

/// Read-only: no persistence, no related entity
pub trait InvestmentCalculator: Send + Sync {
    fn project(
        &self,
        kind: InvestmentKind,
        amount: f64,
        annual_rate: f64,
        years: u32,
    ) -> Result<InvestmentProjection>;
}

#[derive(Clone)]
pub struct Collaborators {
    pub budgets: Arc<dyn BudgetService>,
    pub goals: Arc<dyn GoalService>,
    pub debts: Arc<dyn DebtService>,
    pub payments: Arc<dyn PaymentScheduleService>,
    pub calculator: Arc<dyn InvestmentCalculator>,
}

impl Collaborators {
    /// All mutations go to one in-process ledger
    pub fn in_memory(ledger: Arc<InMemoryLedger>) -> Self {
        Self {
            budgets: ledger.clone(),
            goals: ledger.clone(),
            debts: ledger.clone(),
            payments: ledger,
            calculator: Arc::new(CompoundingCalculator),
        }
    }

    /// All mutations go to the finance HTTP service
    pub fn remote(client: Arc<FinanceApiClient>) -> Self {
        Self {
            budgets: client.clone(),
            goals: client.clone(),
            debts: client.clone(),
            payments: client,
            calculator: Arc::new(CompoundingCalculator),
        }
    }
}

// =============================
// Executor
// =============================

pub struct ActionExecutor {
    collaborators: Collaborators,
}

impl ActionExecutor {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    /// Dispatch one action to its collaborator. Never retries.
    pub async fn execute(&self, action: &AgentAction) -> Result<ExecutionResult> {
        let start = Instant::now();
        let user_id = action.user_id;
        let c = &self.collaborators;

        let outcome = match &action.parameters {
            ActionParameters::UpsertBudget {
                category,
                limit,
                period,
            } => c
                .budgets
                .upsert_budget(user_id, category, *limit, *period)
                .await
                .map(|id| {
                    entity(
                        format!("{} budget for {} set to {}", capitalize(period.as_str()), category, format_inr(*limit)),
                        id,
                        "budget",
                    )
                }),

            ActionParameters::CreateGoal {
                name,
                target_amount,
                deadline,
            } => c
                .goals
                .create_goal(user_id, name, *target_amount, *deadline)
                .await
                .map(|id| {
                    entity(
                        format!("Goal '{}' created: save {} by {}", name, format_inr(*target_amount), deadline),
                        id,
                        "goal",
                    )
                }),

            ActionParameters::AddDebt {
                name,
                principal,
                rate,
                emi,
                start_date,
                tenure_months,
            } => {
                let debt = NewDebt {
                    name: name.clone(),
                    principal: *principal,
                    rate: *rate,
                    emi: *emi,
                    start_date: *start_date,
                    tenure_months: *tenure_months,
                };
                c.debts.add_debt(user_id, &debt).await.map(|id| {
                    entity(
                        format!("Debt '{}' of {} at {}% added", name, format_inr(*principal), rate),
                        id,
                        "debt",
                    )
                })
            }

            ActionParameters::SchedulePayment {
                name,
                amount,
                frequency,
                next_due,
                auto_track,
            } => c
                .payments
                .schedule_payment(user_id, name, *amount, *frequency, *next_due, *auto_track)
                .await
                .map(|id| {
                    entity(
                        format!(
                            "Scheduled '{}' payment of {} ({}), next due {}",
                            name,
                            format_inr(*amount),
                            frequency,
                            next_due
                        ),
                        id,
                        "scheduled_payment",
                    )
                }),

            ActionParameters::AnalyzeInvestment {
                kind,
                amount,
                annual_rate,
                years,
            } => c
                .calculator
                .project(*kind, *amount, *annual_rate, *years)
                .map(|p| ExecutionResult {
                    message: p.describe(*kind, *amount, *annual_rate, *years),
                    related_entity_id: None,
                    related_entity_type: None,
                }),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                debug!(
                    action_id = %action.id,
                    action_type = %action.action_type,
                    elapsed_ms,
                    "Collaborator accepted action"
                );
                Ok(result)
            }
            Err(AssistantError::Execution(reason)) => {
                warn!(
                    action_id = %action.id,
                    action_type = %action.action_type,
                    %reason,
                    "Collaborator rejected action"
                );
                Err(AssistantError::Execution(reason))
            }
            Err(e) => {
                // Infrastructure detail stays in the logs
                warn!(
                    action_id = %action.id,
                    action_type = %action.action_type,
                    error = %e,
                    "Collaborator call failed"
                );
                Err(AssistantError::Execution(
                    "the finance service is unavailable".to_string(),
                ))
            }
        }
    }
}

fn entity(message: String, id: String, kind: &str) -> ExecutionResult {
    ExecutionResult {
        message,
        related_entity_id: Some(id),
        related_entity_type: Some(kind.to_string()),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
