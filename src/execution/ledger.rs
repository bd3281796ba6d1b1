//! In-process collaborator used for development, the offline demo and tests.
//! Counts every mutating call so exactly-once execution is observable.

use super::{BudgetService, DebtService, GoalService, NewDebt, PaymentScheduleService};
use crate::error::AssistantError;
use crate::models::{ActionType, BudgetPeriod, PaymentFrequency};
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BudgetRecord {
    pub id: String,
    pub category: String,
    pub limit: f64,
    pub period: BudgetPeriod,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GoalRecord {
    pub id: String,
    pub name: String,
    pub target_amount: f64,
    pub deadline: NaiveDate,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DebtRecord {
    pub id: String,
    pub debt: NewDebt,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentRecord {
    pub id: String,
    pub name: String,
    pub amount: f64,
    pub frequency: PaymentFrequency,
    pub next_due: NaiveDate,
    pub auto_track: bool,
}

#[derive(Default)]
struct UserLedger {
    budgets: Vec<BudgetRecord>,
    goals: Vec<GoalRecord>,
    debts: Vec<DebtRecord>,
    payments: Vec<PaymentRecord>,
}

#[derive(Default)]
pub struct InMemoryLedger {
    users: RwLock<HashMap<Uuid, UserLedger>>,
    latency: Option<Duration>,
    budget_calls: AtomicUsize,
    goal_calls: AtomicUsize,
    debt_calls: AtomicUsize,
    payment_calls: AtomicUsize,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before touching the ledger
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Total mutating calls received
    pub fn calls(&self) -> usize {
        ActionType::ALL.iter().map(|t| self.calls_for(*t)).sum()
    }

    pub fn calls_for(&self, action_type: ActionType) -> usize {
        match action_type {
            ActionType::UpsertBudget => self.budget_calls.load(Ordering::SeqCst),
            ActionType::CreateGoal => self.goal_calls.load(Ordering::SeqCst),
            ActionType::AddDebt => self.debt_calls.load(Ordering::SeqCst),
            ActionType::SchedulePayment => self.payment_calls.load(Ordering::SeqCst),
            ActionType::AnalyzeInvestment => 0,
        }
    }

    pub async fn budgets(&self, user_id: Uuid) -> Vec<BudgetRecord> {
        self.users
            .read()
            .await
            .get(&user_id)
            .map(|u| u.budgets.clone())
            .unwrap_or_default()
    }

    pub async fn payments(&self, user_id: Uuid) -> Vec<PaymentRecord> {
        self.users
            .read()
            .await
            .get(&user_id)
            .map(|u| u.payments.clone())
            .unwrap_or_default()
    }

    async fn enter(&self, counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            // Give concurrent callers a chance to interleave
            None => tokio::task::yield_now().await,
        }
    }
}

fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

#[async_trait]
impl BudgetService for InMemoryLedger {
    async fn upsert_budget(
        &self,
        user_id: Uuid,
        category: &str,
        limit: f64,
        period: BudgetPeriod,
    ) -> Result<String> {
        self.enter(&self.budget_calls).await;

        let mut users = self.users.write().await;
        let ledger = users.entry(user_id).or_default();

        if let Some(existing) = ledger
            .budgets
            .iter_mut()
            .find(|b| b.period == period && b.category.eq_ignore_ascii_case(category))
        {
            existing.category = category.to_string();
            existing.limit = limit;
            return Ok(existing.id.clone());
        }

        let id = new_id("bud");
        ledger.budgets.push(BudgetRecord {
            id: id.clone(),
            category: category.to_string(),
            limit,
            period,
        });
        Ok(id)
    }
}

#[async_trait]
impl GoalService for InMemoryLedger {
    async fn create_goal(
        &self,
        user_id: Uuid,
        name: &str,
        target_amount: f64,
        deadline: NaiveDate,
    ) -> Result<String> {
        self.enter(&self.goal_calls).await;

        let mut users = self.users.write().await;
        let ledger = users.entry(user_id).or_default();

        if ledger.goals.iter().any(|g| g.name.eq_ignore_ascii_case(name)) {
            return Err(AssistantError::Execution(format!(
                "a goal named '{}' already exists",
                name
            )));
        }

        let id = new_id("goal");
        ledger.goals.push(GoalRecord {
            id: id.clone(),
            name: name.to_string(),
            target_amount,
            deadline,
        });
        Ok(id)
    }
}

#[async_trait]
impl DebtService for InMemoryLedger {
    async fn add_debt(&self, user_id: Uuid, debt: &NewDebt) -> Result<String> {
        self.enter(&self.debt_calls).await;

        if let Some(emi) = debt.emi {
            if emi > debt.principal {
                return Err(AssistantError::Execution(
                    "the EMI cannot exceed the principal".to_string(),
                ));
            }
        }

        let id = new_id("debt");
        self.users
            .write()
            .await
            .entry(user_id)
            .or_default()
            .debts
            .push(DebtRecord {
                id: id.clone(),
                debt: debt.clone(),
            });
        Ok(id)
    }
}

#[async_trait]
impl PaymentScheduleService for InMemoryLedger {
    async fn schedule_payment(
        &self,
        user_id: Uuid,
        name: &str,
        amount: f64,
        frequency: PaymentFrequency,
        next_due: NaiveDate,
        auto_track: bool,
    ) -> Result<String> {
        self.enter(&self.payment_calls).await;

        let mut users = self.users.write().await;
        let ledger = users.entry(user_id).or_default();

        if ledger.payments.iter().any(|p| p.name.eq_ignore_ascii_case(name)) {
            return Err(AssistantError::Execution(format!(
                "a scheduled payment named '{}' already exists",
                name
            )));
        }

        let id = new_id("pay");
        ledger.payments.push(PaymentRecord {
            id: id.clone(),
            name: name.to_string(),
            amount,
            frequency,
            next_due,
            auto_track,
        });
        Ok(id)
    }
}
