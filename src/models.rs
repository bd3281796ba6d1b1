//! Core data models for the assistant core

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//
// ================= Language =================
//

/// Script-level language tag. `English` is the base language; every other
/// tag owns a disjoint Unicode block (see `language.rs`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LanguageTag {
    English,
    Hindi,
    Bengali,
    Punjabi,
    Gujarati,
    Odia,
    Tamil,
    Telugu,
    Kannada,
    Malayalam,
}

impl LanguageTag {
    pub const BASE: LanguageTag = LanguageTag::English;

    pub fn is_base(self) -> bool {
        self == Self::BASE
    }

    /// ISO 639-1 code
    pub fn code(self) -> &'static str {
        match self {
            LanguageTag::English => "en",
            LanguageTag::Hindi => "hi",
            LanguageTag::Bengali => "bn",
            LanguageTag::Punjabi => "pa",
            LanguageTag::Gujarati => "gu",
            LanguageTag::Odia => "or",
            LanguageTag::Tamil => "ta",
            LanguageTag::Telugu => "te",
            LanguageTag::Kannada => "kn",
            LanguageTag::Malayalam => "ml",
        }
    }
}

//
// ================= Routing =================
//

/// Per-query routing decision. Produced once by the classifier, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingDecision {
    pub use_grounded_retrieval: bool,
    pub language: LanguageTag,
    pub is_actionable: bool,
    /// Action type whose imperative pattern matched, if any
    pub action_hint: Option<ActionType>,
    /// Diagnostic only
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    FailurePattern,
    Timeout,
    TransportError,
}

/// One step of a cascade. The response text is kept in the audit log only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider_id: String,
    pub started_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
}

impl ProviderAttempt {
    /// The attempt without its response text, for callers. Rejected text
    /// and raw tool-call envelopes stay in the audit log.
    pub fn redacted(self) -> Self {
        Self {
            response_text: None,
            ..self
        }
    }
}

//
// ================= Actions =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    UpsertBudget,
    CreateGoal,
    AddDebt,
    SchedulePayment,
    AnalyzeInvestment,
}

impl ActionType {
    pub const ALL: [ActionType; 5] = [
        ActionType::UpsertBudget,
        ActionType::CreateGoal,
        ActionType::AddDebt,
        ActionType::SchedulePayment,
        ActionType::AnalyzeInvestment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::UpsertBudget => "upsert_budget",
            ActionType::CreateGoal => "create_goal",
            ActionType::AddDebt => "add_debt",
            ActionType::SchedulePayment => "schedule_payment",
            ActionType::AnalyzeInvestment => "analyze_investment",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ActionType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown action '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentFrequency {
    Once,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvestmentKind {
    Sip,
    Lumpsum,
}

macro_rules! lowercase_display {
    ($ty:ty { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($s => Ok(Self::$variant),)+
                    other => Err(format!("unsupported value '{}'", other)),
                }
            }
        }
    };
}

lowercase_display!(BudgetPeriod { Weekly => "weekly", Monthly => "monthly" });
lowercase_display!(PaymentFrequency {
    Once => "once",
    Weekly => "weekly",
    Monthly => "monthly",
    Quarterly => "quarterly",
    Yearly => "yearly",
});
lowercase_display!(InvestmentKind { Sip => "sip", Lumpsum => "lumpsum" });

/// Validated, strictly typed arguments for one action. Decoded once by the
/// tool-call interpreter; nothing downstream looks at raw JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum ActionParameters {
    UpsertBudget {
        category: String,
        limit: f64,
        period: BudgetPeriod,
    },
    CreateGoal {
        name: String,
        target_amount: f64,
        deadline: NaiveDate,
    },
    AddDebt {
        name: String,
        principal: f64,
        /// Annual interest rate, percent
        rate: f64,
        emi: Option<f64>,
        start_date: NaiveDate,
        tenure_months: Option<u32>,
    },
    SchedulePayment {
        name: String,
        amount: f64,
        frequency: PaymentFrequency,
        next_due: NaiveDate,
        auto_track: bool,
    },
    AnalyzeInvestment {
        kind: InvestmentKind,
        amount: f64,
        /// Expected annual return, percent
        annual_rate: f64,
        years: u32,
    },
}

impl ActionParameters {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionParameters::UpsertBudget { .. } => ActionType::UpsertBudget,
            ActionParameters::CreateGoal { .. } => ActionType::CreateGoal,
            ActionParameters::AddDebt { .. } => ActionType::AddDebt,
            ActionParameters::SchedulePayment { .. } => ActionType::SchedulePayment,
            ActionParameters::AnalyzeInvestment { .. } => ActionType::AnalyzeInvestment,
        }
    }

    /// One-line preview shown to the user before confirmation
    pub fn summary(&self) -> String {
        match self {
            ActionParameters::UpsertBudget {
                category,
                limit,
                period,
            } => format!("Set a {} budget of {} for {}", period, format_inr(*limit), category),
            ActionParameters::CreateGoal {
                name,
                target_amount,
                deadline,
            } => format!(
                "Create goal '{}' to save {} by {}",
                name,
                format_inr(*target_amount),
                deadline
            ),
            ActionParameters::AddDebt {
                name,
                principal,
                rate,
                ..
            } => format!(
                "Track debt '{}' of {} at {}% interest",
                name,
                format_inr(*principal),
                rate
            ),
            ActionParameters::SchedulePayment {
                name,
                amount,
                frequency,
                next_due,
                ..
            } => format!(
                "Schedule '{}' payment of {} ({}) starting {}",
                name,
                format_inr(*amount),
                frequency,
                next_due
            ),
            ActionParameters::AnalyzeInvestment {
                kind,
                amount,
                annual_rate,
                years,
            } => format!(
                "Project a {} of {} at {}% for {} years",
                kind.as_str().to_uppercase(),
                format_inr(*amount),
                annual_rate,
                years
            ),
        }
    }
}

/// Output of the tool-call interpreter; input to `ActionStateMachine::create`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposedAction {
    pub action_type: ActionType,
    pub parameters: ActionParameters,
}

impl ProposedAction {
    pub fn new(parameters: ActionParameters) -> Self {
        Self {
            action_type: parameters.action_type(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Proposed,
    Confirmed,
    Executed,
    Failed,
    Cancelled,
    Expired,
}

lowercase_display!(ActionStatus {
    Proposed => "proposed",
    Confirmed => "confirmed",
    Executed => "executed",
    Failed => "failed",
    Cancelled => "cancelled",
    Expired => "expired",
});

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::Executed
                | ActionStatus::Failed
                | ActionStatus::Cancelled
                | ActionStatus::Expired
        )
    }

    /// Forward-only lifecycle
    pub fn can_transition_to(self, next: ActionStatus) -> bool {
        matches!(
            (self, next),
            (ActionStatus::Proposed, ActionStatus::Confirmed)
                | (ActionStatus::Proposed, ActionStatus::Cancelled)
                | (ActionStatus::Proposed, ActionStatus::Expired)
                | (ActionStatus::Confirmed, ActionStatus::Executed)
                | (ActionStatus::Confirmed, ActionStatus::Failed)
        )
    }
}

/// The only durable entity of the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentAction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action_type: ActionType,
    pub parameters: ActionParameters,
    pub status: ActionStatus,
    pub result_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>,
}

impl AgentAction {
    pub fn proposed(user_id: Uuid, proposal: ProposedAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            action_type: proposal.action_type,
            parameters: proposal.parameters,
            status: ActionStatus::Proposed,
            result_message: None,
            created_at: Utc::now(),
            confirmed_at: None,
            executed_at: None,
            related_entity_id: None,
            related_entity_type: None,
        }
    }

    pub fn summary(&self) -> String {
        self.parameters.summary()
    }
}

/// Result reported by a collaborator for one executed action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub message: String,
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>,
}

//
// ================= Caller-facing results =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub turn_id: Uuid,
    pub answer_text: String,
    pub provider_trail: Vec<ProviderAttempt>,
    pub decision: RoutingDecision,
    pub proposed_action: Option<AgentAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmOutcome {
    pub action_id: Uuid,
    pub status: ActionStatus,
    pub result_message: Option<String>,
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>,
}

impl From<&AgentAction> for ConfirmOutcome {
    fn from(action: &AgentAction) -> Self {
        Self {
            action_id: action.id,
            status: action.status,
            result_message: action.result_message.clone(),
            related_entity_id: action.related_entity_id.clone(),
            related_entity_type: action.related_entity_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub action_id: Uuid,
    pub status: ActionStatus,
}

/// Rupee amount without trailing zero decimals
pub fn format_inr(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("₹{:.0}", amount)
    } else {
        format!("₹{:.2}", amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_round_trips_through_name() {
        for t in ActionType::ALL {
            assert_eq!(t.as_str().parse::<ActionType>().unwrap(), t);
        }
        assert!("transfer_funds".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_lifecycle_is_forward_only() {
        use ActionStatus::*;
        assert!(Proposed.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Executed));
        assert!(!Executed.can_transition_to(Proposed));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Proposed.can_transition_to(Executed));
        for s in [Executed, Failed, Cancelled, Expired] {
            assert!(s.is_terminal());
            assert!(!s.can_transition_to(Confirmed));
        }
    }

    #[test]
    fn test_parameters_serialize_with_action_tag() {
        let params = ActionParameters::UpsertBudget {
            category: "groceries".to_string(),
            limit: 5000.0,
            period: BudgetPeriod::Monthly,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["action_type"], "upsert_budget");
        assert_eq!(json["period"], "monthly");

        let back: ActionParameters = serde_json::from_value(json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn test_summary_formats_rupees() {
        let params = ActionParameters::SchedulePayment {
            name: "Rent".to_string(),
            amount: 15000.0,
            frequency: PaymentFrequency::Monthly,
            next_due: NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
            auto_track: true,
        };
        assert_eq!(
            params.summary(),
            "Schedule 'Rent' payment of ₹15000 (monthly) starting 2026-11-01"
        );
        assert_eq!(format_inr(99.5), "₹99.50");
    }
}
