//! Assistant facade
//!
//! One turn:
//! QUERY → CLASSIFY → ROUTE (cascade) → [actionable] INTERPRET → PROPOSE
//!
//! and, in a later request, CONFIRM → EXECUTE or CANCEL.
//!
//! A query that is both grounded and actionable runs the grounded path and
//! the tool-call path concurrently; the grounded answer is shown and the
//! tool-call response supplies the action preview.

use crate::actions::{build_action_store, ActionStateMachine};
use crate::audit::{AuditLog, RouteRecord};
use crate::classifier::IntentClassifier;
use crate::config::AssistantConfig;
use crate::error::AssistantError;
use crate::execution::ActionExecutor;
use crate::interpreter::ToolCallInterpreter;
use crate::models::{
    AgentAction, CancelOutcome, ConfirmOutcome, ProviderAttempt, QueryResponse, RoutingDecision,
};
use crate::providers::ProviderContext;
use crate::router::{ProviderRouter, RoutePath, RoutedResponse};
use crate::Result;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of the routing step of one turn
struct RoutedTurn {
    answer_text: String,
    answered_by: String,
    /// Response of the tool-call path, when it ran and succeeded
    tool_response: Option<String>,
    trail: Vec<ProviderAttempt>,
}

pub struct Assistant {
    router: Arc<ProviderRouter>,
    actions: Arc<ActionStateMachine>,
    audit: AuditLog,
    provider_timeout: Duration,
}

impl Assistant {
    pub fn new(
        router: Arc<ProviderRouter>,
        actions: Arc<ActionStateMachine>,
        audit: AuditLog,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            router,
            actions,
            audit,
            provider_timeout,
        }
    }

    /// Wire every component from configuration
    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        let router = Arc::new(config.build_router()?);
        let store = build_action_store(config.database_url.as_deref());
        let executor = Arc::new(ActionExecutor::new(config.collaborators()));
        let actions = Arc::new(ActionStateMachine::new(
            store,
            executor,
            config.confirmation_window,
            config.execution_timeout,
        ));

        Ok(Self::new(router, actions, AuditLog::new(), config.provider_timeout))
    }

    pub fn actions(&self) -> &Arc<ActionStateMachine> {
        &self.actions
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    // =============================
    // Query
    // =============================

    pub async fn route_and_maybe_propose(&self, user_id: Uuid, text: &str) -> Result<QueryResponse> {
        self.route_and_maybe_propose_at(user_id, text, Utc::now().date_naive())
            .await
    }

    /// Same as `route_and_maybe_propose` with an explicit "today" for date
    /// resolution and validation
    pub async fn route_and_maybe_propose_at(
        &self,
        user_id: Uuid,
        text: &str,
        today: NaiveDate,
    ) -> Result<QueryResponse> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AssistantError::validation("text", "must not be empty"));
        }

        let turn_id = Uuid::new_v4();
        let decision = IntentClassifier::classify(text);

        info!(
            turn_id = %turn_id,
            language = decision.language.code(),
            grounded = decision.use_grounded_retrieval,
            actionable = decision.is_actionable,
            action_hint = ?decision.action_hint,
            reason = %decision.reason,
            "Query classified"
        );

        let routed = match self.route_turn(&decision, text, today).await {
            Ok(routed) => routed,
            Err(AssistantError::ChainExhausted { trail }) => {
                self.record(turn_id, user_id, &decision, trail.clone(), None, None)
                    .await?;
                return Err(AssistantError::ChainExhausted { trail });
            }
            Err(e) => return Err(e),
        };

        let proposal = match &routed.tool_response {
            Some(response) => match ToolCallInterpreter::interpret_at(response, &decision, today) {
                Ok(proposal) => proposal,
                Err(e) => {
                    warn!(turn_id = %turn_id, error = %e, "Rejected malformed action proposal");
                    self.record(
                        turn_id,
                        user_id,
                        &decision,
                        routed.trail,
                        Some(routed.answered_by),
                        None,
                    )
                    .await?;
                    return Err(e);
                }
            },
            None => None,
        };

        let proposed_action = match proposal {
            Some(proposal) => Some(self.actions.create(user_id, proposal).await?),
            None => None,
        };

        let answer_text = match (&proposed_action, routed.answer_text.is_empty()) {
            (Some(action), true) => format!("{}. Please confirm to go ahead.", action.summary()),
            _ => routed.answer_text,
        };

        self.record(
            turn_id,
            user_id,
            &decision,
            routed.trail.clone(),
            Some(routed.answered_by),
            proposed_action.as_ref().map(|a| a.id),
        )
        .await?;

        Ok(QueryResponse {
            turn_id,
            answer_text,
            provider_trail: routed.trail.into_iter().map(ProviderAttempt::redacted).collect(),
            decision,
            proposed_action,
        })
    }

    async fn route_turn(
        &self,
        decision: &RoutingDecision,
        text: &str,
        today: NaiveDate,
    ) -> Result<RoutedTurn> {
        let mut context = ProviderContext::new();
        context.insert("language".to_string(), decision.language.code().to_string());
        context.insert("today".to_string(), today.to_string());

        let timeout = self.provider_timeout;
        let language = decision.language;

        if !decision.is_actionable {
            let routed = self.router.route(decision, text, &context, timeout).await?;
            return Ok(RoutedTurn {
                answer_text: routed.text,
                answered_by: routed.provider_id,
                tool_response: None,
                trail: routed.trail,
            });
        }

        let tool_prompt = ToolCallInterpreter::tool_prompt(text, decision.action_hint, today);

        if !decision.use_grounded_retrieval {
            let routed = self
                .router
                .route_path(RoutePath::Conversational, language, &tool_prompt, &context, timeout)
                .await?;
            return Ok(tool_turn(routed));
        }

        let (grounded, tool) = tokio::join!(
            self.router
                .route_path(RoutePath::Grounded, language, text, &context, timeout),
            self.router
                .route_path(RoutePath::Conversational, language, &tool_prompt, &context, timeout),
        );

        match (grounded, tool) {
            (Ok(grounded), Ok(tool)) => Ok(RoutedTurn {
                answer_text: grounded.text,
                answered_by: grounded.provider_id,
                tool_response: Some(tool.text),
                trail: concat(grounded.trail, tool.trail),
            }),
            (Ok(grounded), Err(e)) => {
                debug!(error = %e, "Tool-call path exhausted; answering without a proposal");
                Ok(RoutedTurn {
                    answer_text: grounded.text,
                    answered_by: grounded.provider_id,
                    tool_response: None,
                    trail: concat(grounded.trail, exhausted_trail(e)?),
                })
            }
            (Err(e), Ok(tool)) => {
                debug!(error = %e, "Grounded path exhausted; answering from the tool-call path");
                let grounded_trail = exhausted_trail(e)?;
                let mut turn = tool_turn(tool);
                turn.trail = concat(grounded_trail, turn.trail);
                Ok(turn)
            }
            (Err(a), Err(b)) => Err(AssistantError::ChainExhausted {
                trail: concat(exhausted_trail(a)?, exhausted_trail(b)?),
            }),
        }
    }

    async fn record(
        &self,
        turn_id: Uuid,
        user_id: Uuid,
        decision: &RoutingDecision,
        trail: Vec<ProviderAttempt>,
        answered_by: Option<String>,
        proposed_action_id: Option<Uuid>,
    ) -> Result<()> {
        self.audit
            .record(RouteRecord::new(
                turn_id,
                user_id,
                decision.clone(),
                trail,
                answered_by,
                proposed_action_id,
            ))
            .await?;
        Ok(())
    }

    // =============================
    // Action lifecycle
    // =============================

    pub async fn confirm_action(&self, user_id: Uuid, action_id: Uuid) -> Result<ConfirmOutcome> {
        let action = self.actions.confirm(user_id, action_id).await?;
        Ok(ConfirmOutcome::from(&action))
    }

    pub async fn cancel_action(&self, user_id: Uuid, action_id: Uuid) -> Result<CancelOutcome> {
        let action = self.actions.cancel(user_id, action_id).await?;
        Ok(CancelOutcome {
            action_id: action.id,
            status: action.status,
        })
    }

    pub async fn list_actions(&self, user_id: Uuid) -> Result<Vec<AgentAction>> {
        self.actions.list_for_user(user_id).await
    }
}

/// Answer from the tool-call path: the prose around the envelope
fn tool_turn(routed: RoutedResponse) -> RoutedTurn {
    RoutedTurn {
        answer_text: ToolCallInterpreter::strip_envelope(&routed.text),
        answered_by: routed.provider_id,
        tool_response: Some(routed.text),
        trail: routed.trail,
    }
}

fn exhausted_trail(err: AssistantError) -> Result<Vec<ProviderAttempt>> {
    match err {
        AssistantError::ChainExhausted { trail } => Ok(trail),
        other => Err(other),
    }
}

fn concat(mut first: Vec<ProviderAttempt>, second: Vec<ProviderAttempt>) -> Vec<ProviderAttempt> {
    first.extend(second);
    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::InMemoryActionStore;
    use crate::execution::{Collaborators, InMemoryLedger};
    use crate::models::{
        ActionParameters, ActionStatus, ActionType, AttemptOutcome, PaymentFrequency,
    };
    use crate::providers::{ProviderClient, ScriptedProvider, ScriptedReply};
    use crate::router::{FailureSignatures, FallbackChains};
    use chrono::{Datelike, Months};

    const RENT_QUERY: &str = "Schedule my rent payment of ₹15000 on the 1st of every month";

    struct Harness {
        assistant: Assistant,
        ledger: Arc<InMemoryLedger>,
        fast: Arc<ScriptedProvider>,
        conversational: Arc<ScriptedProvider>,
        grounded: Arc<ScriptedProvider>,
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    fn next_first(today: NaiveDate) -> NaiveDate {
        today.with_day(1).unwrap() + Months::new(1)
    }

    fn rent_envelope() -> String {
        format!(
            "I'll schedule your rent.\n```json\n{}\n```",
            serde_json::json!({
                "action": "schedule_payment",
                "arguments": {
                    "name": "Rent",
                    "amount": 15000,
                    "frequency": "monthly",
                    "next_due": next_first(today()).to_string(),
                }
            })
        )
    }

    fn harness(fast: Vec<ScriptedReply>, conversational: Vec<ScriptedReply>, grounded: Vec<ScriptedReply>) -> Harness {
        let fast = Arc::new(ScriptedProvider::new("fast", fast));
        let conversational = Arc::new(ScriptedProvider::new("conversational", conversational));
        let grounded = Arc::new(ScriptedProvider::new("grounded", grounded));

        let providers: Vec<Arc<dyn ProviderClient>> =
            vec![fast.clone(), conversational.clone(), grounded.clone()];
        let chains = FallbackChains {
            regional_grounded: vec![],
            grounded: vec!["grounded".to_string(), "conversational".to_string()],
            conversational: vec!["fast".to_string(), "conversational".to_string()],
        };
        let router = Arc::new(
            ProviderRouter::new(providers, chains, FailureSignatures::default()).unwrap(),
        );

        let ledger = Arc::new(InMemoryLedger::new());
        let executor = Arc::new(ActionExecutor::new(Collaborators::in_memory(ledger.clone())));
        let actions = Arc::new(ActionStateMachine::new(
            Arc::new(InMemoryActionStore::new()),
            executor,
            Duration::from_secs(600),
            Duration::from_secs(5),
        ));

        Harness {
            assistant: Assistant::new(router, actions, AuditLog::new(), Duration::from_millis(200)),
            ledger,
            fast,
            conversational,
            grounded,
        }
    }

    #[tokio::test]
    async fn test_rent_scenario_end_to_end() {
        let h = harness(
            vec![ScriptedReply::text(rent_envelope())],
            vec![ScriptedReply::text("unused")],
            vec![ScriptedReply::text("unused")],
        );
        let user = Uuid::new_v4();

        let response = h
            .assistant
            .route_and_maybe_propose_at(user, RENT_QUERY, today())
            .await
            .unwrap();

        assert!(response.decision.is_actionable);
        assert_eq!(response.answer_text, "I'll schedule your rent.");
        assert_eq!(response.provider_trail.len(), 1);
        assert!(!serde_json::to_string(&response).unwrap().contains("```json"));

        let proposed = response.proposed_action.expect("rent proposal");
        assert_eq!(proposed.status, ActionStatus::Proposed);
        assert_eq!(proposed.action_type, ActionType::SchedulePayment);
        match &proposed.parameters {
            ActionParameters::SchedulePayment {
                amount,
                frequency,
                next_due,
                ..
            } => {
                assert_eq!(*amount, 15000.0);
                assert_eq!(*frequency, PaymentFrequency::Monthly);
                assert_eq!(*next_due, NaiveDate::from_ymd_opt(2026, 11, 1).unwrap());
            }
            other => panic!("unexpected parameters {:?}", other),
        }
        assert_eq!(h.ledger.calls(), 0);

        let outcome = h.assistant.confirm_action(user, proposed.id).await.unwrap();
        assert_eq!(outcome.status, ActionStatus::Executed);
        assert_eq!(outcome.related_entity_type.as_deref(), Some("scheduled_payment"));
        assert!(outcome.related_entity_id.is_some());
        assert_eq!(h.ledger.payments(user).await.len(), 1);
        assert_eq!(h.ledger.calls(), 1);

        // The tool prompt carried the resolved date context
        let prompts = h.fast.prompts().await;
        assert!(prompts[0].contains("Today is 2026-10-18"));
        assert!(prompts[0].contains(RENT_QUERY));
    }

    #[tokio::test]
    async fn test_plain_question_cascades_past_refusal() {
        let h = harness(
            vec![ScriptedReply::text("I'm sorry, but I can't help with that.")],
            vec![ScriptedReply::text("Keep three to six months of expenses aside.")],
            vec![],
        );
        let user = Uuid::new_v4();

        let response = h
            .assistant
            .route_and_maybe_propose(user, "how big should my emergency fund be")
            .await
            .unwrap();

        assert_eq!(response.answer_text, "Keep three to six months of expenses aside.");
        assert!(response.proposed_action.is_none());
        let outcomes: Vec<AttemptOutcome> =
            response.provider_trail.iter().map(|a| a.outcome).collect();
        assert_eq!(outcomes, vec![AttemptOutcome::FailurePattern, AttemptOutcome::Success]);

        let record = h.assistant.audit().get(response.turn_id).await.unwrap().unwrap();
        assert_eq!(record.answered_by.as_deref(), Some("conversational"));

        // The refusal stays in the audit trail and never reaches the caller
        assert!(response.provider_trail.iter().all(|a| a.response_text.is_none()));
        let body = serde_json::to_string(&response).unwrap();
        assert!(!body.contains("I'm sorry"));
        assert_eq!(
            record.trail[0].response_text.as_deref(),
            Some("I'm sorry, but I can't help with that.")
        );
    }

    #[tokio::test]
    async fn test_grounded_and_actionable_runs_both_paths() {
        let budget_envelope = r#"Setting that up. {"action": "upsert_budget", "arguments": {"category": "MUDRA loan", "limit": 5000, "period": "monthly"}}"#;
        let h = harness(
            vec![ScriptedReply::text(budget_envelope)],
            vec![ScriptedReply::text("unused")],
            vec![ScriptedReply::text("Shishu loans under MUDRA go up to ₹50,000.")],
        );
        let user = Uuid::new_v4();

        let response = h
            .assistant
            .route_and_maybe_propose_at(
                user,
                "what MUDRA loan amount should I budget and set a ₹5000 budget for it",
                today(),
            )
            .await
            .unwrap();

        assert!(response.decision.use_grounded_retrieval);
        assert_eq!(response.answer_text, "Shishu loans under MUDRA go up to ₹50,000.");
        let action = response.proposed_action.unwrap();
        assert_eq!(action.action_type, ActionType::UpsertBudget);

        let providers: Vec<&str> = response
            .provider_trail
            .iter()
            .map(|a| a.provider_id.as_str())
            .collect();
        assert_eq!(providers, vec!["grounded", "fast"]);
        assert_eq!(h.grounded.calls(), 1);
        assert_eq!(h.conversational.calls(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_generic_and_audited() {
        let h = harness(
            vec![ScriptedReply::Transport],
            vec![ScriptedReply::Hang],
            vec![],
        );
        let user = Uuid::new_v4();

        let err = h
            .assistant
            .route_and_maybe_propose(user, "tell me something about saving money")
            .await
            .unwrap_err();

        match &err {
            AssistantError::ChainExhausted { trail } => {
                assert_eq!(trail.len(), 2);
                assert_eq!(trail[1].outcome, AttemptOutcome::Timeout);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!err.user_message().contains("connection refused"));

        let records = h.assistant.audit().list_for_user(user).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].answered_by.is_none());
    }

    #[tokio::test]
    async fn test_malformed_proposal_is_rejected_and_not_persisted() {
        let bad = r#"```json
{"action": "schedule_payment", "arguments": {"name": "Rent", "amount": "lots", "frequency": "monthly", "next_due": "2026-11-01"}}
```"#;
        let h = harness(vec![ScriptedReply::text(bad)], vec![], vec![]);
        let user = Uuid::new_v4();

        let err = h
            .assistant
            .route_and_maybe_propose_at(user, RENT_QUERY, today())
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::Validation { ref field, .. } if field == "amount"));
        assert!(h.assistant.list_actions(user).await.unwrap().is_empty());
        assert_eq!(h.assistant.audit().list_for_user(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_envelope_only_reply_gets_summary_answer() {
        let envelope_only = serde_json::json!({
            "action": "schedule_payment",
            "arguments": {
                "name": "Rent", "amount": 15000, "frequency": "monthly", "next_due": "2026-11-01"
            }
        })
        .to_string();
        let h = harness(vec![ScriptedReply::text(envelope_only)], vec![], vec![]);

        let response = h
            .assistant
            .route_and_maybe_propose_at(Uuid::new_v4(), RENT_QUERY, today())
            .await
            .unwrap();
        assert_eq!(
            response.answer_text,
            "Schedule 'Rent' payment of ₹15000 (monthly) starting 2026-11-01. Please confirm to go ahead."
        );
    }

    #[tokio::test]
    async fn test_cancel_then_confirm_through_facade() {
        let h = harness(vec![ScriptedReply::text(rent_envelope())], vec![], vec![]);
        let user = Uuid::new_v4();

        let response = h
            .assistant
            .route_and_maybe_propose_at(user, RENT_QUERY, today())
            .await
            .unwrap();
        let action_id = response.proposed_action.unwrap().id;

        let cancelled = h.assistant.cancel_action(user, action_id).await.unwrap();
        assert_eq!(cancelled.status, ActionStatus::Cancelled);

        let err = h.assistant.confirm_action(user, action_id).await.unwrap_err();
        assert_eq!(err.user_message(), "This action was cancelled.");
        assert_eq!(h.ledger.calls(), 0);

        let listed = h.assistant.list_actions(user).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, ActionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_empty_query_is_validation_error() {
        let h = harness(vec![], vec![], vec![]);
        let err = h
            .assistant
            .route_and_maybe_propose(Uuid::new_v4(), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::Validation { ref field, .. } if field == "text"));
    }
}
