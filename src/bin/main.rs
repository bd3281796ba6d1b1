//! Offline walkthrough: scripted providers and the in-memory ledger, no
//! network or database needed.

use chrono::{Datelike, Months, Utc};
use finance_assistant_core::{
    actions::{ActionStateMachine, InMemoryActionStore},
    agent::Assistant,
    audit::AuditLog,
    execution::{ActionExecutor, Collaborators, InMemoryLedger},
    providers::{ProviderClient, ScriptedProvider, ScriptedReply},
    router::{FailureSignatures, FallbackChains, ProviderRouter},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Finance Assistant demo starting");

    let today = Utc::now().date_naive();
    let next_due = today
        .with_day(1)
        .and_then(|d| d.checked_add_months(Months::new(1)))
        .ok_or("could not compute the next due date")?;

    // The fast model times out, the conversational model answers with a tool call
    let fast: Arc<dyn ProviderClient> =
        Arc::new(ScriptedProvider::new("fast", vec![ScriptedReply::Hang]));
    let conversational: Arc<dyn ProviderClient> = Arc::new(ScriptedProvider::new(
        "conversational",
        vec![ScriptedReply::text(format!(
            "Sure, I can set that up for you.\n```json\n{}\n```",
            serde_json::json!({
                "action": "schedule_payment",
                "arguments": {
                    "name": "Rent",
                    "amount": "₹15,000",
                    "frequency": "monthly",
                    "next_due": next_due.to_string(),
                    "auto_track": true
                }
            })
        ))],
    ));

    let chains = FallbackChains {
        conversational: vec!["fast".to_string(), "conversational".to_string()],
        ..FallbackChains::default()
    };
    let router = Arc::new(ProviderRouter::new(
        vec![fast, conversational],
        chains,
        FailureSignatures::default(),
    )?);

    let ledger = Arc::new(InMemoryLedger::new());
    let executor = Arc::new(ActionExecutor::new(Collaborators::in_memory(ledger.clone())));
    let actions = Arc::new(ActionStateMachine::new(
        Arc::new(InMemoryActionStore::new()),
        executor,
        Duration::from_secs(600),
        Duration::from_secs(5),
    ));
    let assistant = Assistant::new(router, actions, AuditLog::new(), Duration::from_millis(200));

    let user_id = Uuid::new_v4();
    let query = "Schedule my rent payment of ₹15000 on the 1st of every month";

    let response = assistant.route_and_maybe_propose(user_id, query).await?;

    println!("\n=== QUERY ===");
    println!("{}", query);
    println!("\n=== ANSWER ===");
    println!("{}", response.answer_text);
    println!("\nProvider trail:");
    for (i, attempt) in response.provider_trail.iter().enumerate() {
        println!(
            "  {}: {} {:?} ({} ms)",
            i + 1,
            attempt.provider_id,
            attempt.outcome,
            attempt.latency_ms
        );
    }

    let Some(proposed) = response.proposed_action else {
        println!("\nNo action proposed.");
        return Ok(());
    };

    println!("\n=== PROPOSED ACTION ===");
    println!("{}", proposed.summary());
    println!("{}", serde_json::to_string_pretty(&proposed.parameters)?);

    let outcome = assistant.confirm_action(user_id, proposed.id).await?;

    println!("\n=== CONFIRMED ===");
    println!("Status: {:?}", outcome.status);
    if let Some(message) = &outcome.result_message {
        println!("{}", message);
    }
    println!("Scheduled payments on record: {}", ledger.payments(user_id).await.len());

    Ok(())
}
