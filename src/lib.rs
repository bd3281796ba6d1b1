//! Finance Assistant Core
//!
//! The conversational core of a personal-finance assistant:
//! - Classifies each query by intent and script (English, Hindi, Tamil, ...)
//! - Routes it across fallback chains of generative and retrieval providers
//! - Interprets tool-call responses into validated action proposals
//! - Executes a proposal only after explicit user confirmation, exactly once
//! - Audits every routed turn with a tamper-evident provider trail
//!
//! TURN LOOP:
//! QUERY → CLASSIFY → ROUTE → INTERPRET → PROPOSE ⇢ CONFIRM → EXECUTE

pub mod actions;
pub mod agent;
pub mod api;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod execution;
pub mod interpreter;
pub mod language;
pub mod models;
pub mod providers;
pub mod router;

pub use error::{AssistantError, Result};

// Re-export common types
pub use models::*;
pub use agent::Assistant;
pub use classifier::IntentClassifier;
pub use config::AssistantConfig;
pub use interpreter::ToolCallInterpreter;
pub use router::ProviderRouter;
