//! Error types for the assistant core

use crate::models::{ActionStatus, ProviderAttempt};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, AssistantError>;

#[derive(Error, Debug)]
pub enum AssistantError {

    // =============================
    // Routing
    // =============================

    /// Every candidate in the fallback chain failed. The trail is kept for
    /// auditing; callers only ever see `user_message()`.
    #[error("All providers in the fallback chain failed ({} attempts)", trail.len())]
    ChainExhausted { trail: Vec<ProviderAttempt> },

    // =============================
    // Action proposals
    // =============================

    #[error("Invalid action argument '{field}': {reason}")]
    Validation { field: String, reason: String },

    // =============================
    // Action lifecycle
    // =============================

    #[error("Action not found: {0}")]
    NotFound(Uuid),

    #[error("Action {id} is {status} and cannot be changed")]
    InvalidState { id: Uuid, status: ActionStatus },

    #[error("Action {0} expired before it was confirmed")]
    Expired(Uuid),

    #[error("Execution error: {0}")]
    Execution(String),

    // =============================
    // Infrastructure
    // =============================

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Finance service error: {0}")]
    Collaborator(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AssistantError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Message safe to show to an end user. Never contains vendor error text
    /// or infrastructure detail.
    pub fn user_message(&self) -> String {
        match self {
            Self::ChainExhausted { .. } => {
                "The assistant is unavailable right now. Please try again in a moment.".to_string()
            }
            Self::Validation { field, reason } => {
                format!("I couldn't prepare that action: '{}' {}.", field, reason)
            }
            Self::NotFound(_) => "That action could not be found.".to_string(),
            Self::InvalidState { status, .. } => match status {
                ActionStatus::Executed => "This action already happened.".to_string(),
                ActionStatus::Cancelled => "This action was cancelled.".to_string(),
                ActionStatus::Failed => {
                    "This action already failed. Please ask again to retry.".to_string()
                }
                ActionStatus::Expired => {
                    "This request expired, please ask again.".to_string()
                }
                ActionStatus::Proposed | ActionStatus::Confirmed => {
                    "This action is already being processed.".to_string()
                }
            },
            Self::Expired(_) => "This request expired, please ask again.".to_string(),
            Self::Execution(reason) => format!("The action could not be completed: {}", reason),
            Self::Config(_)
            | Self::Database(_)
            | Self::Collaborator(_)
            | Self::Serialization(_)
            | Self::Http(_)
            | Self::Uuid(_)
            | Self::Io(_) => "Something went wrong on our side. Please try again.".to_string(),
        }
    }

    /// True for errors caused by the request rather than by the service.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::NotFound(_)
                | Self::InvalidState { .. }
                | Self::Expired(_)
                | Self::Execution(_)
        )
    }
}
