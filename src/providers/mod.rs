//! AI provider clients
//!
//! Every backend exposes a single `complete(prompt, context, timeout)` call.
//! Transport-level failures are reported as `ProviderError`, distinct from the
//! response text; judging whether the text is a usable answer is the router's
//! job, not the client's.

use crate::models::AttemptOutcome;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub mod gemini;
pub mod retrieval;
pub mod scripted;

pub use gemini::GeminiProvider;
pub use retrieval::RetrievalProvider;
pub use scripted::{ScriptedProvider, ScriptedReply};

/// Free-form key/value context passed along with a prompt
pub type ProviderContext = BTreeMap<String, String>;

/// Errors raised by a provider call. Never shown to end users.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Provider error {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            ProviderError::Timeout(_) => AttemptOutcome::Timeout,
            _ => AttemptOutcome::TransportError,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(timeout.as_millis() as u64)
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// One AI backend
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Stable identifier used in fallback chains and attempt trails
    fn id(&self) -> &str;

    async fn complete(
        &self,
        prompt: &str,
        context: &ProviderContext,
        timeout: Duration,
    ) -> Result<String, ProviderError>;
}
