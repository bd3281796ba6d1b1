//! Provider router: cascading fallback
//!
//! A routing decision selects one ordered chain of providers. Candidates are
//! tried strictly one after another:
//! - transport error or timeout → next candidate
//! - text matching a failure signature → next candidate (text is never returned)
//! - acceptable text → stop, return it with the full attempt trail
//!
//! No candidate is retried; one failure is enough to move on, which avoids
//! duplicate calls to paid or rate-limited vendors. When every candidate
//! fails the caller gets `AssistantError::ChainExhausted`, never a vendor
//! error string.
//!
//! Cancellation: `route` holds the in-flight provider future directly.
//! Dropping the `route` future (caller timeout or disconnect) drops the
//! provider call with it, which aborts the underlying HTTP request.

pub mod signatures;

pub use signatures::FailureSignatures;

use crate::error::AssistantError;
use crate::models::{AttemptOutcome, LanguageTag, ProviderAttempt, RoutingDecision};
use crate::providers::{ProviderClient, ProviderContext};
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Which chain a call runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePath {
    Grounded,
    Conversational,
}

impl RoutePath {
    pub fn for_decision(decision: &RoutingDecision) -> Self {
        if decision.use_grounded_retrieval {
            RoutePath::Grounded
        } else {
            RoutePath::Conversational
        }
    }
}

/// Ordered provider ids per path.
///
/// The grounded chain is `regional_grounded` (only for non-base languages)
/// followed by `grounded`; `grounded` normally ends with a conversational
/// provider as last resort.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FallbackChains {
    pub regional_grounded: Vec<String>,
    pub grounded: Vec<String>,
    pub conversational: Vec<String>,
}

/// Successful routed call
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub text: String,
    pub provider_id: String,
    pub trail: Vec<ProviderAttempt>,
}

/// Holds the configured providers and chains. Built once per process and
/// shared behind an `Arc`.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn ProviderClient>>,
    chains: FallbackChains,
    signatures: FailureSignatures,
}

impl ProviderRouter {
    pub fn new(
        providers: Vec<Arc<dyn ProviderClient>>,
        chains: FallbackChains,
        signatures: FailureSignatures,
    ) -> Result<Self> {
        let providers: HashMap<String, Arc<dyn ProviderClient>> = providers
            .into_iter()
            .map(|p| (p.id().to_string(), p))
            .collect();

        let referenced = chains
            .regional_grounded
            .iter()
            .chain(chains.grounded.iter())
            .chain(chains.conversational.iter());

        for id in referenced {
            if !providers.contains_key(id) {
                return Err(AssistantError::Config(format!(
                    "Fallback chain references unknown provider '{}'",
                    id
                )));
            }
        }

        if chains.conversational.is_empty() {
            return Err(AssistantError::Config(
                "Conversational fallback chain is empty".to_string(),
            ));
        }

        info!(
            providers = providers.len(),
            grounded = ?chains.grounded,
            regional = ?chains.regional_grounded,
            conversational = ?chains.conversational,
            "Provider router configured"
        );

        Ok(Self {
            providers,
            chains,
            signatures,
        })
    }

    /// Candidate ids for a path, in call order, without duplicates
    pub fn chain_for(&self, path: RoutePath, language: LanguageTag) -> Vec<&str> {
        let mut chain: Vec<&str> = Vec::new();

        match path {
            RoutePath::Grounded => {
                if !language.is_base() {
                    push_unique(&self.chains.regional_grounded, &mut chain);
                }
                push_unique(&self.chains.grounded, &mut chain);
                // An empty grounded configuration degrades to conversational
                if chain.is_empty() {
                    push_unique(&self.chains.conversational, &mut chain);
                }
            }
            RoutePath::Conversational => push_unique(&self.chains.conversational, &mut chain),
        }

        chain
    }

    /// Route a query on the chain selected by the decision
    pub async fn route(
        &self,
        decision: &RoutingDecision,
        prompt: &str,
        context: &ProviderContext,
        timeout: Duration,
    ) -> Result<RoutedResponse> {
        self.route_path(
            RoutePath::for_decision(decision),
            decision.language,
            prompt,
            context,
            timeout,
        )
        .await
    }

    /// Route on an explicit path. Candidates run sequentially, each bounded
    /// by `timeout`.
    pub async fn route_path(
        &self,
        path: RoutePath,
        language: LanguageTag,
        prompt: &str,
        context: &ProviderContext,
        timeout: Duration,
    ) -> Result<RoutedResponse> {
        let chain = self.chain_for(path, language);
        let mut trail = Vec::with_capacity(chain.len());

        debug!(?path, ?chain, "Routing request");

        for id in chain {
            let Some(provider) = self.providers.get(id) else {
                continue;
            };

            let started_at = Utc::now();
            let start = Instant::now();
            let result = tokio::time::timeout(timeout, provider.complete(prompt, context, timeout)).await;
            let latency_ms = start.elapsed().as_millis() as u64;

            let (outcome, response_text) = match result {
                Err(_) => {
                    warn!(provider = %id, latency_ms, "Provider timed out, cascading");
                    (AttemptOutcome::Timeout, None)
                }
                Ok(Err(e)) => {
                    warn!(provider = %id, latency_ms, error = %e, "Provider call failed, cascading");
                    (e.outcome(), None)
                }
                Ok(Ok(text)) => match self.signatures.matches(id, &text) {
                    Some(signature) => {
                        warn!(provider = %id, latency_ms, signature, "Failure signature matched, cascading");
                        (AttemptOutcome::FailurePattern, Some(text))
                    }
                    None => (AttemptOutcome::Success, Some(text)),
                },
            };

            trail.push(ProviderAttempt {
                provider_id: id.to_string(),
                started_at,
                latency_ms,
                outcome,
                response_text: response_text.clone(),
            });

            if outcome == AttemptOutcome::Success {
                info!(provider = %id, attempts = trail.len(), ?path, "Routed request answered");
                return Ok(RoutedResponse {
                    text: response_text.unwrap_or_default(),
                    provider_id: id.to_string(),
                    trail,
                });
            }
        }

        warn!(?path, attempts = trail.len(), "Fallback chain exhausted");
        Err(AssistantError::ChainExhausted { trail })
    }
}

fn push_unique<'a>(ids: &'a [String], chain: &mut Vec<&'a str>) {
    for id in ids {
        if !chain.contains(&id.as_str()) {
            chain.push(id.as_str());
        }
    }
}
