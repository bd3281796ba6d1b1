//! Process configuration
//!
//! Read once from the environment at startup (binaries load `.env` first).
//! Anything not configured is left out: a provider without an endpoint or
//! key is skipped, a missing database means an in-memory action store, a
//! missing finance service URL means the in-process ledger.

use crate::error::AssistantError;
use crate::execution::{Collaborators, FinanceApiClient, InMemoryLedger};
use crate::providers::{GeminiProvider, ProviderClient, RetrievalProvider};
use crate::router::{FailureSignatures, FallbackChains, ProviderRouter};
use crate::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const FAST_PROVIDER: &str = "fast";
pub const CONVERSATIONAL_PROVIDER: &str = "conversational";
pub const FALLBACK_PROVIDER: &str = "fallback";
pub const GROUNDED_PROVIDER: &str = "grounded";
pub const REGIONAL_GROUNDED_PROVIDER: &str = "regional_grounded";

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub port: u16,

    pub gemini_api_key: Option<String>,
    pub gemini_base_url: Option<String>,
    pub fast_model: String,
    pub conversational_model: String,
    pub fallback_model: String,

    pub grounded_api_url: Option<String>,
    pub regional_grounded_api_url: Option<String>,
    pub grounded_api_key: Option<String>,

    pub finance_api_base_url: Option<String>,
    pub database_url: Option<String>,

    pub provider_timeout: Duration,
    pub execution_timeout: Duration,
    pub confirmation_window: Duration,
    pub expiry_sweep_interval: Duration,
    pub failure_signatures_path: Option<PathBuf>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            gemini_api_key: None,
            gemini_base_url: None,
            fast_model: "gemini-2.0-flash-lite".to_string(),
            conversational_model: "gemini-2.0-flash".to_string(),
            fallback_model: "gemini-1.5-pro".to_string(),
            grounded_api_url: None,
            regional_grounded_api_url: None,
            grounded_api_key: None,
            finance_api_base_url: None,
            database_url: None,
            provider_timeout: Duration::from_millis(20_000),
            execution_timeout: Duration::from_millis(15_000),
            confirmation_window: Duration::from_secs(600),
            expiry_sweep_interval: Duration::from_secs(60),
            failure_signatures_path: None,
        }
    }
}

impl AssistantConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                AssistantError::Config(format!("PORT must be a valid port number, got '{}'", raw))
            })?,
            None => defaults.port,
        };

        let millis = |key: &str, default: Duration| -> Result<Duration> {
            match get(key) {
                Some(raw) => raw.parse::<u64>().map(Duration::from_millis).map_err(|_| {
                    AssistantError::Config(format!("{} must be a whole number, got '{}'", key, raw))
                }),
                None => Ok(default),
            }
        };
        let secs = |key: &str, default: Duration| -> Result<Duration> {
            match get(key) {
                Some(raw) => raw.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                    AssistantError::Config(format!("{} must be a whole number, got '{}'", key, raw))
                }),
                None => Ok(default),
            }
        };

        Ok(Self {
            port,
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_base_url: get("GEMINI_BASE_URL"),
            fast_model: get("FAST_MODEL").unwrap_or(defaults.fast_model),
            conversational_model: get("CONVERSATIONAL_MODEL")
                .unwrap_or(defaults.conversational_model),
            fallback_model: get("FALLBACK_MODEL").unwrap_or(defaults.fallback_model),
            grounded_api_url: get("GROUNDED_API_URL"),
            regional_grounded_api_url: get("REGIONAL_GROUNDED_API_URL"),
            grounded_api_key: get("GROUNDED_API_KEY"),
            finance_api_base_url: get("FINANCE_API_BASE_URL"),
            database_url: get("DATABASE_URL").or_else(|| get("POSTGRES_URL")),
            provider_timeout: millis("PROVIDER_TIMEOUT_MS", defaults.provider_timeout)?,
            execution_timeout: millis("EXECUTION_TIMEOUT_MS", defaults.execution_timeout)?,
            confirmation_window: secs("CONFIRMATION_WINDOW_SECS", defaults.confirmation_window)?,
            expiry_sweep_interval: secs("EXPIRY_SWEEP_SECS", defaults.expiry_sweep_interval)?,
            failure_signatures_path: get("FAILURE_SIGNATURES_PATH").map(PathBuf::from),
        })
    }

    pub fn failure_signatures(&self) -> Result<FailureSignatures> {
        match &self.failure_signatures_path {
            Some(path) => {
                let signatures = FailureSignatures::load(path)?;
                info!(path = %path.display(), "Loaded failure signatures");
                Ok(signatures)
            }
            None => Ok(FailureSignatures::default()),
        }
    }

    /// Configured providers and the chains that reference them
    pub fn providers(&self) -> (Vec<Arc<dyn ProviderClient>>, FallbackChains) {
        let mut providers: Vec<Arc<dyn ProviderClient>> = Vec::new();
        let mut chains = FallbackChains::default();

        match &self.gemini_api_key {
            Some(key) => {
                for (id, model) in [
                    (FAST_PROVIDER, &self.fast_model),
                    (CONVERSATIONAL_PROVIDER, &self.conversational_model),
                    (FALLBACK_PROVIDER, &self.fallback_model),
                ] {
                    let mut provider = GeminiProvider::new(id, key.clone(), model.clone());
                    if let Some(base) = &self.gemini_base_url {
                        provider = provider.with_base_url(base.clone());
                    }
                    providers.push(Arc::new(provider));
                    chains.conversational.push(id.to_string());
                }
            }
            None => warn!("GEMINI_API_KEY not set; conversational providers skipped"),
        }

        match &self.grounded_api_url {
            Some(url) => {
                providers.push(Arc::new(
                    RetrievalProvider::new(GROUNDED_PROVIDER, url.clone())
                        .with_api_key(self.grounded_api_key.clone()),
                ));
                chains.grounded.push(GROUNDED_PROVIDER.to_string());
            }
            None => warn!("GROUNDED_API_URL not set; grounded retrieval provider skipped"),
        }

        match &self.regional_grounded_api_url {
            Some(url) => {
                providers.push(Arc::new(
                    RetrievalProvider::new(REGIONAL_GROUNDED_PROVIDER, url.clone())
                        .with_api_key(self.grounded_api_key.clone()),
                ));
                chains
                    .regional_grounded
                    .push(REGIONAL_GROUNDED_PROVIDER.to_string());
            }
            None => warn!("REGIONAL_GROUNDED_API_URL not set; regional provider skipped"),
        }

        // Generative models are the last resort of the grounded path
        if !chains.grounded.is_empty() || !chains.regional_grounded.is_empty() {
            chains.grounded.extend(
                chains
                    .conversational
                    .iter()
                    .filter(|id| id.as_str() != FAST_PROVIDER)
                    .cloned()
                    .collect::<Vec<_>>(),
            );
        }

        (providers, chains)
    }

    pub fn build_router(&self) -> Result<ProviderRouter> {
        let (providers, chains) = self.providers();
        ProviderRouter::new(providers, chains, self.failure_signatures()?)
    }

    pub fn collaborators(&self) -> Collaborators {
        match &self.finance_api_base_url {
            Some(url) => {
                info!("Finance collaborators: {}", url);
                Collaborators::remote(Arc::new(FinanceApiClient::new(
                    url.clone(),
                    self.execution_timeout,
                )))
            }
            None => {
                warn!("FINANCE_API_BASE_URL not set; using the in-memory ledger");
                Collaborators::in_memory(Arc::new(InMemoryLedger::new()))
            }
        }
    }
}
