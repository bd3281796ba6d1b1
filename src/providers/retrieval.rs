//! Grounded retrieval client
//!
//! Talks to a retrieval-augmented answer service over JSON:
//! `POST {base}/retrieve {query, language, context}` → `{answer, sources?}`.
//! The same client serves the base-language and the regional (Indic) service;
//! only the base URL and id differ.

use super::{ProviderClient, ProviderContext, ProviderError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct RetrievalProvider {
    id: String,
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RetrievalProvider {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            id: id.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }
}

#[derive(Debug, Serialize)]
struct RetrieveRequest<'a> {
    query: &'a str,
    language: &'a str,
    context: &'a ProviderContext,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    answer: String,
    #[serde(default)]
    sources: Vec<String>,
}

#[async_trait]
impl ProviderClient for RetrievalProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(
        &self,
        prompt: &str,
        context: &ProviderContext,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/retrieve", self.base_url);
        let language = context.get("language").map(String::as_str).unwrap_or("en");

        let mut request = self
            .client
            .post(url)
            .timeout(timeout)
            .json(&RetrieveRequest {
                query: prompt,
                language,
                context,
            });

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let body: RetrieveResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        debug!(
            provider = %self.id,
            sources = body.sources.len(),
            "Retrieval response received"
        );

        Ok(body.answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_retrieve_sends_language_and_reads_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/retrieve"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({ "query": "MUDRA limits", "language": "hi" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "answer": "Shishu loans go up to ₹50,000.",
                "sources": ["mudra.org.in"]
            })))
            .mount(&server)
            .await;

        let provider = RetrievalProvider::new("regional_grounded", server.uri())
            .with_api_key(Some("secret".to_string()));
        let mut context = ProviderContext::new();
        context.insert("language".to_string(), "hi".to_string());

        let answer = provider
            .complete("MUDRA limits", &context, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(answer, "Shishu loans go up to ₹50,000.");
    }

    #[tokio::test]
    async fn test_server_error_is_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/retrieve"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let provider = RetrievalProvider::new("grounded", server.uri());
        let err = provider
            .complete("repo rate", &ProviderContext::new(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Upstream { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        // Nothing listens on port 9 (discard) in the test environment
        let provider = RetrievalProvider::new("grounded", "http://127.0.0.1:9");
        let err = provider
            .complete("repo rate", &ProviderContext::new(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Transport(_) | ProviderError::Timeout(_)
        ));
    }
}
