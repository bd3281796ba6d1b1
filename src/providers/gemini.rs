//! Gemini API client
//!
//! Used for the conversational chain (fast, conversational and fallback
//! models). Uses a long-lived reqwest::Client for connection pooling.

use super::{ProviderClient, ProviderContext, ProviderError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a personal-finance assistant for Indian households.

Guidelines:
- Be accurate, structured and concise
- Answer in the user's language when it is not English
- Use ₹ for amounts
- If the user asks you to perform an action, reply with the action envelope described in the prompt"#;

/// Reusable Gemini client (connection-pooled)
pub struct GeminiProvider {
    id: String,
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    system_prompt: String,
}

impl GeminiProvider {
    pub fn new(id: impl Into<String>, api_key: String, model: impl Into<String>) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            id: id.into(),
            client,
            api_key,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }
}

#[async_trait]
impl ProviderClient for GeminiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(
        &self,
        prompt: &str,
        context: &ProviderContext,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: build_system_prompt(&self.system_prompt, context),
                }],
            },
        };

        debug!(provider = %self.id, model = %self.model, "Calling Gemini API");

        let response = self
            .client
            .post(self.endpoint())
            .timeout(timeout)
            .json(&request)
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

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Gemini parse error: {}", e)))?;

        // A blocked or empty candidate is an empty answer, not a transport
        // failure; the router's failure signatures take it from here.
        let answer = gemini_response
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        debug!(
            provider = %self.id,
            finish_reason = ?gemini_response.candidates.first().and_then(|c| c.finish_reason.as_deref()),
            chars = answer.len(),
            "Gemini response received"
        );

        Ok(answer)
    }
}

/// Build system prompt with the request context appended
fn build_system_prompt(base_prompt: &str, context: &ProviderContext) -> String {
    if context.is_empty() {
        return base_prompt.to_string();
    }

    let lines: Vec<String> = context
        .iter()
        .map(|(k, v)| format!("- {}: {}", k, v))
        .collect();

    format!("{}\n\nContext:\n{}", base_prompt, lines.join("\n"))
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODEL_PATH: &str = "/v1beta/models/gemini-2.0-flash:generateContent";

    fn provider(server: &MockServer) -> GeminiProvider {
        GeminiProvider::new("conversational", "test-key".to_string(), "gemini-2.0-flash")
            .with_base_url(server.uri())
    }

    #[test]
    fn test_request_serialization() {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "What is an SIP?".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: "You are a finance assistant".to_string(),
                }],
            },
        };

        let json = serde_json::to_string(&request);
        assert!(json.is_ok());
        assert!(json.unwrap().contains("What is an SIP?"));
    }

    #[test]
    fn test_system_prompt_includes_context() {
        let mut context = ProviderContext::new();
        context.insert("language".to_string(), "hi".to_string());
        let prompt = build_system_prompt("base", &context);
        assert!(prompt.starts_with("base"));
        assert!(prompt.contains("- language: hi"));
        assert_eq!(build_system_prompt("base", &ProviderContext::new()), "base");
    }

    #[tokio::test]
    async fn test_successful_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "An SIP is " }, { "text": "a monthly investment." }] },
                    "finishReason": "STOP"
                }]
            })))
            .mount(&server)
            .await;

        let answer = provider(&server)
            .complete("What is an SIP?", &ProviderContext::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(answer, "An SIP is a monthly investment.");
    }

    #[tokio::test]
    async fn test_upstream_error_is_distinct_from_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .complete("hi", &ProviderContext::new(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::Upstream {
                status: 429,
                message: "quota exceeded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_blocked_candidate_yields_empty_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let answer = provider(&server)
            .complete("hi", &ProviderContext::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(answer.is_empty());
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(json!({ "candidates": [] })),
            )
            .mount(&server)
            .await;

        let err = provider(&server)
            .complete("hi", &ProviderContext::new(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::Timeout(50));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let provider = GeminiProvider::new("fast", String::new(), "gemini-2.0-flash-lite");
        let err = provider
            .complete("hi", &ProviderContext::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }
}
