//! Failure signatures
//!
//! A provider can answer HTTP 200 with text that is really a refusal or a
//! non-answer. Those responses are recognised by case-insensitive match
//! against a configurable list: a global list applied to every provider plus
//! an optional list per provider id. Empty and whitespace-only responses
//! always count as failures.
//!
//! Only the opening of a response is checked (its first two sentences, at
//! most `OPENING_CHARS` characters). Refusal boilerplate leads the reply; the
//! same words later in a real answer ("if something went wrong with your
//! transfer...") are content.
//!
//! Override file format (JSON):
//! `{"global": ["..."], "per_provider": {"grounded": ["..."]}}`

use crate::error::AssistantError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const DEFAULT_GLOBAL: &[&str] = &[
    "i'm sorry, but i can't",
    "i am sorry, but i cannot",
    "i'm sorry, i can't",
    "i cannot help with that",
    "i can't help with that",
    "i'm unable to",
    "i am unable to",
    "as an ai language model",
    "i don't have access to real-time",
    "i do not have access to real-time",
    "i don't have enough information",
    "unable to process your request",
    "no relevant documents found",
];

/// Upper bound on how much of a response is searched for signatures
const OPENING_CHARS: usize = 160;

const OPENING_SENTENCES: usize = 2;

pub const EMPTY_RESPONSE: &str = "<empty response>";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureSignatures {
    #[serde(default)]
    pub global: Vec<String>,
    #[serde(default)]
    pub per_provider: HashMap<String, Vec<String>>,
}

impl Default for FailureSignatures {
    fn default() -> Self {
        Self {
            global: DEFAULT_GLOBAL.iter().map(|s| s.to_string()).collect(),
            per_provider: HashMap::new(),
        }
    }
}

impl FailureSignatures {
    /// Load an override file. The file replaces the defaults entirely.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: FailureSignatures = serde_json::from_str(&raw).map_err(|e| {
            AssistantError::Config(format!(
                "Invalid failure signature file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(parsed.normalized())
    }

    /// Lower-cases every signature and drops blank entries
    pub fn normalized(self) -> Self {
        let clean = |list: Vec<String>| -> Vec<String> {
            list.into_iter()
                .map(|s| normalize(&s))
                .filter(|s| !s.is_empty())
                .collect()
        };

        Self {
            global: clean(self.global),
            per_provider: self
                .per_provider
                .into_iter()
                .map(|(id, list)| (id, clean(list)))
                .collect(),
        }
    }

    /// Returns the signature that matched, if the response is a failure
    pub fn matches<'a>(&'a self, provider_id: &str, response: &str) -> Option<&'a str> {
        let text = normalize(response);
        if text.is_empty() {
            return Some(EMPTY_RESPONSE);
        }
        let head = opening(&text);

        let provider_specific = self
            .per_provider
            .get(provider_id)
            .map(|list| list.as_slice())
            .unwrap_or_default();

        self.global
            .iter()
            .chain(provider_specific.iter())
            .find(|sig| head.contains(sig.as_str()))
            .map(String::as_str)
    }
}

fn normalize(text: &str) -> String {
    text.trim().replace('\u{2019}', "'").to_lowercase()
}

/// The leading sentences of `text`, capped at `OPENING_CHARS`
fn opening(text: &str) -> &str {
    let mut sentences = 0;
    for (count, (idx, c)) in text.char_indices().enumerate() {
        if count == OPENING_CHARS {
            return &text[..idx];
        }
        if matches!(c, '.' | '!' | '?' | '\n' | '\u{0964}') {
            sentences += 1;
            if sentences == OPENING_SENTENCES {
                return &text[..idx + c.len_utf8()];
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_whitespace_are_failures() {
        let sigs = FailureSignatures::default();
        assert_eq!(sigs.matches("fast", ""), Some(EMPTY_RESPONSE));
        assert_eq!(sigs.matches("fast", "  \n\t "), Some(EMPTY_RESPONSE));
    }

    #[test]
    fn test_refusal_boilerplate_matches_case_insensitively() {
        let sigs = FailureSignatures::default();
        assert!(sigs
            .matches("fast", "I’m sorry, but I can’t help with questions about that.")
            .is_some());
        assert!(sigs
            .matches("fast", "As an AI language model I cannot give financial advice")
            .is_some());
    }

    #[test]
    fn test_real_answer_passes() {
        let sigs = FailureSignatures::default();
        assert_eq!(
            sigs.matches("fast", "A SIP lets you invest a fixed amount every month."),
            None
        );
    }

    #[test]
    fn test_answers_mentioning_failure_words_pass() {
        let sigs = FailureSignatures::default();
        assert_eq!(
            sigs.matches(
                "fast",
                "If something went wrong with your UPI transfer, raise a dispute in the app within 30 days."
            ),
            None
        );
        assert_eq!(
            sigs.matches(
                "fast",
                "To open a PPF account, visit any post office or bank branch. Carry your PAN and \
                 Aadhaar. Note that I'm unable to see your own account balance from here."
            ),
            None
        );
    }

    #[test]
    fn test_refusal_after_short_preamble_still_matches() {
        let sigs = FailureSignatures::default();
        assert!(sigs
            .matches("fast", "Thanks for asking! I'm unable to answer questions about that.")
            .is_some());
    }

    #[test]
    fn test_opening_is_capped() {
        let long = "a".repeat(400);
        assert_eq!(opening(&long).chars().count(), OPENING_CHARS);
        assert_eq!(opening("one. two. three."), "one. two.");
        assert_eq!(opening("नमस्ते। मैं मदद नहीं कर सकता। बाकी"), "नमस्ते। मैं मदद नहीं कर सकता।");
    }

    #[test]
    fn test_per_provider_signatures_apply_only_to_that_provider() {
        let mut sigs = FailureSignatures::default();
        sigs.per_provider
            .insert("grounded".to_string(), vec!["context does not contain".to_string()]);

        let text = "The context does not contain this scheme.";
        assert!(sigs.matches("grounded", text).is_some());
        assert!(sigs.matches("fast", text).is_none());
    }

    #[test]
    fn test_load_override_file() {
        let path = std::env::temp_dir().join(format!("signatures-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"{"global": ["  NOPE  ", ""], "per_provider": {"grounded": ["No Data"]}}"#,
        )
        .unwrap();

        let sigs = FailureSignatures::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(sigs.global, vec!["nope".to_string()]);
        assert_eq!(sigs.per_provider["grounded"], vec!["no data".to_string()]);
        assert!(sigs.matches("any", "Nope.").is_some());
        // Defaults are replaced, not merged
        assert!(sigs.matches("any", "As an AI language model...").is_none());
    }

    #[test]
    fn test_invalid_override_file_is_config_error() {
        let path = std::env::temp_dir().join(format!("signatures-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "not json").unwrap();

        let err = FailureSignatures::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, AssistantError::Config(_)));
    }
}
