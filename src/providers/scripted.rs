//! Scripted provider for development & testing
//! Keeps the router functional without any vendor dependency

use super::{ProviderClient, ProviderContext, ProviderError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Transport,
    /// Never answers; the caller's timeout fires
    Hang,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }
}

/// Replays a fixed list of replies in order, repeating the last one.
pub struct ScriptedProvider {
    id: String,
    replies: Vec<ScriptedReply>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>, replies: Vec<ScriptedReply>) -> Self {
        Self {
            id: id.into(),
            replies,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(id: impl Into<String>, reply: ScriptedReply) -> Self {
        Self::new(id, vec![reply])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(
        &self,
        prompt: &str,
        _context: &ProviderContext,
        _timeout: Duration,
    ) -> Result<String, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().await.push(prompt.to_string());

        let reply = self
            .replies
            .get(n)
            .or_else(|| self.replies.last())
            .cloned()
            .unwrap_or(ScriptedReply::Transport);

        match reply {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Transport => Err(ProviderError::Transport(format!(
                "{}: connection refused",
                self.id
            ))),
            ScriptedReply::Hang => {
                std::future::pending::<()>().await;
                Err(ProviderError::Timeout(0))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_then_repeats_last() {
        let provider = ScriptedProvider::new(
            "fast",
            vec![ScriptedReply::Transport, ScriptedReply::text("ok")],
        );
        let ctx = ProviderContext::new();
        let t = Duration::from_secs(1);

        assert!(provider.complete("a", &ctx, t).await.is_err());
        assert_eq!(provider.complete("b", &ctx, t).await.unwrap(), "ok");
        assert_eq!(provider.complete("c", &ctx, t).await.unwrap(), "ok");
        assert_eq!(provider.calls(), 3);
        assert_eq!(provider.prompts().await, vec!["a", "b", "c"]);
    }
}
