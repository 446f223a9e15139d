//! LLM Router
//!
//! Orders the configured providers with the default provider first and
//! fails over down the list. Each attempt is bounded by a timeout, so a hung
//! backend costs at most one timeout per oracle call.

use super::{Completion, LLMError, LLMProvider, Message};
use std::time::Duration;

/// LLM Router with ordered failover
pub struct LLMRouter {
    providers: Vec<Box<dyn LLMProvider>>,
    default_provider: String,
    timeout: Duration,
}

impl LLMRouter {
    /// Create a new LLM router
    ///
    /// # Arguments
    /// * `providers` - Available providers, in fallback order
    /// * `default_provider` - Name of the provider to try first
    /// * `timeout` - Upper bound for a single provider attempt
    pub fn new(
        providers: Vec<Box<dyn LLMProvider>>,
        default_provider: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            providers,
            default_provider: default_provider.into(),
            timeout,
        }
    }

    /// Providers in attempt order: the default first, the rest as registered
    pub fn rank_providers(&self) -> Vec<&dyn LLMProvider> {
        let mut providers: Vec<&dyn LLMProvider> =
            self.providers.iter().map(|b| b.as_ref()).collect();

        // Stable sort keeps registration order among non-default providers
        providers.sort_by_key(|p| p.name() != self.default_provider);
        providers
    }

    /// Call providers with automatic failover
    ///
    /// Returns the completion together with the name of the provider that
    /// produced it, or `AllProvidersExhausted` once every provider failed.
    pub async fn complete(
        &self,
        messages: &[Message],
        temperature: f32,
    ) -> super::Result<(Completion, String)> {
        if self.providers.is_empty() {
            return Err(LLMError::ProviderUnavailable(
                "No LLM providers configured".to_string(),
            ));
        }

        for provider in self.rank_providers() {
            tracing::debug!(
                "Attempting provider: {} (timeout: {}s)",
                provider.name(),
                self.timeout.as_secs()
            );

            let result =
                tokio::time::timeout(self.timeout, provider.complete(messages, temperature)).await;

            match result {
                Ok(Ok(completion)) => {
                    tracing::debug!(
                        "Provider {} succeeded ({} tokens)",
                        provider.name(),
                        completion.tokens_used
                    );
                    return Ok((completion, provider.name().to_string()));
                }
                Ok(Err(e)) => {
                    tracing::warn!("Provider {} failed: {}", provider.name(), e);
                }
                Err(_) => {
                    tracing::warn!(
                        "Provider {} timed out after {}s",
                        provider.name(),
                        self.timeout.as_secs()
                    );
                }
            }
        }

        tracing::error!("All LLM providers exhausted");
        Err(LLMError::AllProvidersExhausted)
    }

    /// Check the health of all registered providers
    /// Returns a list of (provider_name, is_healthy)
    pub async fn check_health(&self) -> Vec<(&str, bool)> {
        let mut results = Vec::new();
        for provider in &self.providers {
            let is_healthy = provider.check_health().await;
            results.push((provider.name(), is_healthy));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Behavior {
        Answer(&'static str),
        Fail,
        Hang,
    }

    struct MockProvider {
        name: String,
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
    }

    impl MockProvider {
        fn boxed(name: &str, behavior: Behavior, calls: Arc<AtomicUsize>) -> Box<dyn LLMProvider> {
            Box::new(Self {
                name: name.to_string(),
                behavior,
                calls,
            })
        }
    }

    #[async_trait]
    impl LLMProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_local(&self) -> bool {
            self.name == "ollama"
        }

        async fn complete(
            &self,
            _messages: &[Message],
            _temperature: f32,
        ) -> super::super::Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Answer(content) => Ok(Completion {
                    content: content.to_string(),
                    tokens_used: 42,
                }),
                Behavior::Fail => Err(LLMError::NetworkError("boom".to_string())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Err(LLMError::Timeout)
                }
            }
        }
    }

    #[test]
    fn test_rank_providers_default_first() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = LLMRouter::new(
            vec![
                MockProvider::boxed("openai", Behavior::Fail, calls.clone()),
                MockProvider::boxed("ollama", Behavior::Fail, calls.clone()),
            ],
            "ollama",
            Duration::from_secs(1),
        );

        let names: Vec<_> = router.rank_providers().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["ollama", "openai"]);
    }

    #[tokio::test]
    async fn test_failover_to_next_provider() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let router = LLMRouter::new(
            vec![
                MockProvider::boxed("ollama", Behavior::Fail, first.clone()),
                MockProvider::boxed("openai", Behavior::Answer("{}"), second.clone()),
            ],
            "ollama",
            Duration::from_secs(1),
        );

        let (completion, provider) = router
            .complete(&[Message::user("hi")], 0.7)
            .await
            .unwrap();
        assert_eq!(provider, "openai");
        assert_eq!(completion.tokens_used, 42);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = LLMRouter::new(
            vec![
                MockProvider::boxed("ollama", Behavior::Hang, calls.clone()),
                MockProvider::boxed("openai", Behavior::Answer("{\"ok\":1}"), calls.clone()),
            ],
            "ollama",
            Duration::from_millis(50),
        );

        let (completion, provider) = router.complete(&[], 0.7).await.unwrap();
        assert_eq!(provider, "openai");
        assert_eq!(completion.content, "{\"ok\":1}");
    }

    #[tokio::test]
    async fn test_all_providers_exhausted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = LLMRouter::new(
            vec![
                MockProvider::boxed("ollama", Behavior::Fail, calls.clone()),
                MockProvider::boxed("openai", Behavior::Fail, calls.clone()),
            ],
            "ollama",
            Duration::from_secs(1),
        );

        let err = router.complete(&[], 0.7).await.unwrap_err();
        assert!(matches!(err, LLMError::AllProvidersExhausted));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_providers() {
        let router = LLMRouter::new(vec![], "ollama", Duration::from_secs(1));
        assert!(matches!(
            router.complete(&[], 0.7).await,
            Err(LLMError::ProviderUnavailable(_))
        ));
    }
}
