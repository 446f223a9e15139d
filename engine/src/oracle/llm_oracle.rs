//! Oracle backed by the LLM router
//!
//! Renders a prompt per call, sends it through `LLMRouter` with a
//! call-specific temperature, pulls the JSON object out of the reply and
//! deserializes it into the typed response.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{
    prompts, Decomposition, HypothesisReport, MetaJudgment, MetaRequest, Oracle, OracleError,
    PatternReport, PatternRequest, PlanRequest, Result, Synthesis, SynthesisRequest, TestRequest,
    ToolPlan,
};
use crate::llm::router::LLMRouter;
use crate::llm::{extract_json_object, Message};

const DEFAULT_TEMPERATURE: f32 = 0.7;
const META_TEMPERATURE: f32 = 0.3;
const SYNTHESIS_TEMPERATURE: f32 = 0.5;

/// Longest raw payload quoted in a contract-violation warning
const LOGGED_PAYLOAD_CHARS: usize = 2000;

pub struct LlmOracle {
    router: LLMRouter,
    tokens: AtomicU64,
}

impl LlmOracle {
    pub fn new(router: LLMRouter) -> Self {
        Self {
            router,
            tokens: AtomicU64::new(0),
        }
    }

    /// The router, for provider health checks
    pub fn router(&self) -> &LLMRouter {
        &self.router
    }

    async fn call<T: DeserializeOwned>(
        &self,
        call: &'static str,
        prompt: String,
        temperature: f32,
    ) -> Result<T> {
        let messages = [Message::system(prompts::SYSTEM_PROMPT), Message::user(prompt)];

        let (completion, provider) = self
            .router
            .complete(&messages, temperature)
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        self.tokens
            .fetch_add(completion.tokens_used, Ordering::Relaxed);
        tracing::debug!(
            call,
            provider = %provider,
            tokens = completion.tokens_used,
            "Oracle call completed"
        );

        parse_judgment(call, &completion.content)
    }
}

/// Deserialize the JSON object embedded in a model reply
fn parse_judgment<T: DeserializeOwned>(call: &str, content: &str) -> Result<T> {
    let violation = |reason: String| {
        tracing::warn!(
            call,
            payload = %truncate(content, LOGGED_PAYLOAD_CHARS),
            "Oracle response rejected: {}",
            reason
        );
        OracleError::Contract {
            call: call.to_string(),
            reason,
        }
    };

    let json = extract_json_object(content)
        .ok_or_else(|| violation("no JSON object in response".to_string()))?;

    serde_json::from_str(json).map_err(|e| violation(e.to_string()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn decompose(&self, query: &str) -> Result<Decomposition> {
        self.call("decompose", prompts::decompose(query), DEFAULT_TEMPERATURE)
            .await
    }

    async fn plan_tools(&self, request: &PlanRequest<'_>) -> Result<ToolPlan> {
        self.call("plan_tools", prompts::plan_tools(request), DEFAULT_TEMPERATURE)
            .await
    }

    async fn detect_patterns(&self, request: &PatternRequest<'_>) -> Result<PatternReport> {
        self.call(
            "detect_patterns",
            prompts::detect_patterns(request),
            DEFAULT_TEMPERATURE,
        )
        .await
    }

    async fn test_hypotheses(&self, request: &TestRequest<'_>) -> Result<HypothesisReport> {
        self.call(
            "test_hypotheses",
            prompts::test_hypotheses(request),
            DEFAULT_TEMPERATURE,
        )
        .await
    }

    async fn meta_reason(&self, request: &MetaRequest<'_>) -> Result<MetaJudgment> {
        self.call("meta_reason", prompts::meta_reason(request), META_TEMPERATURE)
            .await
    }

    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Synthesis> {
        self.call(
            "synthesize",
            prompts::synthesize(request),
            SYNTHESIS_TEMPERATURE,
        )
        .await
    }

    fn tokens_used(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::routing::Decision;
    use crate::llm::{Completion, LLMError, LLMProvider};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned replies in order
    struct Scripted {
        replies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LLMProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn is_local(&self) -> bool {
            true
        }

        async fn complete(
            &self,
            _messages: &[Message],
            _temperature: f32,
        ) -> crate::llm::Result<Completion> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(LLMError::ProviderUnavailable("script exhausted".to_string()));
            }
            Ok(Completion {
                content: replies.remove(0),
                tokens_used: 10,
            })
        }
    }

    fn oracle(replies: &[&str]) -> LlmOracle {
        let provider = Scripted {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        };
        LlmOracle::new(LLMRouter::new(
            vec![Box::new(provider)],
            "scripted",
            Duration::from_secs(5),
        ))
    }

    #[tokio::test]
    async fn test_decompose_parses_fenced_reply() {
        let oracle = oracle(&[
            "Sure!\n```json\n{\"sub_questions\": [{\"text\": \"Who signed?\", \"priority\": \"ESSENTIAL\"}]}\n```",
        ]);

        let decomposition = oracle.decompose("Who approved it?").await.unwrap();
        assert_eq!(decomposition.sub_questions.len(), 1);
        assert_eq!(decomposition.sub_questions[0].text, "Who signed?");
        assert_eq!(oracle.tokens_used(), 10);
    }

    #[tokio::test]
    async fn test_prose_reply_is_contract_violation() {
        let oracle = oracle(&["I cannot help with that."]);
        let err = oracle.decompose("q").await.unwrap_err();
        assert!(matches!(err, OracleError::Contract { .. }));
        assert_eq!(oracle.tokens_used(), 10);
    }

    #[tokio::test]
    async fn test_wrong_shape_is_contract_violation() {
        let oracle = oracle(&[r#"{"sub_questions": "none"}"#]);
        assert!(matches!(
            oracle.decompose("q").await,
            Err(OracleError::Contract { .. })
        ));
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let oracle = oracle(&[]);
        let request = MetaRequest {
            query: "q",
            sub_questions: &[],
            hypotheses: &[],
            iteration: 1,
            max_iterations: 15,
        };
        assert!(matches!(
            oracle.meta_reason(&request).await,
            Err(OracleError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_meta_reason_decision() {
        let oracle = oracle(&[r#"{"confidence_score": 8.5, "decision": "CONTINUE"}"#]);
        let judgment = oracle
            .meta_reason(&MetaRequest {
                query: "q",
                sub_questions: &[],
                hypotheses: &[],
                iteration: 2,
                max_iterations: 15,
            })
            .await
            .unwrap();
        assert_eq!(judgment.confidence_score, 8.5);
        assert_eq!(judgment.decision, Decision::Continue);
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }
}
