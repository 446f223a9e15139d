//! End-to-end tests of the LLM-backed oracle against a mock Ollama server

mod common;

use common::{observation, temp_store, FixedEmbedder};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use ecu_engine::agent::{Decision, ReasoningLoop, StopReason};
use ecu_engine::config::{AgentConfig, MemoryConfig, RetrievalConfig};
use ecu_engine::llm::{ollama::OllamaProvider, router::LLMRouter, LLMProvider};
use ecu_engine::oracle::{LlmOracle, MetaRequest, Oracle, OracleError};
use ecu_engine::retrieval::{RetrievalEngine, ToolDispatcher};

const QUERY: &str = "Who approved the permit?";
const TIMEOUT: Duration = Duration::from_secs(5);

async fn mock_ollama(content: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"role": "assistant", "content": content},
            "done": true,
            "prompt_eval_count": 10,
            "eval_count": 5
        })))
        .mount(&server)
        .await;
    server
}

fn oracle_for(server: &MockServer) -> LlmOracle {
    let providers: Vec<Box<dyn LLMProvider>> = vec![Box::new(
        OllamaProvider::new(server.uri(), "llama3.1:8b", TIMEOUT).unwrap(),
    )];
    LlmOracle::new(LLMRouter::new(providers, "ollama", TIMEOUT))
}

#[tokio::test]
async fn test_meta_reason_over_http() {
    let server =
        mock_ollama("Here you go:\n```json\n{\"confidence_score\": 8.5, \"decision\": \"continue\"}\n```")
            .await;
    let oracle = oracle_for(&server);

    let judgment = oracle
        .meta_reason(&MetaRequest {
            query: QUERY,
            sub_questions: &[],
            hypotheses: &[],
            iteration: 1,
            max_iterations: 15,
        })
        .await
        .unwrap();

    assert_eq!(judgment.confidence_score, 8.5);
    assert_eq!(judgment.decision, Decision::Continue);
    assert_eq!(oracle.tokens_used(), 15);
}

#[tokio::test]
async fn test_prose_reply_is_contract_violation() {
    let server = mock_ollama("I think Smith approved it.").await;
    let oracle = oracle_for(&server);

    let result = oracle.decompose(QUERY).await;
    assert!(matches!(result, Err(OracleError::Contract { .. })));
    // Tokens are spent even when the reply is unusable
    assert_eq!(oracle.tokens_used(), 15);
}

#[tokio::test]
async fn test_full_session_over_http() {
    // One reply that satisfies every call: unknown fields are ignored
    let reply = json!({
        "sub_questions": [{"text": "Which permit?", "priority": "ESSENTIAL", "reasoning": "scope"}],
        "tool_calls": [{"tool": "semantic_search", "parameters": {"query": QUERY}, "reasoning": "look"}],
        "patterns": [],
        "evaluations": [],
        "confidence_score": 9,
        "decision": "SYNTHESIZE",
        "answer": "Smith approved the permit.",
        "uncertainties": "date of approval"
    })
    .to_string();
    let server = mock_ollama(&reply).await;

    let (_dir, _db, store) = temp_store().await;
    store
        .put(
            &[observation("permits", "Smith approved the permit", [1.0, 0.0, 0.0])],
            &[],
        )
        .await
        .unwrap();
    let embedder = FixedEmbedder::new(&[(QUERY, [1.0, 0.0, 0.0])]);
    let tools = ToolDispatcher::new(
        RetrievalEngine::new(store, Arc::new(embedder)),
        RetrievalConfig::default(),
    );

    let oracle: Arc<dyn Oracle> = Arc::new(oracle_for(&server));
    let outcome = ReasoningLoop::new(
        oracle,
        tools,
        AgentConfig::default(),
        MemoryConfig::default(),
    )
    .run(QUERY, None)
    .await
    .unwrap();

    assert_eq!(outcome.answer, "Smith approved the permit.");
    assert_eq!(outcome.stop_reason, Some(StopReason::Synthesized));
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.confidence, 9.0);
    assert_eq!(outcome.sub_questions.len(), 1);
    assert_eq!(outcome.observations_considered, 1);
    assert_eq!(outcome.uncertainties, vec!["date of approval".to_string()]);
    // decompose, plan_tools, detect_patterns, meta_reason, synthesize
    assert_eq!(outcome.tokens_used, 75);
}
