//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ecu_engine::db::{Database, EdgeEndpoint, NewEdge, NewObservation, ObservationStore};
use ecu_engine::embedding::{Embedder, EmbeddingError};
use ecu_engine::oracle::{
    Decomposition, HypothesisReport, MetaJudgment, MetaRequest, Oracle, OracleError,
    PatternReport, PatternRequest, PlanRequest, Synthesis, SynthesisRequest, TestRequest,
    ToolPlan,
};
use ecu_sdk::types::Metadata;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

pub const DIM: usize = 3;

/// Fresh database in a temp dir, with a store that accepts short contexts
pub async fn temp_store() -> (TempDir, Database, ObservationStore) {
    let temp_dir = TempDir::new().unwrap();
    let database = Database::new(&temp_dir.path().join("ecu.db")).await.unwrap();
    let store = database.observations(DIM, 1);
    (temp_dir, database, store)
}

pub fn observation(doc_id: &str, context: &str, embedding: [f32; DIM]) -> NewObservation {
    NewObservation {
        doc_id: doc_id.to_string(),
        span_start: None,
        span_end: None,
        surface_form: None,
        context: context.to_string(),
        embedding: embedding.to_vec(),
        doc_timestamp: None,
        source_reliability: 1.0,
        metadata: Metadata::new(),
    }
}

pub fn edge(a: EdgeEndpoint, b: EdgeEndpoint, distance: Option<i64>, strength: f64) -> NewEdge {
    NewEdge {
        a,
        b,
        doc_id: "doc".to_string(),
        distance,
        kind: "adjacent_chunk".to_string(),
        strength,
        metadata: Metadata::new(),
    }
}

pub fn day(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

/// Embedder returning fixed vectors per text, the zero vector otherwise
pub struct FixedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl FixedEmbedder {
    pub fn new(entries: &[(&str, [f32; DIM])]) -> Self {
        Self {
            vectors: entries
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.to_vec()))
                .collect(),
        }
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    fn name(&self) -> &str {
        "fixed"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| {
                self.vectors
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; DIM])
            })
            .collect())
    }
}

/// Oracle that replays canned judgments and records what it was asked
///
/// Queued meta judgments are consumed in order; once the queue is empty the
/// fallback judgment repeats forever.
#[derive(Default)]
pub struct ScriptedOracle {
    pub decomposition: Decomposition,
    pub plan: ToolPlan,
    pub patterns: Mutex<VecDeque<PatternReport>>,
    pub evaluations: Mutex<VecDeque<HypothesisReport>>,
    pub meta: Mutex<VecDeque<MetaJudgment>>,
    pub meta_fallback: MetaJudgment,
    pub synthesis: Synthesis,
    /// Answer every call with a contract violation
    pub broken: bool,
    pub tokens_per_call: u64,

    pub calls: Mutex<Vec<&'static str>>,
    pub meta_iterations: Mutex<Vec<u32>>,
    pub synthesis_hypotheses: Mutex<Vec<usize>>,
    pub tokens: AtomicU64,
}

impl ScriptedOracle {
    fn enter<T>(&self, call: &'static str, value: T) -> Result<T, OracleError> {
        self.calls.lock().unwrap().push(call);
        self.tokens.fetch_add(self.tokens_per_call, Ordering::SeqCst);
        if self.broken {
            return Err(OracleError::Contract {
                call: call.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(value)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn decompose(&self, _query: &str) -> Result<Decomposition, OracleError> {
        self.enter("decompose", self.decomposition.clone())
    }

    async fn plan_tools(&self, _request: &PlanRequest<'_>) -> Result<ToolPlan, OracleError> {
        self.enter("plan_tools", self.plan.clone())
    }

    async fn detect_patterns(
        &self,
        _request: &PatternRequest<'_>,
    ) -> Result<PatternReport, OracleError> {
        let report = self.patterns.lock().unwrap().pop_front().unwrap_or_default();
        self.enter("detect_patterns", report)
    }

    async fn test_hypotheses(
        &self,
        _request: &TestRequest<'_>,
    ) -> Result<HypothesisReport, OracleError> {
        let report = self
            .evaluations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        self.enter("test_hypotheses", report)
    }

    async fn meta_reason(&self, request: &MetaRequest<'_>) -> Result<MetaJudgment, OracleError> {
        self.meta_iterations.lock().unwrap().push(request.iteration);
        let judgment = self
            .meta
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.meta_fallback.clone());
        self.enter("meta_reason", judgment)
    }

    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Synthesis, OracleError> {
        self.synthesis_hypotheses
            .lock()
            .unwrap()
            .push(request.hypotheses.len());
        self.enter("synthesize", self.synthesis.clone())
    }

    fn tokens_used(&self) -> u64 {
        self.tokens.load(Ordering::SeqCst)
    }
}
