//! Oracle interface
//!
//! The reasoning loop asks an oracle for six kinds of judgment. Each call is
//! a typed request/response pair; the loop never sees raw model output. A
//! failed or malformed call comes back as an `OracleError`, and the loop
//! substitutes the response type's `Default` (an empty judgment).
//!
//! All response types deserialize leniently: every field is optional, and
//! enum labels outside the known set map to a safe default.

use async_trait::async_trait;
use ecu_sdk::errors::EngineError;
use ecu_sdk::types::{ObservationId, RetrievedObservation};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::agent::routing::Decision;
use crate::agent::working_memory::{Hypothesis, Priority, SubQuestion};

pub mod llm_oracle;
pub mod prompts;

pub use llm_oracle::LlmOracle;

/// Result type for oracle calls
pub type Result<T> = std::result::Result<T, OracleError>;

/// Errors from an oracle call
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// The backend could not be reached or every provider failed
    #[error("Oracle transport failed: {0}")]
    Transport(String),

    /// The backend answered, but not with the expected structure
    #[error("Oracle {call} response violated its contract: {reason}")]
    Contract { call: String, reason: String },
}

impl From<OracleError> for EngineError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::Transport(msg) => EngineError::LLMProvider(msg),
            OracleError::Contract { call, reason } => EngineError::OracleContract { call, reason },
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Compact observation view handed to pattern detection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationDigest {
    pub id: ObservationId,
    pub doc_id: String,
    /// Context truncated to the configured character limit
    pub context: String,
    pub similarity: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub query: &'a str,
    pub sub_questions: &'a [SubQuestion],
    pub hypotheses: &'a [Hypothesis],
    pub observation_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PatternRequest<'a> {
    pub observations: &'a [ObservationDigest],
    pub sub_questions: &'a [SubQuestion],
}

#[derive(Debug, Clone, Copy)]
pub struct TestRequest<'a> {
    pub hypotheses: &'a [Hypothesis],
    pub observations: &'a [RetrievedObservation],
}

#[derive(Debug, Clone, Copy)]
pub struct MetaRequest<'a> {
    pub query: &'a str,
    pub sub_questions: &'a [SubQuestion],
    pub hypotheses: &'a [Hypothesis],
    pub iteration: u32,
    pub max_iterations: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub query: &'a str,
    pub sub_questions: &'a [SubQuestion],
    /// Only the hypotheses above the high-confidence threshold
    pub hypotheses: &'a [Hypothesis],
    pub observations: &'a [RetrievedObservation],
    pub evidence_trail: &'a [String],
}

/// Rename alias keys of a JSON object to their canonical key
///
/// When the canonical key is present the aliases are dropped, so a reply
/// spelling a field both ways keeps the canonical value instead of failing
/// as a duplicate field. Aliases are tried in order.
pub(crate) fn fold_aliases(
    mut value: serde_json::Value,
    aliases: &[(&str, &str)],
) -> serde_json::Value {
    if let Some(object) = value.as_object_mut() {
        for (alias, canonical) in aliases {
            if let Some(aliased) = object.remove(*alias) {
                if !object.contains_key(*canonical) {
                    object.insert(canonical.to_string(), aliased);
                }
            }
        }
    }
    value
}

/// `Deserialize` for a `#[serde(remote = "Self")]` type that folds the given
/// `(alias, canonical)` keys first
macro_rules! deserialize_with_aliases {
    ($ty:ty, [$(($alias:literal, $canonical:literal)),+ $(,)?]) => {
        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let value = $crate::oracle::fold_aliases(
                    <serde_json::Value as serde::Deserialize>::deserialize(deserializer)?,
                    &[$(($alias, $canonical)),+],
                );
                <$ty>::deserialize(value).map_err(<D::Error as serde::de::Error>::custom)
            }
        }
    };
}

pub(crate) use deserialize_with_aliases;

/// `Serialize` for a `#[serde(remote = "Self")]` type
macro_rules! serialize_remote_self {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Serialize for $ty {
                fn serialize<S: serde::Serializer>(
                    &self,
                    serializer: S,
                ) -> std::result::Result<S::Ok, S::Error> {
                    <$ty>::serialize(self, serializer)
                }
            }
        )+
    };
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposedSubQuestion {
    pub text: String,
    pub priority: Priority,
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Decomposition {
    pub sub_questions: Vec<ProposedSubQuestion>,
}

/// One retrieval call chosen by the planner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, remote = "Self")]
pub struct ToolCall {
    pub tool: String,
    pub parameters: serde_json::Value,
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPlan {
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, remote = "Self")]
pub struct Pattern {
    pub claim: String,
    /// Index into the session's sub-questions
    pub sub_question: Option<i64>,
    pub confidence: f64,
    pub evidence_ids: Vec<ObservationId>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternReport {
    pub patterns: Vec<Pattern>,
}

/// Effect of new evidence on a hypothesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Support,
    Contradict,
    #[default]
    Neutral,
}

impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(
            match raw.as_str().map(|s| s.trim().to_ascii_lowercase()).as_deref() {
                Some("support") | Some("supports") => Verdict::Support,
                Some("contradict") | Some("contradicts") => Verdict::Contradict,
                _ => Verdict::Neutral,
            },
        )
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Support => write!(f, "support"),
            Verdict::Contradict => write!(f, "contradict"),
            Verdict::Neutral => write!(f, "neutral"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, remote = "Self")]
pub struct Evaluation {
    /// Position of the hypothesis in the list sent with the request
    pub index: i64,
    pub verdict: Verdict,
    pub new_confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HypothesisReport {
    pub evaluations: Vec<Evaluation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, remote = "Self")]
pub struct MetaJudgment {
    pub can_answer: bool,
    /// 0-10 scale
    pub confidence_score: f64,
    #[serde(deserialize_with = "string_or_list")]
    pub missing_information: Vec<String>,
    pub decision: Decision,
    pub reasoning: String,
    pub next_action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceItem {
    pub claim: String,
    pub observation_ids: Vec<ObservationId>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Synthesis {
    pub answer: Option<String>,
    pub summary: Option<String>,
    pub evidence: Vec<EvidenceItem>,
    #[serde(deserialize_with = "string_or_list")]
    pub reasoning_chain: Vec<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub uncertainties: Vec<String>,
    /// 0-10 scale; absent means keep the last meta-reasoning score
    pub confidence: Option<f64>,
}

/// Accept `"text"`, `["a", "b"]` or null for a list of strings
fn string_or_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(match raw {
        serde_json::Value::String(s) if s.trim().is_empty() => Vec::new(),
        serde_json::Value::String(s) => vec![s],
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    })
}

deserialize_with_aliases!(ToolCall, [("name", "tool"), ("params", "parameters")]);
deserialize_with_aliases!(Pattern, [("relevant_to_subquestion", "sub_question")]);
deserialize_with_aliases!(Evaluation, [("hypothesis_id", "index")]);
deserialize_with_aliases!(MetaJudgment, [("confidence", "confidence_score")]);
serialize_remote_self!(ToolCall, Pattern, Evaluation, MetaJudgment);

/// Source of structured judgments for the reasoning loop
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Split a query into sub-questions
    async fn decompose(&self, query: &str) -> Result<Decomposition>;

    /// Choose the next retrieval calls
    async fn plan_tools(&self, request: &PlanRequest<'_>) -> Result<ToolPlan>;

    /// Propose hypotheses from recent evidence
    async fn detect_patterns(&self, request: &PatternRequest<'_>) -> Result<PatternReport>;

    /// Re-score hypotheses against recent evidence
    async fn test_hypotheses(&self, request: &TestRequest<'_>) -> Result<HypothesisReport>;

    /// Judge overall progress and pick continue, stop or synthesize
    async fn meta_reason(&self, request: &MetaRequest<'_>) -> Result<MetaJudgment>;

    /// Write the final answer
    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Synthesis>;

    /// Tokens spent over the lifetime of this oracle
    fn tokens_used(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_judgment_is_lenient() {
        let parsed: MetaJudgment = serde_json::from_str(
            r#"{"confidence_score": 7.5, "decision": "synthesise", "missing_information": "dates"}"#,
        )
        .unwrap();
        assert_eq!(parsed.confidence_score, 7.5);
        assert_eq!(parsed.decision, Decision::Synthesize);
        assert_eq!(parsed.missing_information, vec!["dates".to_string()]);
        assert!(!parsed.can_answer);

        let empty: MetaJudgment = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, MetaJudgment::default());
        assert_eq!(empty.decision, Decision::Continue);
    }

    #[test]
    fn test_pattern_aliases() {
        let parsed: PatternReport = serde_json::from_str(
            r#"{"patterns": [{"claim": "J. Smith is John Smith", "relevant_to_subquestion": 1,
                "confidence": 0.6, "evidence_ids": [3, 4], "reasoning": "same office"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.patterns[0].sub_question, Some(1));
        assert_eq!(parsed.patterns[0].evidence_ids, vec![3, 4]);
    }

    #[test]
    fn test_both_spellings_keep_canonical_field() {
        let parsed: MetaJudgment = serde_json::from_str(
            r#"{"confidence_score": 8.5, "confidence": 3, "decision": "stop"}"#,
        )
        .unwrap();
        assert_eq!(parsed.confidence_score, 8.5);
        assert_eq!(parsed.decision, Decision::Stop);

        let aliased: MetaJudgment = serde_json::from_str(r#"{"confidence": 6}"#).unwrap();
        assert_eq!(aliased.confidence_score, 6.0);

        let plan: ToolPlan = serde_json::from_str(
            r#"{"tool_calls": [{"tool": "temporal_query", "name": "semantic_search",
                "params": {"limit": 3}}]}"#,
        )
        .unwrap();
        assert_eq!(plan.tool_calls[0].tool, "temporal_query");
        assert_eq!(plan.tool_calls[0].parameters, serde_json::json!({"limit": 3}));
    }

    #[test]
    fn test_aliased_types_serialize_canonically() {
        let judgment = MetaJudgment {
            confidence_score: 4.0,
            ..Default::default()
        };
        let value = serde_json::to_value(&judgment).unwrap();
        assert_eq!(value["confidence_score"], 4.0);

        let back: MetaJudgment = serde_json::from_value(value).unwrap();
        assert_eq!(back, judgment);
    }

    #[test]
    fn test_evaluation_verdicts() {
        let parsed: HypothesisReport = serde_json::from_str(
            r#"{"evaluations": [
                {"hypothesis_id": 0, "verdict": "Supports", "new_confidence": 0.9},
                {"hypothesis_id": 1, "verdict": "unclear", "new_confidence": 0.4}
            ]}"#,
        )
        .unwrap();
        assert_eq!(parsed.evaluations[0].verdict, Verdict::Support);
        assert_eq!(parsed.evaluations[1].verdict, Verdict::Neutral);
        assert_eq!(parsed.evaluations[1].index, 1);
    }

    #[test]
    fn test_synthesis_defaults() {
        let parsed: Synthesis = serde_json::from_str(r#"{"answer": "Jane Doe"}"#).unwrap();
        assert_eq!(parsed.answer.as_deref(), Some("Jane Doe"));
        assert!(parsed.confidence.is_none());
        assert!(parsed.uncertainties.is_empty());
    }

    #[test]
    fn test_contract_error_maps_to_engine_error() {
        let err: EngineError = OracleError::Contract {
            call: "decompose".to_string(),
            reason: "no JSON object".to_string(),
        }
        .into();
        assert!(matches!(err, EngineError::OracleContract { .. }));
    }
}
