//! Tool dispatch for planner-chosen retrieval calls
//!
//! The planner names a tool and passes a JSON parameter object. Parameters
//! are parsed per tool (unknown fields ignored, missing fields defaulted from
//! `[retrieval]`), the matching retrieval operation runs, and its output is
//! flattened into a list of observations.
//!
//! `cluster_observations` is not dispatchable: it returns clusters rather
//! than observations and is reached through `RetrievalEngine` directly.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use ecu_sdk::types::{ObservationId, Relation, RetrievedObservation};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use super::{CooccurrenceTarget, RetrievalEngine};
use crate::config::RetrievalConfig;
use crate::db::{ScanFilter, TemporalFilter};
use crate::oracle::deserialize_with_aliases;

/// Tool names the planner may use
pub const DISPATCHABLE_TOOLS: [&str; 5] = [
    "semantic_search",
    "find_cooccurrences",
    "temporal_query",
    "traverse_graph",
    "find_contradictions",
];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DateRange {
    doc_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SemanticSearchParams {
    query: String,
    k: Option<usize>,
    min_similarity: Option<f64>,
    doc_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    /// Nested form: `{"filters": {"doc_id": ..., "start_date": ...}}`
    #[serde(default)]
    filters: Option<DateRange>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CooccurrenceParams {
    surface_form: Option<String>,
    observation_id: Option<ObservationId>,
    max_distance: Option<i64>,
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TemporalParams {
    surface_form: Option<String>,
    keyword: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(remote = "Self")]
struct TraverseParams {
    start_id: ObservationId,
    max_hops: Option<usize>,
    min_strength: Option<f64>,
}

deserialize_with_aliases!(
    TraverseParams,
    [
        ("observation_id", "start_id"),
        ("start_observation_id", "start_id"),
    ]
);

#[derive(Debug, Deserialize)]
struct ContradictionParams {
    query: String,
    k: Option<usize>,
}

#[derive(Clone)]
pub struct ToolDispatcher {
    engine: RetrievalEngine,
    config: RetrievalConfig,
}

impl ToolDispatcher {
    pub fn new(engine: RetrievalEngine, config: RetrievalConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &RetrievalEngine {
        &self.engine
    }

    /// Run one tool call
    ///
    /// Unknown tools and unparsable parameters yield an empty list.
    pub async fn dispatch(
        &self,
        tool: &str,
        parameters: &serde_json::Value,
    ) -> Vec<RetrievedObservation> {
        match tool {
            "semantic_search" => match parse::<SemanticSearchParams>(tool, parameters) {
                Some(params) => self.semantic_search(params).await,
                None => Vec::new(),
            },
            "find_cooccurrences" => match parse::<CooccurrenceParams>(tool, parameters) {
                Some(params) => self.find_cooccurrences(params).await,
                None => Vec::new(),
            },
            "temporal_query" => match parse::<TemporalParams>(tool, parameters) {
                Some(params) => self.temporal_query(params).await,
                None => Vec::new(),
            },
            "traverse_graph" => match parse::<TraverseParams>(tool, parameters) {
                Some(params) => {
                    self.engine
                        .traverse_graph(
                            params.start_id,
                            params.max_hops.unwrap_or(self.config.traverse_max_hops),
                            params
                                .min_strength
                                .unwrap_or(self.config.traverse_min_strength),
                        )
                        .await
                }
                None => Vec::new(),
            },
            "find_contradictions" => match parse::<ContradictionParams>(tool, parameters) {
                Some(params) => self.find_contradictions(params).await,
                None => Vec::new(),
            },
            other => {
                warn!(
                    "Unknown tool '{}' requested (known: {}), skipping",
                    other,
                    DISPATCHABLE_TOOLS.join(", ")
                );
                Vec::new()
            }
        }
    }

    async fn semantic_search(&self, params: SemanticSearchParams) -> Vec<RetrievedObservation> {
        let nested = params.filters.unwrap_or_default();
        let filter = ScanFilter {
            doc_id: params.doc_id.or(nested.doc_id),
            start: parse_bound(params.start_date.or(nested.start_date), Bound::Start),
            end: parse_bound(params.end_date.or(nested.end_date), Bound::End),
        };

        self.engine
            .semantic_search(
                &params.query,
                params.k.unwrap_or(self.config.semantic_search_k),
                params.min_similarity.unwrap_or(0.0),
                &filter,
            )
            .await
    }

    async fn find_cooccurrences(&self, params: CooccurrenceParams) -> Vec<RetrievedObservation> {
        let target = match (params.observation_id, params.surface_form) {
            (Some(id), _) => CooccurrenceTarget::Observation(id),
            (None, Some(form)) if !form.trim().is_empty() => CooccurrenceTarget::SurfaceForm(form),
            _ => {
                warn!("find_cooccurrences needs an observation_id or a surface_form");
                return Vec::new();
            }
        };

        self.engine
            .find_cooccurrences(
                &target,
                params.max_distance,
                params.limit.unwrap_or(self.config.cooccurrence_limit),
                self.config.surface_form_seeds,
            )
            .await
    }

    async fn temporal_query(&self, params: TemporalParams) -> Vec<RetrievedObservation> {
        let filter = TemporalFilter {
            surface_form: params.surface_form.filter(|s| !s.is_empty()),
            keyword: params.keyword.filter(|s| !s.is_empty()),
            start: parse_bound(params.start_date, Bound::Start),
            end: parse_bound(params.end_date, Bound::End),
            limit: params.limit.unwrap_or(self.config.temporal_limit),
        };
        self.engine.temporal_query(&filter).await
    }

    async fn find_contradictions(&self, params: ContradictionParams) -> Vec<RetrievedObservation> {
        let contradictions = self
            .engine
            .find_contradictions(
                &params.query,
                params.k.unwrap_or(self.config.contradiction_k),
            )
            .await;

        // Both sides of each pair, each pointing at the other
        let mut flattened = Vec::with_capacity(contradictions.len() * 2);
        for pair in contradictions {
            let (first_id, second_id) = (pair.first.id, pair.second.id);

            let mut first = pair.first;
            first.relation = Relation::Contradiction {
                counterpart: second_id,
                dissimilarity: pair.dissimilarity,
            };
            let mut second = pair.second;
            second.relation = Relation::Contradiction {
                counterpart: first_id,
                dissimilarity: pair.dissimilarity,
            };

            flattened.push(first);
            flattened.push(second);
        }
        flattened
    }
}

fn parse<T: DeserializeOwned>(tool: &str, parameters: &serde_json::Value) -> Option<T> {
    let parameters = if parameters.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        parameters.clone()
    };

    match serde_json::from_value(parameters) {
        Ok(params) => Some(params),
        Err(e) => {
            warn!("Invalid parameters for {}: {}", tool, e);
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Bound {
    Start,
    End,
}

/// Parse an RFC 3339 timestamp or a plain date
///
/// A plain date as an end bound covers the whole day. Unparsable input drops
/// the bound with a warning.
fn parse_bound(raw: Option<String>, bound: Bound) -> Option<DateTime<Utc>> {
    let raw = raw?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }

    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => {
            let time = match bound {
                Bound::Start => NaiveTime::MIN,
                Bound::End => NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN),
            };
            Some(date.and_time(time).and_utc())
        }
        Err(_) => {
            warn!("Ignoring unparsable date '{}'", raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_bound_plain_dates() {
        let start = parse_bound(Some("2023-03-01".to_string()), Bound::Start).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap());

        let end = parse_bound(Some("2023-03-01".to_string()), Bound::End).unwrap();
        assert_eq!(end, Utc.with_ymd_and_hms(2023, 3, 1, 23, 59, 59).unwrap());
    }

    #[test]
    fn test_parse_bound_rfc3339_and_garbage() {
        let parsed = parse_bound(Some("2023-03-01T12:00:00+02:00".to_string()), Bound::Start);
        assert_eq!(
            parsed,
            Some(Utc.with_ymd_and_hms(2023, 3, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(parse_bound(Some("last tuesday".to_string()), Bound::End), None);
        assert_eq!(parse_bound(None, Bound::End), None);
    }

    #[test]
    fn test_traverse_params_alias() {
        let params: TraverseParams =
            parse("traverse_graph", &serde_json::json!({"observation_id": 7})).unwrap();
        assert_eq!(params.start_id, 7);
        assert!(params.max_hops.is_none());
    }

    #[test]
    fn test_traverse_params_prefer_start_id() {
        let params: TraverseParams = parse(
            "traverse_graph",
            &serde_json::json!({"start_id": 3, "observation_id": 9, "start_observation_id": 11}),
        )
        .unwrap();
        assert_eq!(params.start_id, 3);

        let params: TraverseParams = parse(
            "traverse_graph",
            &serde_json::json!({"start_observation_id": 11, "observation_id": 9}),
        )
        .unwrap();
        assert_eq!(params.start_id, 9);
    }

    #[test]
    fn test_semantic_params_require_query() {
        assert!(parse::<SemanticSearchParams>("semantic_search", &serde_json::json!({"k": 5}))
            .is_none());

        let params: SemanticSearchParams = parse(
            "semantic_search",
            &serde_json::json!({"query": "permit", "filters": {"doc_id": "a.txt"}, "extra": 1}),
        )
        .unwrap();
        assert_eq!(params.filters.unwrap().doc_id.as_deref(), Some("a.txt"));
    }

    #[test]
    fn test_null_parameters_default() {
        let params: CooccurrenceParams = parse("find_cooccurrences", &serde_json::Value::Null).unwrap();
        assert!(params.observation_id.is_none());
    }

    #[test]
    fn test_cluster_is_not_dispatchable() {
        assert!(!DISPATCHABLE_TOOLS.contains(&"cluster_observations"));
    }
}
