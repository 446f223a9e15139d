//! Retrieval engine
//!
//! Six read-only query operations over the observation store. None of them
//! fails: a storage or embedding error is logged and the operation returns
//! an empty result, which the reasoning loop reads as "no evidence found".

use anyhow::Result;
use ecu_sdk::errors::EngineError;
use ecu_sdk::types::{Observation, ObservationId, Relation, RetrievedObservation};
use ecu_sdk::vector::cosine_similarity;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info};

use crate::db::{ObservationStore, ScanFilter, TemporalFilter};
use crate::embedding::Embedder;

pub mod tools;

pub use tools::ToolDispatcher;

/// Keyword pairs whose cross-presence marks a candidate contradiction
pub const ANTONYM_PAIRS: [(&str, &str); 6] = [
    ("yes", "no"),
    ("true", "false"),
    ("approved", "denied"),
    ("confirmed", "refuted"),
    ("guilty", "innocent"),
    ("present", "absent"),
];

/// What `find_cooccurrences` starts from
#[derive(Debug, Clone, PartialEq)]
pub enum CooccurrenceTarget {
    /// Substring of a surface form; matching observations become the seeds
    SurfaceForm(String),
    Observation(ObservationId),
}

/// A pair of similar observations that use opposing keywords
///
/// This is a keyword heuristic, not an entailment check: "no" matches inside
/// "notice" and "present" inside "presented".
#[derive(Debug, Clone, PartialEq)]
pub struct Contradiction {
    pub first: RetrievedObservation,
    pub second: RetrievedObservation,
    pub keywords: (&'static str, &'static str),
    /// `1 - similarity` of the second observation
    pub dissimilarity: f64,
}

#[derive(Clone)]
pub struct RetrievalEngine {
    store: ObservationStore,
    embedder: Arc<dyn Embedder>,
}

impl RetrievalEngine {
    pub fn new(store: ObservationStore, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    pub fn store(&self) -> &ObservationStore {
        &self.store
    }

    /// Rank observations by cosine similarity to `query`
    ///
    /// Results are sorted by descending similarity (ties by ascending id),
    /// all have similarity at least `min_similarity`, and there are at most
    /// `k` of them.
    pub async fn semantic_search(
        &self,
        query: &str,
        k: usize,
        min_similarity: f64,
        filter: &ScanFilter,
    ) -> Vec<RetrievedObservation> {
        if k == 0 {
            return Vec::new();
        }

        match self
            .try_semantic_search(query, k, min_similarity, filter)
            .await
        {
            Ok(results) => {
                info!(
                    "Semantic search for '{}' returned {} results",
                    preview(query),
                    results.len()
                );
                results
            }
            Err(e) => {
                error!("Semantic search error: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn try_semantic_search(
        &self,
        query: &str,
        k: usize,
        min_similarity: f64,
        filter: &ScanFilter,
    ) -> Result<Vec<RetrievedObservation>> {
        let query_vector = self.embedder.embed(query).await.map_err(EngineError::from)?;
        if query_vector.len() != self.store.dimension() {
            return Err(EngineError::DimensionMismatch {
                expected: self.store.dimension(),
                actual: query_vector.len(),
            }
            .into());
        }

        // Scan order is ascending id; the stable sort keeps it among ties.
        // Rows with a non-finite similarity cannot be ranked and are dropped.
        let mut scored: Vec<(f64, Observation)> = self
            .store
            .scan(filter)
            .await?
            .into_iter()
            .map(|obs| (cosine_similarity(&query_vector, &obs.embedding), obs))
            .filter(|(similarity, _)| similarity.is_finite())
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .filter(|(similarity, _)| *similarity >= min_similarity)
            .take(k)
            .map(|(similarity, obs)| {
                RetrievedObservation::new(&obs, Relation::Similarity { similarity })
            })
            .collect())
    }

    /// Observations linked by a co-occurrence edge
    ///
    /// For a single observation, returns up to `limit` neighbors in edge
    /// order. For a surface form, resolves up to `seeds` matching
    /// observations and unions their neighbor lists, keeping the first
    /// occurrence of each observation. With `max_distance`, edges of unknown
    /// distance are skipped.
    pub async fn find_cooccurrences(
        &self,
        target: &CooccurrenceTarget,
        max_distance: Option<i64>,
        limit: usize,
        seeds: usize,
    ) -> Vec<RetrievedObservation> {
        let result = match target {
            CooccurrenceTarget::Observation(id) => {
                self.neighbors_of(*id, max_distance, limit).await
            }
            CooccurrenceTarget::SurfaceForm(form) => {
                self.neighbors_of_surface_form(form, max_distance, limit, seeds)
                    .await
            }
        };

        match result {
            Ok(results) => {
                info!("Found {} co-occurrences", results.len());
                results
            }
            Err(e) => {
                error!("Find co-occurrences error: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn neighbors_of(
        &self,
        id: ObservationId,
        max_distance: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RetrievedObservation>> {
        let edges: Vec<_> = self
            .store
            .neighbors(id, 0.0)
            .await?
            .into_iter()
            .filter(|edge| match max_distance {
                Some(max) => edge.distance.is_some_and(|d| d <= max),
                None => true,
            })
            .filter_map(|edge| edge.other(id).map(|other| (other, edge)))
            .take(limit)
            .collect();

        let ids: Vec<ObservationId> = edges.iter().map(|(other, _)| *other).collect();
        let found: HashMap<ObservationId, Observation> = self
            .store
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|obs| (obs.id, obs))
            .collect();

        Ok(edges
            .into_iter()
            .filter_map(|(other, edge)| {
                found.get(&other).map(|obs| {
                    RetrievedObservation::new(
                        obs,
                        Relation::Cooccurrence {
                            distance: edge.distance,
                            edge_type: edge.kind,
                            strength: edge.strength,
                        },
                    )
                })
            })
            .collect())
    }

    async fn neighbors_of_surface_form(
        &self,
        surface_form: &str,
        max_distance: Option<i64>,
        limit: usize,
        seeds: usize,
    ) -> Result<Vec<RetrievedObservation>> {
        let seed_observations = self.store.find_by_surface_form(surface_form, seeds).await?;

        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for seed in seed_observations {
            for neighbor in self.neighbors_of(seed.id, max_distance, limit).await? {
                if seen.insert(neighbor.id) {
                    results.push(neighbor);
                }
            }
        }
        Ok(results)
    }

    /// Observations in a time window, oldest first, undated last
    pub async fn temporal_query(&self, filter: &TemporalFilter) -> Vec<RetrievedObservation> {
        match self.store.temporal(filter).await {
            Ok(observations) => {
                info!("Temporal query returned {} results", observations.len());
                observations
                    .iter()
                    .map(|obs| RetrievedObservation::new(obs, Relation::Temporal))
                    .collect()
            }
            Err(e) => {
                error!("Temporal query error: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Breadth-first walk of the co-occurrence graph
    ///
    /// Returns the start node at hop 0 and every node first reached at hop
    /// `1..=max_hops` over edges with strength at least `min_strength`. A
    /// node is visited once even on cyclic graphs. An unknown start id
    /// yields nothing.
    ///
    /// `max_hops` is inclusive: with `max_hops = 2`, nodes two edges away
    /// are returned, not only the nodes one edge away.
    pub async fn traverse_graph(
        &self,
        start: ObservationId,
        max_hops: usize,
        min_strength: f64,
    ) -> Vec<RetrievedObservation> {
        match self.try_traverse(start, max_hops, min_strength).await {
            Ok(results) => {
                info!(
                    "Graph traversal from {} found {} observations",
                    start,
                    results.len()
                );
                results
            }
            Err(e) => {
                error!("Graph traversal error: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn try_traverse(
        &self,
        start: ObservationId,
        max_hops: usize,
        min_strength: f64,
    ) -> Result<Vec<RetrievedObservation>> {
        let Some(origin) = self.store.get(start).await? else {
            return Ok(Vec::new());
        };

        let mut results = vec![RetrievedObservation::new(&origin, Relation::Graph { hop: 0 })];
        let mut visited = HashSet::from([start]);
        let mut frontier = vec![start];

        for hop in 1..=max_hops {
            let mut next = Vec::new();
            for id in &frontier {
                for edge in self.store.neighbors(*id, min_strength).await? {
                    if let Some(other) = edge.other(*id) {
                        if visited.insert(other) {
                            next.push(other);
                        }
                    }
                }
            }

            if next.is_empty() {
                break;
            }

            results.extend(
                self.store
                    .get_many(&next)
                    .await?
                    .iter()
                    .map(|obs| RetrievedObservation::new(obs, Relation::Graph { hop })),
            );
            frontier = next;
        }

        Ok(results)
    }

    /// Greedy single-pass clustering by cosine similarity to the seed
    ///
    /// The output partitions the distinct input ids: duplicates collapse to
    /// their first occurrence, and ids without a stored embedding become
    /// singleton clusters.
    pub async fn cluster_observations(
        &self,
        ids: &[ObservationId],
        threshold: f64,
    ) -> Vec<Vec<ObservationId>> {
        let mut seen = HashSet::new();
        let distinct: Vec<ObservationId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let embeddings: HashMap<ObservationId, Vec<f32>> = match self.store.get_many(&distinct).await
        {
            Ok(observations) => observations
                .into_iter()
                .map(|obs| (obs.id, obs.embedding))
                .collect(),
            Err(e) => {
                error!("Clustering error: {:#}", e);
                return Vec::new();
            }
        };

        let clusters = greedy_clusters(&distinct, &embeddings, threshold);
        info!(
            "Clustered {} observations into {} clusters",
            distinct.len(),
            clusters.len()
        );
        clusters
    }

    /// Pairs among the top `2k` semantic matches that carry opposing keywords
    ///
    /// Approximate: see `Contradiction`.
    pub async fn find_contradictions(&self, query: &str, k: usize) -> Vec<Contradiction> {
        let observations = self
            .semantic_search(query, k.saturating_mul(2), 0.0, &ScanFilter::default())
            .await;

        let contradictions = contradiction_pairs(&observations);
        info!("Found {} potential contradictions", contradictions.len());
        contradictions
    }
}

fn greedy_clusters(
    ids: &[ObservationId],
    embeddings: &HashMap<ObservationId, Vec<f32>>,
    threshold: f64,
) -> Vec<Vec<ObservationId>> {
    let mut assigned = HashSet::new();
    let mut clusters = Vec::new();

    for (i, id) in ids.iter().enumerate() {
        if !assigned.insert(*id) {
            continue;
        }
        let mut cluster = vec![*id];

        if let Some(seed) = embeddings.get(id) {
            for other in &ids[i + 1..] {
                if assigned.contains(other) {
                    continue;
                }
                let Some(candidate) = embeddings.get(other) else {
                    continue;
                };
                if cosine_similarity(seed, candidate) >= threshold {
                    assigned.insert(*other);
                    cluster.push(*other);
                }
            }
        }

        clusters.push(cluster);
    }

    clusters
}

fn contradiction_pairs(observations: &[RetrievedObservation]) -> Vec<Contradiction> {
    let lowered: Vec<String> = observations
        .iter()
        .map(|obs| obs.context.to_lowercase())
        .collect();

    let mut contradictions = Vec::new();
    for i in 0..observations.len() {
        for j in i + 1..observations.len() {
            let (a, b) = (&lowered[i], &lowered[j]);
            let matched = ANTONYM_PAIRS.iter().find(|(x, y)| {
                (a.contains(x) && b.contains(y)) || (a.contains(y) && b.contains(x))
            });

            if let Some(keywords) = matched {
                let similarity = observations[j].similarity().unwrap_or(0.0);
                contradictions.push(Contradiction {
                    first: observations[i].clone(),
                    second: observations[j].clone(),
                    keywords: *keywords,
                    dissimilarity: 1.0 - similarity,
                });
            }
        }
    }
    contradictions
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(50).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn retrieved(id: ObservationId, context: &str, similarity: f64) -> RetrievedObservation {
        RetrievedObservation {
            id,
            doc_id: "doc".to_string(),
            surface_form: None,
            context: context.to_string(),
            doc_timestamp: None,
            source_reliability: 1.0,
            metadata: Default::default(),
            relation: Relation::Similarity { similarity },
        }
    }

    #[test]
    fn test_contradiction_pairs() {
        let observations = vec![
            retrieved(1, "The permit was APPROVED on Monday", 0.9),
            retrieved(2, "The permit was denied by the board", 0.8),
            retrieved(3, "Weather was mild", 0.5),
        ];

        let found = contradiction_pairs(&observations);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].first.id, 1);
        assert_eq!(found[0].second.id, 2);
        assert_eq!(found[0].keywords, ("approved", "denied"));
        assert!((found[0].dissimilarity - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_contradiction_first_pair_wins() {
        let observations = vec![
            retrieved(1, "yes, it is true", 0.9),
            retrieved(2, "no, that is false", 0.7),
        ];
        let found = contradiction_pairs(&observations);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].keywords, ("yes", "no"));
    }

    #[test]
    fn test_greedy_clusters() {
        let embeddings = HashMap::from([
            (1, vec![1.0, 0.0]),
            (2, vec![0.0, 1.0]),
            (3, vec![0.9, 0.1]),
        ]);
        let clusters = greedy_clusters(&[1, 2, 3, 4], &embeddings, 0.7);
        assert_eq!(clusters, vec![vec![1, 3], vec![2], vec![4]]);
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short"), "short");
        assert_eq!(preview(&"x".repeat(60)), format!("{}...", "x".repeat(50)));
    }

    proptest! {
        #[test]
        fn prop_clusters_partition_input(
            vectors in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 3), 0..25),
            extra_ids in prop::collection::vec(0i64..40, 0..10),
            threshold in -1.0f64..1.0,
        ) {
            let embeddings: HashMap<ObservationId, Vec<f32>> = vectors
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i as ObservationId, v))
                .collect();
            let mut seen = HashSet::new();
            let ids: Vec<ObservationId> = (0..embeddings.len() as ObservationId)
                .chain(extra_ids)
                .filter(|id| seen.insert(*id))
                .collect();

            let clusters = greedy_clusters(&ids, &embeddings, threshold);

            let mut flattened: Vec<ObservationId> = clusters.into_iter().flatten().collect();
            flattened.sort_unstable();
            let mut expected = ids.clone();
            expected.sort_unstable();
            prop_assert_eq!(flattened, expected);
        }
    }
}
