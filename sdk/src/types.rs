//! Observation and co-occurrence types
//!
//! An observation is an atomic span of evidence extracted from a scanned
//! document. Observations are never merged into canonical entities; the
//! co-occurrence graph is the only structure linking them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned observation identifier
pub type ObservationId = i64;

/// Open metadata map attached to observations and edges
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Atomic evidence unit as persisted in the observation store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,

    /// Source document identifier
    pub doc_id: String,

    pub span_start: Option<i64>,
    pub span_end: Option<i64>,

    /// Candidate name or entity strings found in the span
    pub surface_form: Option<String>,

    /// Span text. Never empty, never modified after ingestion.
    pub context: String,

    pub embedding: Vec<f32>,

    pub doc_timestamp: Option<DateTime<Utc>>,

    /// Reliability of the source in [0, 1]
    pub source_reliability: f64,

    #[serde(default)]
    pub metadata: Metadata,
}

/// Proximity relation between two observations of the same document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooccurrenceEdge {
    pub id: i64,
    pub obs_a_id: ObservationId,
    pub obs_b_id: ObservationId,
    pub doc_id: String,

    /// Characters between the two spans, when both spans are known
    pub distance: Option<i64>,

    /// Edge type tag, e.g. `adjacent_chunks`
    pub kind: String,

    /// Weight in [0, 1]
    pub strength: f64,

    #[serde(default)]
    pub metadata: Metadata,
}

impl CooccurrenceEdge {
    /// The endpoint on the other side of `id`, if `id` touches this edge
    pub fn other(&self, id: ObservationId) -> Option<ObservationId> {
        if self.obs_a_id == id {
            Some(self.obs_b_id)
        } else if self.obs_b_id == id {
            Some(self.obs_a_id)
        } else {
            None
        }
    }
}

/// How a retrieved observation relates to the query that found it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Relation {
    /// Ranked by vector similarity to a query
    Similarity { similarity: f64 },

    /// Direct neighbor over a co-occurrence edge
    Cooccurrence {
        distance: Option<i64>,
        edge_type: String,
        strength: f64,
    },

    /// Selected by a time window
    Temporal,

    /// Reached by graph traversal, `hop` levels from the start node
    Graph { hop: usize },

    /// One side of a candidate contradiction
    Contradiction {
        counterpart: ObservationId,
        dissimilarity: f64,
    },
}

/// An observation as carried in working memory
///
/// The embedding is dropped here: working memory is serialized into session
/// snapshots and handed to the oracle, neither of which needs the vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedObservation {
    pub id: ObservationId,
    pub doc_id: String,
    pub surface_form: Option<String>,
    pub context: String,
    pub doc_timestamp: Option<DateTime<Utc>>,
    pub source_reliability: f64,
    #[serde(default)]
    pub metadata: Metadata,
    pub relation: Relation,
}

impl RetrievedObservation {
    pub fn new(observation: &Observation, relation: Relation) -> Self {
        Self {
            id: observation.id,
            doc_id: observation.doc_id.clone(),
            surface_form: observation.surface_form.clone(),
            context: observation.context.clone(),
            doc_timestamp: observation.doc_timestamp,
            source_reliability: observation.source_reliability,
            metadata: observation.metadata.clone(),
            relation,
        }
    }

    /// Similarity score, when this observation came from a vector search
    pub fn similarity(&self) -> Option<f64> {
        match self.relation {
            Relation::Similarity { similarity } => Some(similarity),
            _ => None,
        }
    }
}
