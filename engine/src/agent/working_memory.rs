//! Working Memory for the reasoning loop
//!
//! Holds the whole state of one reasoning session: the query, its
//! sub-questions, the evidence gathered so far, the hypotheses formed from it
//! and a human-readable evidence trail. Every collection is bounded; the
//! pruning helpers here are the only way the loop shrinks them.
//!
//! The struct serializes to JSON as-is and that JSON is the session snapshot
//! stored in `query_sessions.state_snapshot`.

use chrono::{DateTime, Utc};
use ecu_sdk::types::{ObservationId, RetrievedObservation};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;

use super::routing::{Decision, StopReason};

/// How much a sub-question matters to the final answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Essential,
    Conditional,
    #[default]
    Optional,
}

impl Priority {
    /// Parse a priority label; unknown labels fall back to `Optional`
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ESSENTIAL" => Priority::Essential,
            "CONDITIONAL" => Priority::Conditional,
            _ => Priority::Optional,
        }
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(raw.as_str().map(Priority::parse).unwrap_or_default())
    }
}

/// Progress of a sub-question
///
/// Set to `Pending` at decomposition. No step moves it afterwards; the field
/// is kept so snapshots stay compatible once something does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubQuestionStatus {
    #[default]
    Pending,
    InProgress,
    Answered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuestion {
    pub id: usize,
    pub text: String,
    pub priority: Priority,
    /// Never updated after decomposition, see `SubQuestionStatus`
    pub confidence: f64,
    pub status: SubQuestionStatus,
    #[serde(default)]
    pub reasoning: String,
}

/// A candidate claim with its evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Unique within the session, never reused after pruning
    pub id: u64,
    pub claim: String,
    /// In [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub evidence_ids: Vec<ObservationId>,
    #[serde(default)]
    pub contradicting_ids: Vec<ObservationId>,
    /// Index of the sub-question this hypothesis serves
    pub sub_question: Option<usize>,
    #[serde(default)]
    pub impact: String,
    pub tested_at_iteration: u32,
    pub num_tests: u32,
}

/// Per-session state threaded through the reasoning loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemory {
    pub session_id: String,
    pub query: String,

    pub sub_questions: Vec<SubQuestion>,

    /// Evidence in the order it was gathered, oldest first
    pub observations: Vec<RetrievedObservation>,

    pub hypotheses: Vec<Hypothesis>,

    pub evidence_trail: Vec<String>,

    /// Completed meta-reasoning rounds
    pub iteration: u32,

    /// Latest confidence score on the 0-10 scale
    pub confidence: f64,

    pub decision: Decision,

    #[serde(default)]
    pub missing_information: Vec<String>,

    pub stop_reason: Option<StopReason>,

    pub answer: Option<String>,

    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default)]
    pub reasoning_chain: Vec<String>,

    #[serde(default)]
    pub uncertainties: Vec<String>,

    pub created_at: DateTime<Utc>,

    /// Oracle tokens spent by this session
    pub tokens_used: u64,

    #[serde(default)]
    next_hypothesis_id: u64,
}

impl WorkingMemory {
    /// Fresh state for a new session: empty collections, iteration 0
    pub fn new(session_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            query: query.into(),
            sub_questions: Vec::new(),
            observations: Vec::new(),
            hypotheses: Vec::new(),
            evidence_trail: Vec::new(),
            iteration: 0,
            confidence: 0.0,
            decision: Decision::Continue,
            missing_information: Vec::new(),
            stop_reason: None,
            answer: None,
            summary: None,
            reasoning_chain: Vec::new(),
            uncertainties: Vec::new(),
            created_at: Utc::now(),
            tokens_used: 0,
            next_hypothesis_id: 0,
        }
    }

    /// A session is over once it has an answer or a stop reason
    pub fn is_terminal(&self) -> bool {
        self.answer.is_some() || self.stop_reason.is_some()
    }

    /// Append a line to the evidence trail
    pub fn record(&mut self, line: impl Into<String>) {
        self.evidence_trail.push(line.into());
    }

    /// Hand out the next hypothesis id
    pub fn allocate_hypothesis_id(&mut self) -> u64 {
        // Snapshots written before the counter existed restart past the max id
        if let Some(max) = self.hypotheses.iter().map(|h| h.id).max() {
            self.next_hypothesis_id = self.next_hypothesis_id.max(max + 1);
        }
        let id = self.next_hypothesis_id;
        self.next_hypothesis_id += 1;
        id
    }

    /// Append observations, then evict the oldest ones beyond `cap`
    ///
    /// Returns how many were evicted. The survivors are exactly the `cap`
    /// most recently appended, in their original order.
    pub fn push_observations(
        &mut self,
        observations: impl IntoIterator<Item = RetrievedObservation>,
        cap: usize,
    ) -> usize {
        self.observations.extend(observations);

        if self.observations.len() <= cap {
            return 0;
        }

        let evicted = self.observations.len() - cap;
        self.observations.drain(..evicted);
        evicted
    }

    /// Keep the `cap` most confident hypotheses
    ///
    /// The sort is stable, so equal confidences keep their original order.
    /// Returns true when anything was dropped.
    pub fn prune_hypotheses(&mut self, cap: usize) -> bool {
        if self.hypotheses.len() <= cap {
            return false;
        }

        self.hypotheses.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });
        self.hypotheses.truncate(cap);
        true
    }

    /// Bound the evidence trail to `max` lines
    ///
    /// Keeps the first `head` lines and the most recent `max - head`,
    /// dropping the middle. Returns how many lines were dropped.
    pub fn cap_trail(&mut self, max: usize, head: usize) -> usize {
        let len = self.evidence_trail.len();
        if len <= max {
            return 0;
        }

        let head = head.min(max);
        let tail = max - head;
        let dropped = len - max;
        self.evidence_trail.drain(head..len - tail);
        dropped
    }

    /// The `n` most recently gathered observations
    pub fn recent_observations(&self, n: usize) -> &[RetrievedObservation] {
        let start = self.observations.len().saturating_sub(n);
        &self.observations[start..]
    }

    /// Hypotheses at or above `threshold`, in list order
    pub fn confident_hypotheses(&self, threshold: f64) -> Vec<Hypothesis> {
        self.hypotheses
            .iter()
            .filter(|h| h.confidence >= threshold)
            .cloned()
            .collect()
    }
}
