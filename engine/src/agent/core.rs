//! Reasoning Loop
//!
//! Drives one session through the state machine
//!
//! ```text
//! DECOMPOSE -> GATHER -> DETECT_PATTERNS -> TEST_HYPOTHESES -> META_REASON
//!                 ^                                                |
//!                 +------------------- continue -------------------+
//!                                          synthesize -> SYNTHESIZE -> STOP
//!                                          stop ---------------------> STOP
//! ```
//!
//! Each state runs to completion before the next one starts; tool calls
//! inside GATHER run one after another in planner order.
//!
//! # Termination
//!
//! `meta_reason` increments the iteration counter and `route` stops the
//! session once it reaches `max_iterations`, whatever the oracle says.
//! Before every state the loop also checks, in order, the cancellation flag,
//! the token budget and the wall-clock budget.
//!
//! # Failures
//!
//! A failed oracle call becomes an empty judgment and a failed retrieval an
//! empty result. Only setup (creating the session record) can fail `run`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AgentConfig, MemoryConfig};
use crate::db::SessionRepository;
use crate::oracle::{
    self, MetaRequest, ObservationDigest, Oracle, PatternRequest, PlanRequest, SynthesisRequest,
    TestRequest,
};
use crate::retrieval::ToolDispatcher;

use super::routing::{route, RoutingPolicy, StopReason, Transition};
use super::working_memory::{Hypothesis, SubQuestion, SubQuestionStatus, WorkingMemory};

/// Upper bound on sub-questions kept from a decomposition
const MAX_SUB_QUESTIONS: usize = 5;

/// Upper bound on tool calls executed per gather step
const MAX_TOOL_CALLS: usize = 3;

/// Characters of a claim quoted in the evidence trail
const TRAIL_CLAIM_CHARS: usize = 100;

const FALLBACK_ANSWER: &str = "Unable to determine answer from available evidence.";
const NO_ANSWER: &str = "No answer available";

/// Cooperative cancellation signal, checked between states
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a finished session reports back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub query: String,
    pub answer: String,
    pub summary: Option<String>,
    /// 0-10 scale
    pub confidence: f64,
    pub iterations: u32,
    pub stop_reason: Option<StopReason>,
    pub sub_questions: Vec<SubQuestion>,
    pub hypotheses: Vec<Hypothesis>,
    pub reasoning_chain: Vec<String>,
    pub uncertainties: Vec<String>,
    pub evidence_trail: Vec<String>,
    pub observations_considered: usize,
    pub tokens_used: u64,
    pub duration_ms: u64,
}

impl SessionOutcome {
    pub fn from_memory(memory: &WorkingMemory, elapsed: Duration) -> Self {
        Self {
            session_id: memory.session_id.clone(),
            query: memory.query.clone(),
            answer: memory
                .answer
                .clone()
                .unwrap_or_else(|| NO_ANSWER.to_string()),
            summary: memory.summary.clone(),
            confidence: memory.confidence,
            iterations: memory.iteration,
            stop_reason: memory.stop_reason,
            sub_questions: memory.sub_questions.clone(),
            hypotheses: memory.hypotheses.clone(),
            reasoning_chain: memory.reasoning_chain.clone(),
            uncertainties: memory.uncertainties.clone(),
            evidence_trail: memory.evidence_trail.clone(),
            observations_considered: memory.observations.len(),
            tokens_used: memory.tokens_used,
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Decompose,
    Gather,
    DetectPatterns,
    TestHypotheses,
    MetaReason,
    Synthesize,
}

/// Bounded-memory reasoning loop
pub struct ReasoningLoop {
    oracle: Arc<dyn Oracle>,
    tools: ToolDispatcher,
    policy: RoutingPolicy,
    agent: AgentConfig,
    limits: MemoryConfig,
    sessions: Option<SessionRepository>,
    cancel: CancellationFlag,
}

impl ReasoningLoop {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        tools: ToolDispatcher,
        agent: AgentConfig,
        limits: MemoryConfig,
    ) -> Self {
        Self {
            oracle,
            tools,
            policy: RoutingPolicy::from(&agent),
            agent,
            limits,
            sessions: None,
            cancel: CancellationFlag::new(),
        }
    }

    /// Persist session records and snapshots through `sessions`
    pub fn with_sessions(mut self, sessions: SessionRepository) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Share an externally owned cancellation flag
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Answer `query` in a new session
    pub async fn run(&self, query: &str, session_id: Option<String>) -> Result<SessionOutcome> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        info!("Starting session {}: {}", session_id, query);

        if let Some(sessions) = &self.sessions {
            sessions
                .create(&session_id, query)
                .await
                .context("Failed to create session record")?;
        }

        let memory = WorkingMemory::new(session_id, query);
        Ok(self.drive(memory, State::Decompose).await)
    }

    /// Continue a session from a snapshot
    ///
    /// Sub-questions and hypotheses are kept and the loop re-enters at
    /// GATHER. A snapshot that already finished is reported as it is.
    pub async fn resume(&self, memory: WorkingMemory) -> Result<SessionOutcome> {
        if memory.is_terminal() {
            info!("Session {} already finished", memory.session_id);
            return Ok(SessionOutcome::from_memory(&memory, Duration::ZERO));
        }

        info!(
            "Resuming session {} at iteration {}",
            memory.session_id, memory.iteration
        );
        Ok(self.drive(memory, State::Gather).await)
    }

    async fn drive(&self, mut memory: WorkingMemory, entry: State) -> SessionOutcome {
        let started = Instant::now();
        let oracle_tokens_at_start = self.oracle.tokens_used();
        let tokens_before = memory.tokens_used;
        let mut state = entry;

        loop {
            memory.tokens_used = tokens_before
                + self
                    .oracle
                    .tokens_used()
                    .saturating_sub(oracle_tokens_at_start);

            if let Some(reason) = self.budget_exceeded(&memory, started) {
                info!(
                    "Stopping session {} before {:?}: {}",
                    memory.session_id, state, reason
                );
                memory.stop_reason = Some(reason);
                break;
            }

            debug!(session_id = %memory.session_id, state = ?state, "Entering state");
            state = match state {
                State::Decompose => {
                    self.decompose(&mut memory).await;
                    State::Gather
                }
                State::Gather => {
                    self.gather(&mut memory).await;
                    State::DetectPatterns
                }
                State::DetectPatterns => {
                    self.detect_patterns(&mut memory).await;
                    State::TestHypotheses
                }
                State::TestHypotheses => {
                    self.test_hypotheses(&mut memory).await;
                    State::MetaReason
                }
                State::MetaReason => {
                    self.meta_reason(&mut memory).await;
                    self.save_snapshot(&memory).await;

                    match route(
                        &self.policy,
                        memory.decision,
                        memory.iteration,
                        memory.confidence,
                    ) {
                        Transition::Gather => State::Gather,
                        Transition::Synthesize => State::Synthesize,
                        Transition::Stop(reason) => {
                            info!("Stopping: {}", reason);
                            memory.stop_reason = Some(reason);
                            break;
                        }
                    }
                }
                State::Synthesize => {
                    self.synthesize(&mut memory).await;
                    memory.stop_reason = Some(StopReason::Synthesized);
                    break;
                }
            };
        }

        memory.tokens_used = tokens_before
            + self
                .oracle
                .tokens_used()
                .saturating_sub(oracle_tokens_at_start);

        self.finish(&memory).await;

        info!(
            "Session {} finished after {} iterations (confidence {}, {} tokens)",
            memory.session_id, memory.iteration, memory.confidence, memory.tokens_used
        );
        SessionOutcome::from_memory(&memory, started.elapsed())
    }

    fn budget_exceeded(&self, memory: &WorkingMemory, started: Instant) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        if let Some(max_tokens) = self.agent.max_tokens {
            if memory.tokens_used >= max_tokens {
                return Some(StopReason::TokenBudget);
            }
        }
        if let Some(max_secs) = self.agent.max_session_secs {
            if started.elapsed() >= Duration::from_secs(max_secs) {
                return Some(StopReason::TimeBudget);
            }
        }
        None
    }

    async fn decompose(&self, memory: &mut WorkingMemory) {
        info!("Decomposing query: {}", memory.query);

        let decomposition = or_empty("decompose", self.oracle.decompose(&memory.query).await);

        memory.sub_questions = decomposition
            .sub_questions
            .into_iter()
            .filter(|sq| !sq.text.trim().is_empty())
            .take(MAX_SUB_QUESTIONS)
            .enumerate()
            .map(|(id, sq)| SubQuestion {
                id,
                text: sq.text,
                priority: sq.priority,
                confidence: 0.0,
                status: SubQuestionStatus::Pending,
                reasoning: sq.reasoning,
            })
            .collect();

        let count = memory.sub_questions.len();
        memory.record(format!("Decomposed query into {} sub-questions", count));
        info!("Created {} sub-questions", count);
    }

    async fn gather(&self, memory: &mut WorkingMemory) {
        info!("Gathering observations (iteration {})", memory.iteration);

        let plan = {
            let request = PlanRequest {
                query: &memory.query,
                sub_questions: &memory.sub_questions,
                hypotheses: &memory.hypotheses,
                observation_count: memory.observations.len(),
            };
            or_empty("plan_tools", self.oracle.plan_tools(&request).await)
        };

        let mut gathered = Vec::new();
        for call in plan.tool_calls.into_iter().take(MAX_TOOL_CALLS) {
            info!("Executing tool: {} with params {}", call.tool, call.parameters);
            let results = self.tools.dispatch(&call.tool, &call.parameters).await;
            memory.record(format!(
                "Tool {}: {} -> {} observations",
                call.tool,
                call.reasoning,
                results.len()
            ));
            gathered.extend(results);
        }

        let added = gathered.len();
        let cap = self.limits.max_observations;
        let evicted = memory.push_observations(gathered, cap);
        if evicted > 0 {
            memory.record(format!(
                "Pruned {} old observations, kept last {}",
                evicted, cap
            ));
            info!("Pruned observations: kept {}, removed {}", cap, evicted);
        }

        info!(
            "Gathered {} new observations (total: {})",
            added,
            memory.observations.len()
        );
    }

    async fn detect_patterns(&self, memory: &mut WorkingMemory) {
        info!("Detecting patterns");

        let digests: Vec<ObservationDigest> = memory
            .recent_observations(self.limits.pattern_window)
            .iter()
            .map(|obs| ObservationDigest {
                id: obs.id,
                doc_id: obs.doc_id.clone(),
                context: truncate_chars(&obs.context, self.limits.observation_context_limit),
                similarity: obs.similarity(),
            })
            .collect();

        let report = {
            let request = PatternRequest {
                observations: &digests,
                sub_questions: &memory.sub_questions,
            };
            or_empty(
                "detect_patterns",
                self.oracle.detect_patterns(&request).await,
            )
        };

        let proposed = report.patterns.len();
        for pattern in report.patterns {
            if pattern.claim.trim().is_empty() {
                continue;
            }

            let confidence = clamp_score(pattern.confidence, 1.0);
            let sub_question = pattern
                .sub_question
                .and_then(|index| usize::try_from(index).ok())
                .filter(|index| *index < memory.sub_questions.len());

            memory.record(format!(
                "Formed hypothesis: {}... (confidence: {})",
                truncate_chars(&pattern.claim, TRAIL_CLAIM_CHARS),
                confidence
            ));

            let id = memory.allocate_hypothesis_id();
            memory.hypotheses.push(Hypothesis {
                id,
                claim: pattern.claim,
                confidence,
                evidence_ids: pattern.evidence_ids,
                contradicting_ids: Vec::new(),
                sub_question,
                impact: pattern.reasoning,
                tested_at_iteration: memory.iteration,
                num_tests: 1,
            });
        }

        let cap = self.limits.max_hypotheses;
        if memory.prune_hypotheses(cap) {
            memory.record(format!("Pruned to top {} hypotheses by confidence", cap));
        }

        info!("Detected {} patterns", proposed);
    }

    async fn test_hypotheses(&self, memory: &mut WorkingMemory) {
        if memory.hypotheses.is_empty() {
            return;
        }
        info!("Testing {} hypotheses", memory.hypotheses.len());

        let report = {
            let request = TestRequest {
                hypotheses: &memory.hypotheses,
                observations: memory.recent_observations(self.limits.testing_window),
            };
            or_empty(
                "test_hypotheses",
                self.oracle.test_hypotheses(&request).await,
            )
        };

        let iteration = memory.iteration;
        for evaluation in report.evaluations {
            let Some(hypothesis) = usize::try_from(evaluation.index)
                .ok()
                .and_then(|index| memory.hypotheses.get_mut(index))
            else {
                debug!(
                    "Ignoring evaluation for hypothesis index {}",
                    evaluation.index
                );
                continue;
            };

            hypothesis.confidence = clamp_score(evaluation.new_confidence, 1.0);
            hypothesis.num_tests += 1;
            hypothesis.tested_at_iteration = iteration;

            let line = format!(
                "Updated hypothesis {}: {} -> confidence {}",
                hypothesis.id, evaluation.verdict, hypothesis.confidence
            );
            memory.record(line);
        }
    }

    async fn meta_reason(&self, memory: &mut WorkingMemory) {
        memory.iteration += 1;
        info!("Meta-reasoning (iteration {})", memory.iteration);

        let judgment = {
            let request = MetaRequest {
                query: &memory.query,
                sub_questions: &memory.sub_questions,
                hypotheses: &memory.hypotheses,
                iteration: memory.iteration,
                max_iterations: self.policy.max_iterations,
            };
            or_empty("meta_reason", self.oracle.meta_reason(&request).await)
        };

        memory.confidence = clamp_score(judgment.confidence_score, 10.0);
        memory.decision = judgment.decision;
        memory.missing_information = judgment.missing_information;

        let line = format!(
            "Meta-reasoning: confidence={}, decision={}",
            memory.confidence, memory.decision
        );
        memory.record(line);
        memory.cap_trail(self.limits.max_evidence_trail, self.limits.trail_head);

        info!(
            "Meta-reasoning: {} (confidence: {})",
            memory.decision, memory.confidence
        );
    }

    async fn synthesize(&self, memory: &mut WorkingMemory) {
        info!("Synthesizing answer");

        let confident = memory.confident_hypotheses(self.agent.high_confidence_hypothesis);
        let synthesis = {
            let request = SynthesisRequest {
                query: &memory.query,
                sub_questions: &memory.sub_questions,
                hypotheses: &confident,
                observations: memory.recent_observations(self.limits.synthesis_window),
                evidence_trail: &memory.evidence_trail,
            };
            or_empty("synthesize", self.oracle.synthesize(&request).await)
        };

        memory.answer = Some(
            synthesis
                .answer
                .filter(|answer| !answer.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_ANSWER.to_string()),
        );
        memory.summary = synthesis.summary;
        memory.reasoning_chain = synthesis.reasoning_chain;
        memory.uncertainties = synthesis.uncertainties;
        if let Some(confidence) = synthesis.confidence {
            memory.confidence = clamp_score(confidence, 10.0);
        }

        memory.record("Synthesized final answer");
        info!("Answer synthesized");
    }

    async fn save_snapshot(&self, memory: &WorkingMemory) {
        if let Some(sessions) = &self.sessions {
            if let Err(e) = sessions.save_snapshot(memory).await {
                warn!("Failed to save snapshot of {}: {:#}", memory.session_id, e);
            }
        }
    }

    async fn finish(&self, memory: &WorkingMemory) {
        let Some(sessions) = &self.sessions else {
            return;
        };

        let result = if memory.stop_reason == Some(StopReason::Cancelled) {
            sessions.fail(memory).await
        } else {
            sessions.complete(memory).await
        };
        if let Err(e) = result {
            warn!("Failed to record end of session {}: {:#}", memory.session_id, e);
        }
    }
}

/// Replace a failed judgment with the empty one
fn or_empty<T: Default>(call: &str, result: oracle::Result<T>) -> T {
    match result {
        Ok(judgment) => judgment,
        Err(e) => {
            warn!("{} returned no usable judgment: {}", call, e);
            T::default()
        }
    }
}

/// Clamp into `[0, max]`; NaN counts as 0
fn clamp_score(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, max)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
