//! Prompt templates for the LLM oracle
//!
//! Each function renders one user prompt. The JSON shapes described in the
//! prompts match the response types in `oracle`.

use serde::Serialize;

use super::{MetaRequest, PatternRequest, PlanRequest, SynthesisRequest, TestRequest};

pub const SYSTEM_PROMPT: &str =
    "You are an expert reasoning system. Always respond with valid JSON.";

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "[]".to_string())
}

pub fn decompose(query: &str) -> String {
    format!(
        r#"Break the question below into 2 to 5 sub-questions that together answer it.

For each sub-question give:
- "text": the sub-question
- "priority": ESSENTIAL (must be answered), CONDITIONAL (depends on another answer) or OPTIONAL (useful context)
- "reasoning": why it is needed

Question: {query}

Respond with JSON:
{{"sub_questions": [{{"text": "...", "priority": "ESSENTIAL", "reasoning": "..."}}]}}"#
    )
}

pub fn plan_tools(request: &PlanRequest<'_>) -> String {
    format!(
        r#"Decide which evidence to gather next.

Question: {query}

Sub-questions:
{sub_questions}

Current hypotheses:
{hypotheses}

Observations gathered so far: {count}

Available tools:
- semantic_search {{"query": str, "k": int, "min_similarity": float, "doc_id": str, "start_date": "YYYY-MM-DD", "end_date": "YYYY-MM-DD"}}: observations similar in meaning to the query
- find_cooccurrences {{"surface_form": str}} or {{"observation_id": int, "max_distance": int, "limit": int}}: observations appearing near a name or another observation
- temporal_query {{"surface_form": str, "keyword": str, "start_date": "YYYY-MM-DD", "end_date": "YYYY-MM-DD", "limit": int}}: observations in a time window, oldest first
- traverse_graph {{"start_id": int, "max_hops": int, "min_strength": float}}: walk the co-occurrence graph from an observation
- find_contradictions {{"query": str, "k": int}}: pairs of similar observations that disagree

Pick 1 to 3 calls aimed at the sub-questions with the least evidence and the hypotheses that most need testing.

Respond with JSON:
{{"tool_calls": [{{"tool": "semantic_search", "parameters": {{"query": "...", "k": 20}}, "reasoning": "..."}}]}}"#,
        query = request.query,
        sub_questions = pretty(request.sub_questions),
        hypotheses = pretty(request.hypotheses),
        count = request.observation_count,
    )
}

pub fn detect_patterns(request: &PatternRequest<'_>) -> String {
    format!(
        r#"Look for patterns in these observations: names that may refer to the same person or thing, changes over time, relationships, and inconsistencies.

Observations:
{observations}

Sub-questions (refer to them by position, starting at 0):
{sub_questions}

For every pattern give the claim, the sub-question it helps with, a confidence between 0.0 and 1.0, and the ids of the supporting observations.

Respond with JSON:
{{"patterns": [{{"claim": "...", "relevant_to_subquestion": 0, "confidence": 0.7, "evidence_ids": [1, 2], "reasoning": "..."}}]}}"#,
        observations = pretty(request.observations),
        sub_questions = pretty(request.sub_questions),
    )
}

pub fn test_hypotheses(request: &TestRequest<'_>) -> String {
    format!(
        r#"Test these hypotheses against the latest evidence.

Hypotheses (refer to them by position, starting at 0):
{hypotheses}

Recent observations:
{observations}

For each hypothesis decide whether the evidence supports it, contradicts it or is neutral, and give an updated confidence between 0.0 and 1.0. Above 0.85 means accept, below 0.15 means reject.

Respond with JSON:
{{"evaluations": [{{"hypothesis_id": 0, "verdict": "support", "new_confidence": 0.8, "reasoning": "..."}}]}}"#,
        hypotheses = pretty(request.hypotheses),
        observations = pretty(request.observations),
    )
}

pub fn meta_reason(request: &MetaRequest<'_>) -> String {
    format!(
        r#"Judge whether the question can be answered yet.

Question: {query}

Sub-questions:
{sub_questions}

Hypotheses:
{hypotheses}

Iterations completed: {iteration} of at most {max_iterations}

Rate your confidence from 0 to 10 and decide:
- SYNTHESIZE when confidence is 8 or more
- STOP when confidence stays under 5 after 5 iterations, or further searching is unlikely to help
- CONTINUE otherwise

Respond with JSON:
{{"can_answer": false, "confidence_score": 5.0, "missing_information": "...", "decision": "CONTINUE", "reasoning": "...", "next_action": "..."}}"#,
        query = request.query,
        sub_questions = pretty(request.sub_questions),
        hypotheses = pretty(request.hypotheses),
        iteration = request.iteration,
        max_iterations = request.max_iterations,
    )
}

pub fn synthesize(request: &SynthesisRequest<'_>) -> String {
    format!(
        r#"Write the final answer from the accumulated evidence.

Question: {query}

Sub-questions:
{sub_questions}

High-confidence hypotheses:
{hypotheses}

Observations:
{observations}

Evidence trail:
{trail}

Lead with the direct answer, cite observation ids for the supporting evidence, list the reasoning steps, and state open uncertainties. Where sources contradict each other, present both sides.

Respond with JSON:
{{"answer": "...", "summary": "...", "evidence": [{{"claim": "...", "observation_ids": [1], "reasoning": "..."}}], "reasoning_chain": ["..."], "uncertainties": ["..."], "confidence": 8.0}}"#,
        query = request.query,
        sub_questions = pretty(request.sub_questions),
        hypotheses = pretty(request.hypotheses),
        observations = pretty(request.observations),
        trail = pretty(request.evidence_trail),
    )
}
