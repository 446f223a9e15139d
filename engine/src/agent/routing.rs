//! Routing after meta-reasoning
//!
//! `route` is a pure function of the routing policy, the oracle's decision,
//! the iteration counter and the confidence score. The reasoning loop calls
//! it once per iteration, right after `meta_reason`.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::config::AgentConfig;

/// What the oracle wants to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    #[default]
    Continue,
    Stop,
    Synthesize,
}

impl Decision {
    /// Parse a decision label; anything unrecognised means keep going
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STOP" => Decision::Stop,
            "SYNTHESIZE" | "SYNTHESISE" => Decision::Synthesize,
            _ => Decision::Continue,
        }
    }
}

impl<'de> Deserialize<'de> for Decision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(raw.as_str().map(Decision::parse).unwrap_or_default())
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Continue => write!(f, "CONTINUE"),
            Decision::Stop => write!(f, "STOP"),
            Decision::Synthesize => write!(f, "SYNTHESIZE"),
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxIterations,
    OracleStop,
    LowConfidence,
    Synthesized,
    TokenBudget,
    TimeBudget,
    Cancelled,
}

impl StopReason {
    pub fn as_str(&self) -> &str {
        match self {
            StopReason::MaxIterations => "max_iterations",
            StopReason::OracleStop => "oracle_stop",
            StopReason::LowConfidence => "low_confidence",
            StopReason::Synthesized => "synthesized",
            StopReason::TokenBudget => "token_budget",
            StopReason::TimeBudget => "time_budget",
            StopReason::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "max_iterations" => Some(StopReason::MaxIterations),
            "oracle_stop" => Some(StopReason::OracleStop),
            "low_confidence" => Some(StopReason::LowConfidence),
            "synthesized" => Some(StopReason::Synthesized),
            "token_budget" => Some(StopReason::TokenBudget),
            "time_budget" => Some(StopReason::TimeBudget),
            "cancelled" => Some(StopReason::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Next state after meta-reasoning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Back to evidence gathering
    Gather,
    Synthesize,
    Stop(StopReason),
}

/// Numeric thresholds for `route`
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingPolicy {
    pub max_iterations: u32,
    /// Confidence (0-10) at or above which the loop synthesizes regardless of the decision
    pub synthesize_confidence: f64,
    /// Confidence (0-10) below which the loop gives up...
    pub give_up_confidence: f64,
    /// ...once at least this many iterations have run
    pub give_up_after_iterations: u32,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            synthesize_confidence: 8.0,
            give_up_confidence: 5.0,
            give_up_after_iterations: 5,
        }
    }
}

impl From<&AgentConfig> for RoutingPolicy {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            synthesize_confidence: config.synthesize_confidence,
            give_up_confidence: config.give_up_confidence,
            give_up_after_iterations: config.give_up_after_iterations,
        }
    }
}

/// Pick the next state
///
/// The iteration ceiling wins over everything else, then a synthesize
/// decision or a high enough confidence, then an explicit stop or a low
/// confidence after enough iterations.
pub fn route(
    policy: &RoutingPolicy,
    decision: Decision,
    iteration: u32,
    confidence: f64,
) -> Transition {
    if iteration >= policy.max_iterations {
        return Transition::Stop(StopReason::MaxIterations);
    }

    if decision == Decision::Synthesize || confidence >= policy.synthesize_confidence {
        return Transition::Synthesize;
    }

    if decision == Decision::Stop {
        return Transition::Stop(StopReason::OracleStop);
    }

    if confidence < policy.give_up_confidence && iteration >= policy.give_up_after_iterations {
        return Transition::Stop(StopReason::LowConfidence);
    }

    Transition::Gather
}
