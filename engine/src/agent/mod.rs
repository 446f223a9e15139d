//! Reasoning Loop
//!
//! Answers a query by iterating decompose, gather, detect patterns, test
//! hypotheses and meta-reason over a bounded working memory, then
//! synthesizing an answer or stopping.

pub mod core;
pub mod routing;
pub mod working_memory;

pub use core::{CancellationFlag, ReasoningLoop, SessionOutcome};
pub use routing::{route, Decision, RoutingPolicy, StopReason, Transition};
pub use working_memory::{Hypothesis, Priority, SubQuestion, SubQuestionStatus, WorkingMemory};
