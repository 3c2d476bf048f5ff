//! Types produced by an external task router.
//!
//! A router inspects an incoming request and decides whether it needs one
//! agent or a multi-agent workflow. Cadence only consumes the decision; the
//! scoring heuristics live elsewhere.

use serde::{Deserialize, Serialize};

/// Execution strategy recommended by a task router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// One agent can handle the request on its own.
    SingleAgent,
    /// The request should be decomposed and run through the orchestrator.
    MultiAgent,
}

/// A routing hint for an outer caller deciding whether to orchestrate at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Recommended execution strategy.
    pub strategy: RoutingStrategy,
    /// Agent type best suited for single-agent execution, if any.
    #[serde(default)]
    pub recommended_agent: Option<String>,
    /// Router confidence in `[0.0, 1.0]`.
    pub confidence: f64,
}

impl RoutingDecision {
    /// Whether the decision calls for wave-based orchestration.
    pub fn is_multi_agent(&self) -> bool {
        self.strategy == RoutingStrategy::MultiAgent
    }
}
