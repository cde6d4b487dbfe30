use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::flow::RequestFlow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Position {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceNode {
    pub service: String,
    pub request_count: u64,
    pub rps: f64,
    pub latency_ms_avg: i64,
    pub p50_ms: i64,
    pub p95_ms: i64,
    pub p99_ms: i64,
    pub error_rate: f64,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub request_count: u64,
    pub rps: f64,
    pub latency_ms_avg: i64,
    pub error_rate: f64,
    /// Distinct operations invoked on the target across this edge.
    #[serde(default)]
    pub operations: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalMetrics {
    pub total_services: usize,
    pub total_requests: u64,
    pub avg_rps: f64,
    pub error_rate: f64,
    pub time_range: TimeRange,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceMap {
    pub global: GlobalMetrics,
    pub nodes: Vec<ServiceNode>,
    pub edges: Vec<Edge>,
}

impl ServiceMap {
    pub fn node(&self, service: &str) -> Option<&ServiceNode> {
        self.nodes.iter().find(|n| n.service == service)
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|e| e.source == source && e.target == target)
    }
}

/// A span revisited on its own root-to-node path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleDiagnostic {
    pub trace_id: String,
    pub span_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MapAnalysis {
    #[serde(flatten)]
    pub map: ServiceMap,
    pub flows: Vec<RequestFlow>,
    pub diagnostics: Vec<CycleDiagnostic>,
}
