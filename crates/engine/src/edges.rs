use std::collections::{BTreeMap, BTreeSet};

use otelmap_core::model::span::SpanRecord;

use crate::index::SpanIndex;
use crate::services::ratio;

/// Traffic across one `source -> target` service call.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeStats {
    pub source: String,
    pub target: String,
    pub requests: u64,
    pub errors: u64,
    pub latency_ms_avg: i64,
    pub operations: Vec<String>,
}

impl EdgeStats {
    pub fn error_rate(&self) -> f64 {
        ratio(self.errors, self.requests)
    }

    pub fn rps(&self, window_seconds: f64) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.requests as f64 / window_seconds
    }
}

#[derive(Debug, Default)]
struct EdgeAccumulator {
    requests: u64,
    latency_sum_ms: i64,
    errors: u64,
    operations: BTreeSet<String>,
}

/// Derives cross-service edges from parent/child service transitions.
///
/// Every child whose parent resolves to a different service creates the edge;
/// only SERVER children add traffic to it. Output is sorted by `(source, target)`.
pub fn aggregate_edges(spans: &[SpanRecord], index: &SpanIndex<'_>) -> Vec<EdgeStats> {
    let mut edges: BTreeMap<(&str, &str), EdgeAccumulator> = BTreeMap::new();
    for child in spans {
        if child.service_name.is_empty() {
            continue;
        }
        let Some(parent_service) = index.parent_service(child) else {
            continue;
        };
        if parent_service == child.service_name {
            continue;
        }

        let acc = edges
            .entry((parent_service, child.service_name.as_str()))
            .or_default();
        acc.operations.insert(child.operation());
        if child.is_server() {
            acc.requests += 1;
            acc.latency_sum_ms += child.duration_ms();
            if child.is_server_error() {
                acc.errors += 1;
            }
        }
    }

    edges
        .into_iter()
        .map(|((source, target), acc)| EdgeStats {
            source: source.to_string(),
            target: target.to_string(),
            requests: acc.requests,
            errors: acc.errors,
            latency_ms_avg: if acc.requests == 0 {
                0
            } else {
                acc.latency_sum_ms / acc.requests as i64
            },
            operations: acc.operations.into_iter().collect(),
        })
        .collect()
}
