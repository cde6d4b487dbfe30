//! Turns a flat span snapshot into a service dependency map.
//!
//! Everything here is synchronous and pure: callers pass the spans, the window
//! and the clock, and get a fresh value back on every call.

pub mod assemble;
pub mod edges;
pub mod index;
pub mod percentile;
pub mod services;
pub mod topology;

use chrono::{DateTime, Utc};
use otelmap_core::Result;
use otelmap_core::filter::TimeWindow;
use otelmap_core::model::service_map::{MapAnalysis, ServiceMap};
use otelmap_core::model::span::SpanRecord;
use otelmap_core::source::SpanSource;
use tracing::debug;

pub use assemble::{AnalysisWindow, GRID_COLUMNS, MapOptions, grid_position};
pub use index::SpanIndex;
pub use percentile::{Percentiles, percentile};
pub use topology::Topology;

pub fn build_service_map(
    spans: &[SpanRecord],
    window: &TimeWindow,
    options: MapOptions,
    now: DateTime<Utc>,
) -> ServiceMap {
    let index = SpanIndex::build(spans);
    service_map_from_index(spans, &index, window, options, now)
}

pub fn build_request_flows(spans: &[SpanRecord]) -> Topology {
    let index = SpanIndex::build(spans);
    topology::build_topology(spans, &index)
}

/// Service map, request flows and cycle diagnostics over one shared index.
pub fn analyze(
    spans: &[SpanRecord],
    window: &TimeWindow,
    options: MapOptions,
    now: DateTime<Utc>,
) -> MapAnalysis {
    let index = SpanIndex::build(spans);
    let map = service_map_from_index(spans, &index, window, options, now);
    let Topology { flows, diagnostics } = topology::build_topology(spans, &index);

    debug!(
        spans = spans.len(),
        services = map.nodes.len(),
        edges = map.edges.len(),
        flows = flows.len(),
        cycles = diagnostics.len(),
        "service map analyzed"
    );

    MapAnalysis {
        map,
        flows,
        diagnostics,
    }
}

/// Fetches one session's spans and analyzes them. Only the fetch can fail.
pub fn map_session(
    source: &dyn SpanSource,
    session_token: &str,
    window: &TimeWindow,
    options: MapOptions,
    now: DateTime<Utc>,
) -> Result<MapAnalysis> {
    let spans = source.fetch_spans(session_token, window)?;
    Ok(analyze(&spans, window, options, now))
}

fn service_map_from_index(
    spans: &[SpanRecord],
    index: &SpanIndex<'_>,
    window: &TimeWindow,
    options: MapOptions,
    now: DateTime<Utc>,
) -> ServiceMap {
    let services = services::aggregate_services(spans, options.include_client_only_services);
    let edges = edges::aggregate_edges(spans, index);
    let window = AnalysisWindow::resolve(spans, window, now);
    assemble::assemble(services, edges, &window)
}
