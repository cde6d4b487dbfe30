use chrono::{DateTime, Utc};
use otelmap_core::filter::TimeWindow;
use otelmap_core::model::service_map::{
    Edge, GlobalMetrics, Position, ServiceMap, ServiceNode, TimeRange,
};
use otelmap_core::model::span::SpanRecord;

use crate::edges::EdgeStats;
use crate::services::{ServiceStats, ratio};

pub const GRID_COLUMNS: usize = 6;
const GRID_DX: i64 = 180;
const GRID_DY: i64 = 170;
const GRID_X0: i64 = 120;
const GRID_Y0: i64 = 140;

/// Knobs that change which services become nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapOptions {
    /// Give services seen only on non-SERVER spans a zero-traffic node.
    pub include_client_only_services: bool,
}

/// Concrete bounds used to normalize rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AnalysisWindow {
    /// Explicit bounds win; missing ones fall back to the observed span range,
    /// then to `now` when there is nothing to observe.
    pub fn resolve(spans: &[SpanRecord], requested: &TimeWindow, now: DateTime<Utc>) -> Self {
        let observed_min = spans.iter().map(|s| s.timestamp).min();
        let observed_max = spans.iter().map(|s| s.timestamp).max();

        let start = requested.since.or(observed_min).unwrap_or(now);
        let end = requested.until.or(observed_max).unwrap_or(now);
        Self { start, end }
    }

    /// Window length in fractional seconds, never below one.
    pub fn seconds(&self) -> f64 {
        let length = self.end - self.start;
        let seconds = match length.num_nanoseconds() {
            Some(ns) => ns as f64 / 1e9,
            None => length.num_milliseconds() as f64 / 1e3,
        };
        seconds.max(1.0)
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            from: self.start,
            to: self.end,
        }
    }
}

pub fn grid_position(index: usize) -> Position {
    let col = (index % GRID_COLUMNS) as i64;
    let row = (index / GRID_COLUMNS) as i64;
    Position {
        x: col * GRID_DX + GRID_X0,
        y: row * GRID_DY + GRID_Y0,
    }
}

/// Builds the final map from name-ordered service stats and source/target-ordered
/// edge stats.
pub fn assemble(services: Vec<ServiceStats>, edges: Vec<EdgeStats>, window: &AnalysisWindow) -> ServiceMap {
    let window_seconds = window.seconds();

    let total_requests: u64 = services.iter().map(|s| s.requests).sum();
    let total_errors: u64 = services.iter().map(|s| s.errors).sum();

    let nodes = services
        .into_iter()
        .enumerate()
        .map(|(i, stats)| ServiceNode {
            rps: stats.rps(window_seconds),
            error_rate: stats.error_rate(),
            request_count: stats.requests,
            latency_ms_avg: stats.latency_ms_avg,
            p50_ms: stats.percentiles.p50,
            p95_ms: stats.percentiles.p95,
            p99_ms: stats.percentiles.p99,
            position: grid_position(i),
            service: stats.service,
        })
        .collect::<Vec<_>>();

    let edges = edges
        .into_iter()
        .map(|stats| Edge {
            rps: stats.rps(window_seconds),
            error_rate: stats.error_rate(),
            request_count: stats.requests,
            latency_ms_avg: stats.latency_ms_avg,
            source: stats.source,
            target: stats.target,
            operations: stats.operations,
        })
        .collect::<Vec<_>>();

    let avg_rps = if total_requests == 0 {
        0.0
    } else {
        total_requests as f64 / window_seconds
    };

    ServiceMap {
        global: GlobalMetrics {
            total_services: nodes.len(),
            total_requests,
            avg_rps,
            error_rate: ratio(total_errors, total_requests),
            time_range: window.time_range(),
        },
        nodes,
        edges,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use testkit::{SpanBuilder, base_time};

    use super::*;
    use crate::percentile::Percentiles;

    fn stats(service: &str, requests: u64, errors: u64) -> ServiceStats {
        ServiceStats {
            service: service.to_string(),
            requests,
            errors,
            latency_ms_avg: 10,
            percentiles: Percentiles::from_samples(&[10]),
        }
    }

    #[test]
    fn grid_wraps_after_six_columns() {
        assert_eq!(grid_position(0), Position { x: 120, y: 140 });
        assert_eq!(grid_position(5), Position { x: 1020, y: 140 });
        assert_eq!(grid_position(6), Position { x: 120, y: 310 });
        assert_eq!(grid_position(13), Position { x: 300, y: 480 });
    }

    #[test]
    fn window_prefers_explicit_bounds() {
        let spans = vec![
            SpanBuilder::new("t1", "a", "api").at_ms(1_000).build(),
            SpanBuilder::new("t1", "b", "api").at_ms(9_000).build(),
        ];
        let since = base_time() - Duration::seconds(60);
        let requested = TimeWindow::new(Some(since), None).unwrap();

        let window = AnalysisWindow::resolve(&spans, &requested, base_time());
        assert_eq!(window.start, since);
        assert_eq!(window.end, base_time() + Duration::milliseconds(9_000));
        assert_eq!(window.seconds(), 69.0);
    }

    #[test]
    fn empty_window_collapses_to_now_and_floors_to_one_second() {
        let now = base_time();
        let window = AnalysisWindow::resolve(&[], &TimeWindow::all(), now);
        assert_eq!(window.start, now);
        assert_eq!(window.end, now);
        assert_eq!(window.seconds(), 1.0);
    }

    #[test]
    fn window_keeps_fractional_seconds() {
        let spans = (0..5)
            .map(|i| {
                SpanBuilder::new("t1", &format!("s{i}"), "api")
                    .at_ms(i * 625)
                    .build()
            })
            .collect::<Vec<_>>();
        let window = AnalysisWindow::resolve(&spans, &TimeWindow::all(), base_time());
        assert!((window.seconds() - 2.5).abs() < 1e-9);

        let short = AnalysisWindow {
            start: base_time(),
            end: base_time() + Duration::milliseconds(1_500),
        };
        assert!((short.seconds() - 1.5).abs() < 1e-9);

        let sub_second = AnalysisWindow {
            start: base_time(),
            end: base_time() + Duration::milliseconds(400),
        };
        assert_eq!(sub_second.seconds(), 1.0);
    }

    #[test]
    fn global_error_rate_weights_by_requests() {
        let window = AnalysisWindow {
            start: base_time(),
            end: base_time() + Duration::seconds(10),
        };
        let map = assemble(vec![stats("a", 90, 0), stats("b", 10, 10)], Vec::new(), &window);

        assert_eq!(map.global.total_services, 2);
        assert_eq!(map.global.total_requests, 100);
        assert!((map.global.avg_rps - 10.0).abs() < f64::EPSILON);
        assert!((map.global.error_rate - 0.1).abs() < 1e-9);
        assert_eq!(map.nodes[1].position, Position { x: 300, y: 140 });
        assert!((map.nodes[0].rps - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_traffic_node_reports_zero_rates() {
        let window = AnalysisWindow {
            start: base_time(),
            end: base_time(),
        };
        let map = assemble(vec![stats("idle", 0, 0)], Vec::new(), &window);
        assert_eq!(map.nodes[0].rps, 0.0);
        assert_eq!(map.nodes[0].error_rate, 0.0);
        assert_eq!(map.global.avg_rps, 0.0);
        assert_eq!(map.global.error_rate, 0.0);
    }
}
