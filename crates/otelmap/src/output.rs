use chrono::SecondsFormat;
use otelmap_core::model::flow::RequestFlow;
use otelmap_core::model::service_map::MapAnalysis;
use otelmap_core::query::{SessionTokenResponse, StatusResponse};
use owo_colors::OwoColorize;
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_session_human(v: &SessionTokenResponse) {
    println!("token={}", v.token);
    println!("otlp_http_url={}", v.ingest.otlp_http_url);
    println!("otlp_grpc_url={}", v.ingest.otlp_grpc_url);
    println!("header {}: {}", v.ingest.header_key, v.ingest.header_value);
    println!(
        "resource attribute {}={}",
        v.ingest.resource_attribute.key, v.ingest.resource_attribute.value
    );
}

pub fn print_map_human(v: &MapAnalysis, with_flows: bool) {
    let g = &v.map.global;
    println!(
        "MAP services={} requests={} rps={:.2} errors={} window={}..{}",
        g.total_services,
        g.total_requests,
        g.avg_rps,
        rate_label(g.error_rate),
        g.time_range.from.to_rfc3339_opts(SecondsFormat::Millis, true),
        g.time_range.to.to_rfc3339_opts(SecondsFormat::Millis, true),
    );

    for node in &v.map.nodes {
        println!(
            "  {} requests={} rps={:.2} avg={}ms p50={}ms p95={}ms p99={}ms errors={}",
            node.service.cyan(),
            node.request_count,
            node.rps,
            node.latency_ms_avg,
            node.p50_ms,
            node.p95_ms,
            node.p99_ms,
            rate_label(node.error_rate),
        );
    }
    for edge in &v.map.edges {
        println!(
            "  {} -> {} requests={} rps={:.2} avg={}ms errors={} ops=[{}]",
            edge.source.cyan(),
            edge.target.cyan(),
            edge.request_count,
            edge.rps,
            edge.latency_ms_avg,
            rate_label(edge.error_rate),
            edge.operations.join(", "),
        );
    }
    println!(
        "-- {} nodes, {} edges --",
        v.map.nodes.len(),
        v.map.edges.len()
    );

    for d in &v.diagnostics {
        println!(
            "{} cycle at trace={} span={}",
            "warning:".yellow(),
            d.trace_id,
            d.span_id
        );
    }

    if with_flows {
        for flow in &v.flows {
            print_flow(flow);
        }
        println!("-- {} flows --", v.flows.len());
    }
}

pub fn print_status_human(v: &StatusResponse) {
    println!("db_path={}", v.db_path);
    println!("db_size_bytes={}", v.db_size_bytes);
    println!("spans={} sessions={}", v.spans_count, v.sessions_count);
    if let Some(oldest) = v.oldest_ts {
        println!(
            "oldest={}",
            oldest.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }
    if let Some(newest) = v.newest_ts {
        println!(
            "newest={}",
            newest.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }
}

fn rate_label(rate: f64) -> String {
    let text = format!("{:.1}%", rate * 100.0);
    if rate > 0.0 {
        text.red().to_string()
    } else {
        text
    }
}

fn print_flow(root: &RequestFlow) {
    let mut stack = vec![(root, 0usize)];
    while let Some((node, depth)) = stack.pop() {
        let cut = if node.truncated { " [cycle]" } else { "" };
        println!(
            "{}{} {} ({}ms){}",
            "  ".repeat(depth),
            node.service,
            node.operation,
            node.duration_ms,
            cut
        );
        stack.extend(node.children.iter().rev().map(|c| (c, depth + 1)));
    }
}
