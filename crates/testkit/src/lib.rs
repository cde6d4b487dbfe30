use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::span::SpanKind;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span, Status};
use otelmap_core::config::DEFAULT_SESSION_ATTRIBUTE;
use otelmap_core::model::span::{HTTP_METHOD, HTTP_ROUTE, HTTP_STATUS_CODE, SpanRecord};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
}

/// Span fixture with SERVER kind, 10ms duration and `base_time()` as defaults.
#[derive(Debug, Clone)]
pub struct SpanBuilder {
    span: SpanRecord,
}

impl SpanBuilder {
    pub fn new(trace_id: &str, span_id: &str, service: &str) -> Self {
        Self {
            span: SpanRecord {
                trace_id: trace_id.to_string(),
                span_id: span_id.to_string(),
                parent_span_id: String::new(),
                service_name: service.to_string(),
                span_name: format!("{service} handler"),
                span_kind: "SERVER".to_string(),
                timestamp: base_time(),
                duration: 10_000_000,
                status_code: "Unset".to_string(),
                span_attributes: BTreeMap::new(),
                resource_attributes: BTreeMap::new(),
            },
        }
    }

    pub fn parent(mut self, parent_span_id: &str) -> Self {
        self.span.parent_span_id = parent_span_id.to_string();
        self
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.span.span_kind = kind.to_string();
        self
    }

    pub fn duration_ms(mut self, ms: i64) -> Self {
        self.span.duration = ms * 1_000_000;
        self
    }

    /// Offset from `base_time()`.
    pub fn at_ms(mut self, ms: i64) -> Self {
        self.span.timestamp = base_time() + Duration::milliseconds(ms);
        self
    }

    pub fn http_status(mut self, code: &str) -> Self {
        self.span
            .span_attributes
            .insert(HTTP_STATUS_CODE.to_string(), code.to_string());
        self
    }

    pub fn route(mut self, method: &str, route: &str) -> Self {
        self.span
            .span_attributes
            .insert(HTTP_METHOD.to_string(), method.to_string());
        self.span
            .span_attributes
            .insert(HTTP_ROUTE.to_string(), route.to_string());
        self
    }

    pub fn session(mut self, token: &str) -> Self {
        self.span
            .resource_attributes
            .insert(DEFAULT_SESSION_ATTRIBUTE.to_string(), token.to_string());
        self
    }

    pub fn build(self) -> SpanRecord {
        self.span
    }
}

/// Two checkout traces through `frontend -> checkout -> {payments, postgres}`.
///
/// The second payment call fails with a 502; postgres is reached through a
/// CLIENT span only and so never becomes a node by default.
pub fn sample_session(token: &str) -> Vec<SpanRecord> {
    let mut spans = Vec::new();
    for (n, offset) in [(1, 0), (2, 2_000)] {
        let trace = format!("trace-{n}");
        let payment_status = if n == 2 { "502" } else { "200" };
        spans.push(
            SpanBuilder::new(&trace, "fe", "frontend")
                .route("GET", "/checkout")
                .http_status("200")
                .duration_ms(120)
                .at_ms(offset)
                .session(token)
                .build(),
        );
        spans.push(
            SpanBuilder::new(&trace, "co", "checkout")
                .parent("fe")
                .route("POST", "/orders")
                .http_status("200")
                .duration_ms(90)
                .at_ms(offset + 5)
                .session(token)
                .build(),
        );
        spans.push(
            SpanBuilder::new(&trace, "pay", "payments")
                .parent("co")
                .route("POST", "/charge")
                .http_status(payment_status)
                .duration_ms(40)
                .at_ms(offset + 10)
                .session(token)
                .build(),
        );
        spans.push(
            SpanBuilder::new(&trace, "db", "postgres")
                .parent("co")
                .kind("CLIENT")
                .duration_ms(15)
                .at_ms(offset + 60)
                .session(token)
                .build(),
        );
    }
    spans
}

fn string_kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(Value::StringValue(value.to_string())),
        }),
    }
}

fn resource_spans(service: &str, session: Option<&str>, spans: Vec<Span>) -> ResourceSpans {
    let mut attributes = vec![string_kv("service.name", service)];
    if let Some(token) = session {
        attributes.push(string_kv(DEFAULT_SESSION_ATTRIBUTE, token));
    }
    ResourceSpans {
        resource: Some(Resource {
            attributes,
            ..Default::default()
        }),
        scope_spans: vec![ScopeSpans {
            spans,
            ..Default::default()
        }],
        schema_url: String::new(),
    }
}

/// One `frontend -> api` trace as an OTLP export request, starting at `base_time()`.
///
/// When `session` is set the token travels as a resource attribute.
pub fn sample_export_request(session: Option<&str>) -> ExportTraceServiceRequest {
    let start = base_time().timestamp_nanos_opt().unwrap_or_default() as u64;
    let root = Span {
        trace_id: vec![1; 16],
        span_id: vec![2; 8],
        name: "GET /checkout".into(),
        kind: SpanKind::Server as i32,
        start_time_unix_nano: start,
        end_time_unix_nano: start + 50_000_000,
        attributes: vec![string_kv(HTTP_STATUS_CODE, "200")],
        ..Default::default()
    };
    let child = Span {
        trace_id: vec![1; 16],
        span_id: vec![3; 8],
        parent_span_id: vec![2; 8],
        name: "POST /orders".into(),
        kind: SpanKind::Server as i32,
        start_time_unix_nano: start + 5_000_000,
        end_time_unix_nano: start + 25_000_000,
        attributes: vec![
            string_kv(HTTP_METHOD, "POST"),
            string_kv(HTTP_ROUTE, "/orders"),
            string_kv(HTTP_STATUS_CODE, "500"),
        ],
        status: Some(Status {
            code: 2,
            message: "boom".into(),
        }),
        ..Default::default()
    };

    ExportTraceServiceRequest {
        resource_spans: vec![
            resource_spans("frontend", session, vec![root]),
            resource_spans("api", session, vec![child]),
        ],
    }
}
