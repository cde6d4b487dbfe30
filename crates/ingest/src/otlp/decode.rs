use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::Span as OtlpSpan;
use opentelemetry_proto::tonic::trace::v1::span::SpanKind;
use opentelemetry_proto::tonic::trace::v1::status::StatusCode;
use otelmap_core::model::span::SpanRecord;

const SERVICE_NAME: &str = "service.name";
const UNKNOWN_SERVICE: &str = "unknown";

/// Flattens every span of an export request into span rows.
pub fn decode_request(req: ExportTraceServiceRequest) -> Vec<SpanRecord> {
    let mut spans = Vec::new();
    for rs in req.resource_spans {
        let resource = rs.resource.as_ref();
        let resource_attributes = kv_to_map(resource.map(|r| r.attributes.as_slice()).unwrap_or(&[]));
        let service = service_name(resource);
        for ss in rs.scope_spans {
            for span in ss.spans {
                spans.push(decode_span(&service, &resource_attributes, &span));
            }
        }
    }
    spans
}

pub fn decode_span(
    service: &str,
    resource_attributes: &BTreeMap<String, String>,
    span: &OtlpSpan,
) -> SpanRecord {
    let status_code = span
        .status
        .as_ref()
        .map(|s| status_name(s.code))
        .unwrap_or("Unset");
    let duration = span
        .end_time_unix_nano
        .saturating_sub(span.start_time_unix_nano)
        .min(i64::MAX as u64) as i64;

    SpanRecord {
        trace_id: bytes_to_hex(&span.trace_id),
        span_id: bytes_to_hex(&span.span_id),
        parent_span_id: bytes_to_hex(&span.parent_span_id),
        service_name: service.to_string(),
        span_name: span.name.clone(),
        span_kind: kind_name(span.kind).to_string(),
        timestamp: nanos_to_dt(span.start_time_unix_nano),
        duration,
        status_code: status_code.to_string(),
        span_attributes: kv_to_map(&span.attributes),
        resource_attributes: resource_attributes.clone(),
    }
}

pub fn kind_name(kind: i32) -> &'static str {
    match SpanKind::try_from(kind) {
        Ok(SpanKind::Internal) => "INTERNAL",
        Ok(SpanKind::Server) => "SERVER",
        Ok(SpanKind::Client) => "CLIENT",
        Ok(SpanKind::Producer) => "PRODUCER",
        Ok(SpanKind::Consumer) => "CONSUMER",
        Ok(SpanKind::Unspecified) | Err(_) => "UNSPECIFIED",
    }
}

pub fn status_name(code: i32) -> &'static str {
    match StatusCode::try_from(code) {
        Ok(StatusCode::Ok) => "Ok",
        Ok(StatusCode::Error) => "Error",
        Ok(StatusCode::Unset) | Err(_) => "Unset",
    }
}

fn service_name(resource: Option<&Resource>) -> String {
    resource
        .and_then(|r| r.attributes.iter().find(|kv| kv.key == SERVICE_NAME))
        .map(|kv| any_value_to_string(kv.value.as_ref()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_string())
}

fn kv_to_map(attrs: &[KeyValue]) -> BTreeMap<String, String> {
    attrs
        .iter()
        .map(|kv| (kv.key.clone(), any_value_to_string(kv.value.as_ref())))
        .collect()
}

fn any_value_to_string(value: Option<&AnyValue>) -> String {
    value
        .and_then(|v| v.value.as_ref())
        .map(|v| match v {
            Value::StringValue(s) => s.clone(),
            Value::BoolValue(b) => b.to_string(),
            Value::IntValue(i) => i.to_string(),
            Value::DoubleValue(d) => d.to_string(),
            Value::BytesValue(b) => String::from_utf8_lossy(b).to_string(),
            Value::ArrayValue(arr) => {
                let items = arr
                    .values
                    .iter()
                    .map(|item| any_value_to_string(Some(item)))
                    .collect::<Vec<_>>();
                format!("[{}]", items.join(","))
            }
            _ => "<complex>".to_string(),
        })
        .unwrap_or_default()
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn nanos_to_dt(nanos: u64) -> DateTime<Utc> {
    let secs = (nanos / 1_000_000_000) as i64;
    let subnanos = (nanos % 1_000_000_000) as u32;
    Utc.timestamp_opt(secs, subnanos)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}
