use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::params_from_iter;
use otelmap_core::error::{OtelMapError, Result};
use otelmap_core::filter::TimeWindow;
use otelmap_core::model::span::SpanRecord;
use otelmap_core::source::SpanSource;

use crate::Store;

impl Store {
    /// All spans tagged with `token`, ordered by timestamp. Window bounds are inclusive.
    pub fn fetch_session_spans(&self, token: &str, window: &TimeWindow) -> Result<Vec<SpanRecord>> {
        let conn = self.conn();

        let mut where_parts = vec!["session_token = ?"];
        let mut args = vec![duckdb::types::Value::Text(token.to_string())];
        if let Some(since) = window.since {
            where_parts.push("ts >= ?");
            args.push(duckdb::types::Value::Text(since.to_rfc3339()));
        }
        if let Some(until) = window.until {
            where_parts.push("ts <= ?");
            args.push(duckdb::types::Value::Text(until.to_rfc3339()));
        }

        let sql = format!(
            "SELECT trace_id, span_id, parent_span_id, service_name, span_name, span_kind, ts, duration,
                    status_code, span_attributes, resource_attributes
             FROM spans
             WHERE {}
             ORDER BY ts ASC, trace_id ASC, span_id ASC",
            where_parts.join(" AND ")
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| OtelMapError::Store(format!("prepare session spans failed: {e}")))?;

        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok(RawSpan {
                    trace_id: row.get(0)?,
                    span_id: row.get(1)?,
                    parent_span_id: row.get(2)?,
                    service_name: row.get(3)?,
                    span_name: row.get(4)?,
                    span_kind: row.get(5)?,
                    ts: row.get::<_, NaiveDateTime>(6)?,
                    duration: row.get(7)?,
                    status_code: row.get(8)?,
                    span_attributes: row.get(9)?,
                    resource_attributes: row.get(10)?,
                })
            })
            .map_err(|e| OtelMapError::Store(format!("query session spans failed: {e}")))?;

        let mut spans = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| OtelMapError::Store(format!("map session span failed: {e}")))?;
            spans.push(raw.into_record()?);
        }
        Ok(spans)
    }

    pub fn count_session_spans(&self, token: &str) -> Result<usize> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM spans WHERE session_token = ?",
            [token],
            |row| row.get::<_, i64>(0),
        )
        .map(|v| v as usize)
        .map_err(|e| OtelMapError::Store(format!("count session spans failed: {e}")))
    }
}

impl SpanSource for Store {
    fn fetch_spans(&self, session_token: &str, window: &TimeWindow) -> Result<Vec<SpanRecord>> {
        self.fetch_session_spans(session_token, window)
    }
}

struct RawSpan {
    trace_id: String,
    span_id: String,
    parent_span_id: String,
    service_name: String,
    span_name: String,
    span_kind: String,
    ts: NaiveDateTime,
    duration: i64,
    status_code: String,
    span_attributes: String,
    resource_attributes: String,
}

impl RawSpan {
    fn into_record(self) -> Result<SpanRecord> {
        Ok(SpanRecord {
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            service_name: self.service_name,
            span_name: self.span_name,
            span_kind: self.span_kind,
            timestamp: naive_to_utc(self.ts),
            duration: self.duration,
            status_code: self.status_code,
            span_attributes: attrs_from_json(&self.span_attributes)?,
            resource_attributes: attrs_from_json(&self.resource_attributes)?,
        })
    }
}

fn attrs_from_json(raw: &str) -> Result<BTreeMap<String, String>> {
    serde_json::from_str(raw)
        .map_err(|e| OtelMapError::Store(format!("decode attributes failed: {e}")))
}

pub(crate) fn naive_to_utc(ts: NaiveDateTime) -> DateTime<Utc> {
    ts.and_utc()
}
