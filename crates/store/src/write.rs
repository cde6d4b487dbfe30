use std::collections::BTreeSet;

use chrono::Utc;
use duckdb::params;
use otelmap_core::error::{OtelMapError, Result};
use otelmap_core::model::span::SpanRecord;

use crate::Store;

impl Store {
    /// Upserts spans keyed by `(trace_id, span_id)` and tags each with the
    /// session token found under the store's session key.
    pub fn insert_spans(&self, spans: &[SpanRecord]) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| OtelMapError::Store(format!("begin tx failed: {e}")))?;

        let mut touched = BTreeSet::new();
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO spans
                     (trace_id, span_id, parent_span_id, service_name, span_name, span_kind, ts, duration,
                      status_code, span_attributes, resource_attributes, session_token)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(|e| OtelMapError::Store(format!("prepare insert spans failed: {e}")))?;

            for span in spans {
                let session = span.session_token(self.session_key());
                if let Some(token) = session {
                    touched.insert(token);
                }
                stmt.execute(params![
                    span.trace_id,
                    span.span_id,
                    span.parent_span_id,
                    span.service_name,
                    span.span_name,
                    span.span_kind,
                    span.timestamp.to_rfc3339(),
                    span.duration,
                    span.status_code,
                    attrs_to_json(&span.span_attributes)?,
                    attrs_to_json(&span.resource_attributes)?,
                    session,
                ])
                .map_err(|e| OtelMapError::Store(format!("insert span failed: {e}")))?;
            }
        }

        if !touched.is_empty() {
            let now = Utc::now().to_rfc3339();
            let mut stmt = tx
                .prepare("UPDATE session_tokens SET updated_at = ? WHERE token = ?")
                .map_err(|e| OtelMapError::Store(format!("prepare touch sessions failed: {e}")))?;
            for token in touched {
                stmt.execute(params![now, token])
                    .map_err(|e| OtelMapError::Store(format!("touch session failed: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| OtelMapError::Store(format!("commit spans failed: {e}")))
    }
}

fn attrs_to_json(attrs: &std::collections::BTreeMap<String, String>) -> Result<String> {
    serde_json::to_string(attrs)
        .map_err(|e| OtelMapError::Store(format!("encode attributes failed: {e}")))
}

#[cfg(test)]
mod tests {
    use otelmap_core::filter::TimeWindow;
    use testkit::SpanBuilder;

    use crate::Store;

    #[test]
    fn upsert_replaces_same_span() {
        let store = Store::open_in_memory().unwrap();
        let first = SpanBuilder::new("t1", "a", "api").session("tok").duration_ms(5).build();
        let second = SpanBuilder::new("t1", "a", "api").session("tok").duration_ms(7).build();

        store.insert_spans(&[first]).unwrap();
        store.insert_spans(&[second]).unwrap();

        let spans = store.fetch_session_spans("tok", &TimeWindow::all()).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].duration_ms(), 7);
    }

    #[test]
    fn span_attribute_token_is_a_fallback() {
        let store = Store::open_in_memory().unwrap();
        let mut span = SpanBuilder::new("t1", "a", "api").build();
        span.span_attributes
            .insert("otelmap.session_token".into(), "from-span".into());

        store.insert_spans(&[span]).unwrap();
        assert_eq!(store.count_session_spans("from-span").unwrap(), 1);
    }

    #[test]
    fn untagged_spans_belong_to_no_session() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_spans(&[SpanBuilder::new("t1", "a", "api").build()])
            .unwrap();
        assert_eq!(store.status().unwrap().spans_count, 1);
        assert_eq!(store.count_session_spans("").unwrap(), 0);
    }
}
