use crate::error::Result;
use crate::filter::TimeWindow;
use crate::model::span::SpanRecord;

/// Supplies the materialized spans of one session.
pub trait SpanSource {
    fn fetch_spans(&self, session_token: &str, window: &TimeWindow) -> Result<Vec<SpanRecord>>;
}

/// An already-fetched snapshot. The token is ignored; the window still applies.
impl SpanSource for Vec<SpanRecord> {
    fn fetch_spans(&self, _session_token: &str, window: &TimeWindow) -> Result<Vec<SpanRecord>> {
        Ok(self
            .iter()
            .filter(|s| window.contains(s.timestamp))
            .cloned()
            .collect())
    }
}
