use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SERVER_KIND: &str = "SERVER";
pub const HTTP_STATUS_CODE: &str = "http.status_code";
pub const HTTP_METHOD: &str = "http.method";
pub const HTTP_ROUTE: &str = "http.route";

/// One row of the span table, as fetched for a single session.
///
/// `parent_span_id` is empty for root spans. `duration` is in nanoseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: String,
    pub service_name: String,
    #[serde(default)]
    pub span_name: String,
    #[serde(default)]
    pub span_kind: String,
    pub timestamp: DateTime<Utc>,
    pub duration: i64,
    #[serde(default)]
    pub status_code: String,
    #[serde(default)]
    pub span_attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub resource_attributes: BTreeMap<String, String>,
}

impl SpanRecord {
    pub fn has_parent(&self) -> bool {
        !self.parent_span_id.is_empty()
    }

    pub fn is_self_parented(&self) -> bool {
        self.has_parent() && self.parent_span_id == self.span_id
    }

    pub fn is_server(&self) -> bool {
        self.span_kind.eq_ignore_ascii_case(SERVER_KIND)
    }

    /// HTTP status from span attributes; 0 when absent or unparsable.
    pub fn http_status(&self) -> i64 {
        self.span_attributes
            .get(HTTP_STATUS_CODE)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.http_status())
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration / 1_000_000
    }

    /// `"<method> <route>"` when the span carries an HTTP route, else the span name.
    pub fn operation(&self) -> String {
        match self.span_attributes.get(HTTP_ROUTE) {
            Some(route) => match self.span_attributes.get(HTTP_METHOD) {
                Some(method) => format!("{method} {route}"),
                None => route.clone(),
            },
            None => self.span_name.clone(),
        }
    }

    pub fn session_token(&self, key: &str) -> Option<&str> {
        self.resource_attributes
            .get(key)
            .or_else(|| self.span_attributes.get(key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}
