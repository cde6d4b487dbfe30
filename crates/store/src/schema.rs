pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS spans (
  trace_id TEXT NOT NULL,
  span_id TEXT NOT NULL,
  parent_span_id TEXT NOT NULL,
  service_name TEXT NOT NULL,
  span_name TEXT NOT NULL,
  span_kind TEXT NOT NULL,
  ts TIMESTAMP NOT NULL,
  duration BIGINT NOT NULL,
  status_code TEXT NOT NULL,
  span_attributes TEXT NOT NULL,
  resource_attributes TEXT NOT NULL,
  session_token TEXT,
  PRIMARY KEY(trace_id, span_id)
);

CREATE TABLE IF NOT EXISTS session_tokens (
  token TEXT PRIMARY KEY,
  created_at TIMESTAMP NOT NULL,
  updated_at TIMESTAMP NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_spans_session_ts ON spans(session_token, ts);
CREATE INDEX IF NOT EXISTS idx_spans_ts ON spans(ts);
"#;
