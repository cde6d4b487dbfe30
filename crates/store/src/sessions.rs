use chrono::Utc;
use duckdb::params;
use otelmap_core::error::{OtelMapError, Result};
use otelmap_core::ids::SessionToken;

use crate::Store;

impl Store {
    pub fn create_session_token(&self) -> Result<SessionToken> {
        let token = SessionToken::generate();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO session_tokens (token, created_at, updated_at) VALUES (?, ?, ?)",
            params![token.to_string(), now.clone(), now],
        )
        .map_err(|e| OtelMapError::Store(format!("insert session token failed: {e}")))?;
        tracing::debug!(%token, "session token issued");
        Ok(token)
    }

    pub fn session_exists(&self, token: &str) -> Result<bool> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM session_tokens WHERE token = ?",
            [token],
            |row| row.get::<_, i64>(0),
        )
        .map(|count| count > 0)
        .map_err(|e| OtelMapError::Store(format!("session lookup failed: {e}")))
    }
}
