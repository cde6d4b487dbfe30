use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::Connection;
use otelmap_core::config::DEFAULT_SESSION_ATTRIBUTE;
use otelmap_core::error::{OtelMapError, Result};
use otelmap_core::query::StatusResponse;

use crate::schema::SCHEMA_SQL;

const MEMORY_PATH: &str = ":memory:";

/// DuckDB-backed span store. Clones share one connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
    session_key: String,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| OtelMapError::io("failed to create db dir", e))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| OtelMapError::Store(format!("failed to open duckdb: {e}")))?;
        conn.execute_batch("PRAGMA threads=4;")
            .map_err(|e| OtelMapError::Store(format!("failed to set pragmas: {e}")))?;
        Self::init(conn, path.display().to_string())
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| OtelMapError::Store(format!("failed to open in-memory db: {e}")))?;
        Self::init(conn, MEMORY_PATH.to_string())
    }

    fn init(conn: Connection, db_path: String) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| OtelMapError::Store(format!("failed to initialize schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
            session_key: DEFAULT_SESSION_ATTRIBUTE.to_string(),
        })
    }

    /// Attribute key that carries the session token on ingested spans.
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves nothing half-applied outside a transaction.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> Result<StatusResponse> {
        let conn = self.conn();

        let spans_count = scalar_usize(&conn, "SELECT COUNT(*) FROM spans")?;
        let sessions_count = scalar_usize(&conn, "SELECT COUNT(*) FROM session_tokens")?;
        let oldest_ts = scalar_ts(&conn, "SELECT MIN(ts) FROM spans")?;
        let newest_ts = scalar_ts(&conn, "SELECT MAX(ts) FROM spans")?;

        let db_size_bytes = if self.db_path == MEMORY_PATH {
            0
        } else {
            fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StatusResponse {
            db_path: self.db_path.clone(),
            db_size_bytes,
            spans_count,
            sessions_count,
            oldest_ts,
            newest_ts,
        })
    }
}

pub(crate) fn scalar_usize(conn: &Connection, sql: &str) -> Result<usize> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|v| v as usize)
        .map_err(|e| OtelMapError::Store(format!("query failed: {e}")))
}

fn scalar_ts(conn: &Connection, sql: &str) -> Result<Option<DateTime<Utc>>> {
    conn.query_row(sql, [], |row| row.get::<_, Option<NaiveDateTime>>(0))
        .map(|opt| opt.map(|dt| dt.and_utc()))
        .map_err(|e| OtelMapError::Store(format!("query failed: {e}")))
}
