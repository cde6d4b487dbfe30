use std::time::Duration;

use chrono::{DateTime, Utc};
use duckdb::params;
use otelmap_core::error::{OtelMapError, Result};

use crate::Store;

/// Rows removed by one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub spans_deleted: usize,
    pub sessions_deleted: usize,
}

impl Store {
    pub fn run_retention(&self, ttl: Duration) -> Result<RetentionReport> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl)
                .map_err(|e| OtelMapError::Internal(format!("ttl conversion failed: {e}")))?;
        self.prune_before(cutoff)
    }

    /// Drops spans older than `cutoff` and sessions idle since before it.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<RetentionReport> {
        let cutoff = cutoff.to_rfc3339();
        let conn = self.conn();
        let spans_deleted = conn
            .execute("DELETE FROM spans WHERE ts < ?", params![cutoff.clone()])
            .map_err(|e| OtelMapError::Store(format!("retention spans delete failed: {e}")))?;
        let sessions_deleted = conn
            .execute(
                "DELETE FROM session_tokens WHERE updated_at < ?",
                params![cutoff],
            )
            .map_err(|e| OtelMapError::Store(format!("retention sessions delete failed: {e}")))?;

        if spans_deleted > 0 || sessions_deleted > 0 {
            tracing::debug!(spans_deleted, sessions_deleted, "retention pass removed rows");
        }
        Ok(RetentionReport {
            spans_deleted,
            sessions_deleted,
        })
    }
}
