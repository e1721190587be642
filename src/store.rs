//! Local durable state store.
//!
//! One SQLite table, `current_status`, keyed by `(host, type)`, holding the
//! authoritative lifecycle state of every issue the fleet has ever raised.
//! All workers share the pool; concurrent upserts for the same key are
//! serialized by the store.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::model::{IssueRecord, IssueStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

const CREATE_TABLE_SQL: &str = "\
CREATE TABLE IF NOT EXISTS current_status (
    host TEXT NOT NULL,
    hostname TEXT NOT NULL,
    type TEXT NOT NULL,
    extra TEXT NOT NULL,
    status TEXT NOT NULL,
    priority TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    last_update TEXT NOT NULL,
    PRIMARY KEY (host, type)
)";

const RECORD_COLUMNS: &str =
    "host, hostname, type, extra, status, priority, first_seen, last_update";

pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        sqlx::query(CREATE_TABLE_SQL).execute(&pool).await?;
        info!(path = %path.display(), "state store ready");
        Ok(Self { pool })
    }

    pub async fn get(
        &self,
        host: &str,
        issue_type: &str,
    ) -> Result<Option<IssueRecord>, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM current_status WHERE host = ? AND type = ?");
        let row = sqlx::query(&sql)
            .bind(host)
            .bind(issue_type)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| record_from_row(&row)).transpose()
    }

    /// Insert or update. On update `first_seen` is preserved; `extra`,
    /// `status`, `priority` and `last_update` are overwritten.
    pub async fn upsert(&self, record: &IssueRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO current_status (host, hostname, type, extra, status, priority, first_seen, last_update)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(host, type) DO UPDATE SET
                 hostname = excluded.hostname,
                 extra = excluded.extra,
                 status = excluded.status,
                 priority = excluded.priority,
                 last_update = excluded.last_update",
        )
        .bind(&record.host)
        .bind(&record.hostname)
        .bind(&record.issue_type)
        .bind(&record.extra)
        .bind(record.status.as_str())
        .bind(&record.priority)
        .bind(record.first_seen)
        .bind(record.last_update)
        .execute(&self.pool)
        .await?;
        debug!(host = %record.host, issue_type = %record.issue_type, "state store upsert");
        Ok(())
    }

    /// Flips the record to resolved. Returns whether a transition happened
    /// (a record already resolved, or absent, is left untouched).
    pub async fn mark_resolved(
        &self,
        host: &str,
        issue_type: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE current_status SET status = ?, last_update = ?
             WHERE host = ? AND type = ? AND status != ?",
        )
        .bind(IssueStatus::Resolved.as_str())
        .bind(at)
        .bind(host)
        .bind(issue_type)
        .bind(IssueStatus::Resolved.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All non-resolved records whose type is in `types`.
    pub async fn query_active_by_types(
        &self,
        types: &[&str],
    ) -> Result<Vec<IssueRecord>, StoreError> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; types.len()].join(", ");
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM current_status
             WHERE status != 'resolved' AND type IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql);
        for issue_type in types {
            query = query.bind(*issue_type);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<IssueRecord, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(IssueRecord {
        host: row.try_get("host")?,
        hostname: row.try_get("hostname")?,
        issue_type: row.try_get("type")?,
        extra: row.try_get("extra")?,
        status: IssueStatus::parse(&status),
        priority: row.try_get("priority")?,
        first_seen: row.try_get("first_seen")?,
        last_update: row.try_get("last_update")?,
    })
}
