//! Optional append-only event log in MySQL.
//!
//! The pool is created lazily so an unreachable database never blocks boot;
//! every write is best-effort and the next call simply retries the
//! connection. In-memory and SQLite state are never affected by event-log
//! failures.

use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::MySqlPool;
use tracing::{debug, info, warn};

use crate::config::MysqlSettings;
use crate::model::EventLogEntry;

const INIT_RETRIES: u32 = 3;
const INIT_RETRY_DELAY: Duration = Duration::from_secs(5);

const CREATE_TABLE_SQL: &str = "\
CREATE TABLE IF NOT EXISTS events_alarms (
    id BIGINT AUTO_INCREMENT PRIMARY KEY,
    host_ip VARCHAR(255) NOT NULL,
    host_name VARCHAR(255) NOT NULL,
    type VARCHAR(255) NOT NULL,
    detail TEXT,
    timestamp TIMESTAMP NOT NULL
)";

pub struct EventLog {
    pool: Option<MySqlPool>,
}

impl EventLog {
    pub fn disabled() -> Self {
        Self { pool: None }
    }

    pub async fn connect(settings: &MysqlSettings, max_connections: u32) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.db_name);
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy_with(options);

        for attempt in 1..=INIT_RETRIES {
            match sqlx::query(CREATE_TABLE_SQL).execute(&pool).await {
                Ok(_) => {
                    info!(db = %settings.db_name, "event log ready");
                    break;
                }
                Err(err) if attempt < INIT_RETRIES => {
                    warn!(attempt, error = %err, "event log init failed, retrying");
                    tokio::time::sleep(INIT_RETRY_DELAY).await;
                }
                Err(err) => {
                    warn!(error = %err, "event log unreachable, writes will retry per call");
                }
            }
        }

        Self { pool: Some(pool) }
    }

    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    /// Best-effort append. Failures are logged and swallowed so a dead event
    /// log never aborts an alert transition.
    pub async fn append(&self, entry: &EventLogEntry) {
        let Some(pool) = &self.pool else {
            debug!("event log disabled, dropping entry");
            return;
        };
        let result = sqlx::query(
            "INSERT INTO events_alarms (host_ip, host_name, type, detail, timestamp)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.host_ip)
        .bind(&entry.host_name)
        .bind(&entry.issue_type)
        .bind(&entry.detail)
        .bind(entry.timestamp)
        .execute(pool)
        .await;

        if let Err(err) = result {
            warn!(
                host = %entry.host_ip,
                issue_type = %entry.issue_type,
                error = %err,
                "event log append failed"
            );
        }
    }
}
