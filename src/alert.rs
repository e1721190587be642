//! Alert engine: turns the per-cycle finding stream into lifecycle events.
//!
//! For every failure finding the engine decides between NEW, RECURRENCE,
//! DETAIL-CHANGE, PERSISTING and duplicate-burst; for every success finding
//! it resolves the covered issue types. The quiet steady state — the same
//! failure with the same detail, cycle after cycle — touches neither the
//! sinks nor the store.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::{self, issue, AlertMeta, Priority};
use crate::debounce::DebounceCache;
use crate::model::{EventLogEntry, Finding, IssueRecord, IssueStatus, NodeSpec};
use crate::session::SessionError;
use crate::sinks::event_log::EventLog;
use crate::sinks::webhook::{text_row, AlertNotice, Notifier};
use crate::store::{StateStore, StoreError};
use crate::utils;

pub struct AlertEngine {
    store: StateStore,
    events: EventLog,
    notifier: Notifier,
    debounce: DebounceCache,
    tz_offset_hours: i32,
}

impl AlertEngine {
    pub fn new(
        store: StateStore,
        events: EventLog,
        notifier: Notifier,
        debounce: DebounceCache,
        tz_offset_hours: i32,
    ) -> Self {
        Self {
            store,
            events,
            notifier,
            debounce,
            tz_offset_hours,
        }
    }

    /// Reconciles one finding against the stored state.
    pub async fn process(&self, node: &NodeSpec, finding: &Finding) {
        match finding {
            Finding::Pass { clears } => {
                for issue_type in clears {
                    self.handle_resolved(node, issue_type).await;
                }
            }
            Finding::Fail { issue, detail } => {
                self.handle_failed(node, issue, detail).await;
            }
        }
    }

    /// A failed session establishment is an ordinary finding for the node.
    pub async fn report_session_failure(&self, node: &NodeSpec, error: &SessionError) {
        let detail = format!("SSH connection failed ({}): {error}", error.class());
        self.handle_failed(node, issue::SSH, &detail).await;
    }

    async fn handle_failed(&self, node: &NodeSpec, issue_type: &str, detail: &str) {
        let meta = catalog::lookup(issue_type);

        let key = DebounceCache::key(&node.host, issue_type);
        if self.debounce.is_duplicate(&key) {
            debug!(
                host = %node.host,
                issue_type,
                "duplicate burst within the debounce window"
            );
            if meta.priority != Priority::P3 {
                self.notifier
                    .send_duplicate(&self.notice(node, issue_type, detail, &meta))
                    .await;
            }
            return;
        }

        let current = match self.store.get(&node.host, issue_type).await {
            Ok(record) => record,
            Err(err) => {
                // Degrades to "no de-duplication": the finding is treated as
                // new rather than lost.
                warn!(host = %node.host, issue_type, error = %err, "state store lookup failed");
                None
            }
        };

        if let Some(record) = &current {
            if record.status == IssueStatus::Reported && record.extra == detail {
                debug!(host = %node.host, issue_type, "issue persisting unchanged");
                return;
            }
        }

        info!(
            host = %node.host,
            issue_type,
            priority = meta.priority.label(),
            "issue reported, running full alert flow"
        );
        let notice = self.notice(node, issue_type, detail, &meta);
        if meta.priority == Priority::P3 {
            info!(
                host = %node.host,
                issue_type,
                "P3 event recorded, held for the daily digest"
            );
        } else {
            self.notifier.send_standard(&notice).await;
        }
        self.notifier.send_table_sync(&notice).await;

        let now = Utc::now();
        self.events
            .append(&EventLogEntry {
                host_ip: node.host.clone(),
                host_name: node.display().to_string(),
                issue_type: issue_type.to_string(),
                detail: detail.to_string(),
                timestamp: now,
            })
            .await;

        let record = IssueRecord {
            host: node.host.clone(),
            hostname: node.display().to_string(),
            issue_type: issue_type.to_string(),
            extra: detail.to_string(),
            status: IssueStatus::Reported,
            priority: meta.priority.label().to_string(),
            first_seen: now,
            last_update: now,
        };
        if let Err(err) = self.store.upsert(&record).await {
            warn!(host = %node.host, issue_type, error = %err, "state store upsert failed");
        }
        self.debounce.mark(&key);
    }

    async fn handle_resolved(&self, node: &NodeSpec, issue_type: &str) {
        let current: Result<Option<IssueRecord>, StoreError> =
            self.store.get(&node.host, issue_type).await;
        let record = match current {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(err) => {
                warn!(host = %node.host, issue_type, error = %err, "state store lookup failed");
                return;
            }
        };
        if record.status != IssueStatus::Reported {
            return;
        }

        info!(host = %node.host, issue_type, "issue recovered");
        let now = Utc::now();
        match self.store.mark_resolved(&node.host, issue_type, now).await {
            Ok(true) => debug!(host = %node.host, issue_type, "record marked resolved"),
            Ok(false) => {}
            Err(err) => {
                warn!(host = %node.host, issue_type, error = %err, "failed to persist recovery")
            }
        }
        self.events
            .append(&EventLogEntry {
                host_ip: node.host.clone(),
                host_name: node.display().to_string(),
                issue_type: issue_type.to_string(),
                detail: "ISSUE RESOLVED".to_string(),
                timestamp: now,
            })
            .await;

        let meta = catalog::lookup(issue_type);
        let notice = self.notice(node, issue_type, &record.extra, &meta);
        self.notifier.send_recovery(&notice).await;
    }

    /// Composes and sends the daily P3 digest. Emits an explicit heartbeat
    /// message even when no active P3 records exist.
    pub async fn run_daily_digest(&self) {
        info!("generating daily P3 digest");
        let p3_types = catalog::p3_types();
        if p3_types.is_empty() {
            return;
        }

        let active = match self.store.query_active_by_types(&p3_types).await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "state store query failed, skipping digest");
                return;
            }
        };

        let title = format!("P3 daily digest - {}", utils::local_today(self.tz_offset_hours));
        let content: Vec<Vec<Value>> = if active.is_empty() {
            vec![text_row(
                "No new or ongoing P3 events in the last 24 hours.".to_string(),
            )]
        } else {
            let mut by_host: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for record in &active {
                by_host
                    .entry(record.hostname.clone())
                    .or_default()
                    .push(format!("{}: {}", record.issue_type, record.extra));
            }
            let mut rows = Vec::new();
            for (hostname, details) in by_host {
                rows.push(text_row(format!("Node: {hostname}")));
                for detail in details {
                    rows.push(text_row(format!("  - {detail}")));
                }
            }
            rows
        };

        self.notifier.send_digest(&title, content).await;
    }

    fn notice(
        &self,
        node: &NodeSpec,
        issue_type: &str,
        detail: &str,
        meta: &AlertMeta,
    ) -> AlertNotice {
        AlertNotice {
            host: node.host.clone(),
            hostname: node.display().to_string(),
            issue_type: issue_type.to_string(),
            detail: detail.to_string(),
            priority: meta.priority,
            group: meta.group,
            title: meta.title,
            timestamp: utils::format_local_now(self.tz_offset_hours),
        }
    }
}
