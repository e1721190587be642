//! Core data model shared across the inspection pipeline.
//!
//! Everything here is plain data: node inventory entries, raw command
//! payloads, parser findings and the persistent issue records the alert
//! engine reconciles them against.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Issue types are interned string constants declared in [`crate::catalog`].
pub type IssueType = &'static str;

/// One entry of the node inventory. Immutable for the lifetime of a cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSpec {
    pub host: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
}

fn default_ssh_port() -> u16 {
    22
}

impl NodeSpec {
    /// Human-facing name: the declared hostname when present, else the address.
    pub fn display(&self) -> &str {
        self.hostname.as_deref().unwrap_or(&self.host)
    }
}

/// Captured result of one remote command execution.
///
/// `success` reflects the remote exit status being zero; a command that could
/// not be executed at all still yields a payload with `success = false` and
/// the reason in `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPayload {
    pub success: bool,
    pub output: String,
    pub error: String,
}

impl RawPayload {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: String::new(),
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
        }
    }
}

/// A parser's verdict for one probe run.
///
/// A passing probe clears every issue type it covers; a failing probe opens
/// exactly one issue type with a free-form detail. The asymmetry is load
/// bearing: one probe can guard several orthogonal failure modes (e.g. any
/// successful SMI query clears the SMI-command error class), but a single run
/// attributes at most one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    Pass { clears: Vec<IssueType> },
    Fail { issue: IssueType, detail: String },
}

impl Finding {
    pub fn pass<I: IntoIterator<Item = IssueType>>(clears: I) -> Self {
        Finding::Pass {
            clears: clears.into_iter().collect(),
        }
    }

    pub fn fail(issue: IssueType, detail: impl Into<String>) -> Self {
        Finding::Fail {
            issue,
            detail: detail.into(),
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Finding::Pass { .. })
    }
}

/// Lifecycle state of a persistent issue record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueStatus {
    Reported,
    Resolved,
}

impl IssueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueStatus::Reported => "reported",
            IssueStatus::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "resolved" => IssueStatus::Resolved,
            _ => IssueStatus::Reported,
        }
    }
}

/// Durable record of one `(host, issue type)` pair in the state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRecord {
    pub host: String,
    pub hostname: String,
    pub issue_type: String,
    pub extra: String,
    pub status: IssueStatus,
    pub priority: String,
    pub first_seen: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

/// One append-only row for the external event log.
#[derive(Debug, Clone)]
pub struct EventLogEntry {
    pub host_ip: String,
    pub host_name: String,
    pub issue_type: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

/// The four periodic inspection categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
    Gpu,
    System,
    Network,
    Storage,
}

impl TaskClass {
    pub const ALL: [TaskClass; 4] = [
        TaskClass::Gpu,
        TaskClass::System,
        TaskClass::Network,
        TaskClass::Storage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskClass::Gpu => "gpu",
            TaskClass::System => "system",
            TaskClass::Network => "network",
            TaskClass::Storage => "storage",
        }
    }
}
