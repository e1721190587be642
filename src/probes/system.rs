//! Operating-system probes.

use tracing::debug;

use crate::catalog::issue;
use crate::config::Thresholds;
use crate::model::{Finding, NodeSpec, RawPayload};

// --- Disk usage ---

pub fn disk_usage_command(_thresholds: &Thresholds) -> String {
    "df -Ph / | tail -n 1".to_string()
}

pub fn parse_disk_usage(
    payload: &RawPayload,
    _node: &NodeSpec,
    thresholds: &Thresholds,
) -> Finding {
    if !payload.success {
        return Finding::fail(
            issue::UNKNOWN,
            format!("[Disk] Command execution failed: {}", payload.error),
        );
    }

    let parts: Vec<&str> = payload.output.split_whitespace().collect();
    if parts.len() < 5 {
        return Finding::fail(
            issue::UNKNOWN,
            format!("[Disk] Failed to parse df output: '{}'", payload.output),
        );
    }

    match parts[4].trim_end_matches('%').parse::<i64>() {
        Ok(usage) if usage >= thresholds.disk_usage_percent => Finding::fail(
            issue::DISK_USAGE,
            format!(
                "Root disk usage is at {usage}% (threshold >= {}%).",
                thresholds.disk_usage_percent
            ),
        ),
        Ok(_) => Finding::pass([issue::DISK_USAGE, issue::SHUTDOWN]),
        Err(err) => Finding::fail(
            issue::UNKNOWN,
            format!(
                "[Disk] Could not parse percentage from '{}'. Error: {err}",
                payload.output
            ),
        ),
    }
}

// --- Memory usage ---

pub fn memory_usage_command(_thresholds: &Thresholds) -> String {
    "free -m | awk '/^Mem:/{printf(\"%.0f\", $3/$2 * 100)}'".to_string()
}

pub fn parse_memory_usage(
    payload: &RawPayload,
    _node: &NodeSpec,
    thresholds: &Thresholds,
) -> Finding {
    if !payload.success {
        return Finding::fail(
            issue::UNKNOWN,
            format!("[Memory] Command execution failed: {}", payload.error),
        );
    }

    match payload.output.trim().parse::<i64>() {
        Ok(usage) if usage >= thresholds.memory_usage_percent => Finding::fail(
            issue::MEMORY_USAGE,
            format!(
                "Memory usage is at {usage}% (threshold >= {}%).",
                thresholds.memory_usage_percent
            ),
        ),
        Ok(_) => Finding::pass([issue::MEMORY_USAGE, issue::SHUTDOWN]),
        Err(err) => Finding::fail(
            issue::UNKNOWN,
            format!(
                "[Memory] Could not parse percentage from `free` output: '{}'. Error: {err}",
                payload.output
            ),
        ),
    }
}

// --- Hardware errors ---

pub fn hardware_error_command(_thresholds: &Thresholds) -> String {
    "dmesg -T | grep -i 'Hardware error' | tail -n 20".to_string()
}

pub fn parse_hardware_error(
    payload: &RawPayload,
    node: &NodeSpec,
    _thresholds: &Thresholds,
) -> Finding {
    if !payload.success {
        debug!(
            node = %node.display(),
            "dmesg unavailable for hardware error check: {}", payload.error
        );
        return Finding::pass([issue::HW_ERROR, issue::SHUTDOWN]);
    }

    if !payload.output.trim().is_empty() {
        return Finding::fail(
            issue::HW_ERROR,
            format!(
                "Recent hardware error detected in dmesg. Last few lines: {}",
                payload.output
            ),
        );
    }
    Finding::pass([issue::HW_ERROR, issue::SHUTDOWN])
}
