//! Muxi (MetaX) GPU probes, selected by the `muxi_c100` profile.

use crate::catalog::issue;
use crate::config::Thresholds;
use crate::model::{Finding, NodeSpec, RawPayload};
use crate::utils::truncate;

use super::parse_numeric_list;

// --- Muxi GPU count ---

pub fn count_command(_thresholds: &Thresholds) -> String {
    "mxgpu-smi -L | wc -l".to_string()
}

pub fn parse_count(payload: &RawPayload, _node: &NodeSpec, thresholds: &Thresholds) -> Finding {
    let expected = thresholds.gpu_count;
    if !payload.success {
        return Finding::fail(
            issue::MUXI_SMI_CMD_ERROR,
            format!("Command to get Muxi GPU count failed: {}", payload.error),
        );
    }

    match payload.output.trim().parse::<i64>() {
        Ok(count) if count != expected => Finding::fail(
            issue::MUXI_GPU_COUNT,
            format!("Expected {expected} Muxi GPUs, but found {count}."),
        ),
        Ok(_) => Finding::pass([issue::MUXI_GPU_COUNT, issue::MUXI_SMI_CMD_ERROR]),
        Err(_) => Finding::fail(
            issue::UNKNOWN,
            format!(
                "Could not parse Muxi GPU count from output: '{}'",
                payload.output
            ),
        ),
    }
}

// --- Muxi GPU temperature ---

pub fn temperature_command(_thresholds: &Thresholds) -> String {
    "mxgpu-smi --query-gpu=temperature.gpu --format=csv,noheader".to_string()
}

pub fn parse_temperature(
    payload: &RawPayload,
    _node: &NodeSpec,
    thresholds: &Thresholds,
) -> Finding {
    parse_numeric_list(
        payload,
        issue::MUXI_GPU_TEMP,
        issue::MUXI_SMI_CMD_ERROR,
        thresholds.gpu_high_temp,
        "Muxi Temp",
    )
}

// --- Muxi ECC state ---

pub fn ecc_state_command(_thresholds: &Thresholds) -> String {
    "mxgpu-smi -q -d ECC".to_string()
}

pub fn parse_ecc_state(payload: &RawPayload, _node: &NodeSpec, _thresholds: &Thresholds) -> Finding {
    if !payload.success {
        return Finding::fail(
            issue::MUXI_SMI_CMD_ERROR,
            format!("Command for Muxi ECC state failed: {}", payload.error),
        );
    }

    let errors: Vec<&str> = payload
        .output
        .lines()
        .map(str::trim)
        .filter(|line| line.contains("Errors") && !line.contains(" 0"))
        .collect();
    if !errors.is_empty() {
        return Finding::fail(
            issue::MUXI_ECC_STATE,
            format!("Muxi ECC errors detected: {}", errors.join("; ")),
        );
    }
    Finding::pass([issue::MUXI_ECC_STATE])
}

// --- Muxi PCIe link status ---

pub fn pcie_command(_thresholds: &Thresholds) -> String {
    "mxgpu-smi --query-gpu=pci.link.gen.current,pci.link.gen.max,pci.link.width.current,pci.link.width.max --format=csv,noheader"
        .to_string()
}

pub fn parse_pcie(payload: &RawPayload, _node: &NodeSpec, _thresholds: &Thresholds) -> Finding {
    if !payload.success {
        return Finding::fail(
            issue::MUXI_SMI_CMD_ERROR,
            format!("[PCIe] Command execution failed: {}", payload.error),
        );
    }

    let mut degraded = Vec::new();
    for (index, line) in payload.output.trim().lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<i64> = line
            .split(',')
            .map(|field| field.trim().parse::<i64>())
            .collect::<Result<_, _>>()
            .unwrap_or_default();
        let [gen_current, gen_max, width_current, width_max] = fields[..] else {
            return Finding::fail(
                issue::UNKNOWN,
                format!(
                    "[PCIe] Failed to parse Muxi PCIe status. Output: '{}'",
                    truncate(&payload.output, 100)
                ),
            );
        };
        if gen_current < gen_max || width_current < width_max {
            degraded.push(format!(
                "GPU-{index} degraded (Gen:{gen_current}/{gen_max}, Width:x{width_current}/x{width_max})"
            ));
        }
    }

    if !degraded.is_empty() {
        return Finding::fail(
            issue::MUXI_PCIE,
            format!("Muxi PCIe link degradation detected: {}", degraded.join("; ")),
        );
    }
    Finding::pass([issue::MUXI_PCIE])
}

// --- Muxi thermal status ---

pub fn thermal_command(_thresholds: &Thresholds) -> String {
    "mxgpu-smi -q -d PERFORMANCE".to_string()
}

pub fn parse_thermal(payload: &RawPayload, _node: &NodeSpec, _thresholds: &Thresholds) -> Finding {
    if !payload.success {
        return Finding::fail(
            issue::MUXI_SMI_CMD_ERROR,
            format!("[Thermal] Command execution failed: {}", payload.error),
        );
    }

    let throttling: Vec<&str> = payload
        .output
        .lines()
        .map(str::trim)
        .filter(|line| {
            (line.contains("Throttle") || line.contains("Slowdown"))
                && !line.contains("Not Active")
                && !line.contains("None")
        })
        .collect();
    if !throttling.is_empty() {
        return Finding::fail(
            issue::MUXI_THERMAL,
            format!("Muxi GPU thermal slowdown detected: {}", throttling.join("; ")),
        );
    }
    Finding::pass([issue::MUXI_THERMAL])
}

// --- Muxi MetaXLink status ---

pub fn metaxlink_command(_thresholds: &Thresholds) -> String {
    "mxgpu-smi metaxlink -s".to_string()
}

pub fn parse_metaxlink(payload: &RawPayload, _node: &NodeSpec, _thresholds: &Thresholds) -> Finding {
    if !payload.success {
        return Finding::fail(
            issue::MUXI_SMI_CMD_ERROR,
            format!("[MetaXLink] Command execution failed: {}", payload.error),
        );
    }

    let inactive: Vec<&str> = payload
        .output
        .lines()
        .map(str::trim)
        .filter(|line| line.contains("Link") && !line.contains("Active") && !line.contains("UP"))
        .collect();
    if !inactive.is_empty() {
        return Finding::fail(
            issue::MUXI_METAXLINK,
            format!("Muxi MetaXLink inactive links found: {}", inactive.join("; ")),
        );
    }
    Finding::pass([issue::MUXI_METAXLINK])
}
