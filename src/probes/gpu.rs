//! NVIDIA GPU probes.

use tracing::debug;

use crate::catalog::issue;
use crate::config::Thresholds;
use crate::model::{Finding, NodeSpec, RawPayload};
use crate::utils::truncate;

use super::parse_numeric_list;

/// XID codes that escalate the finding to a critical alert.
const CRITICAL_XID_CODES: [&str; 1] = ["79"];

// --- GPU count ---

pub fn count_command(_thresholds: &Thresholds) -> String {
    "nvidia-smi --query-gpu=gpu_uuid --format=csv,noheader | wc -l".to_string()
}

pub fn parse_count(payload: &RawPayload, _node: &NodeSpec, thresholds: &Thresholds) -> Finding {
    let expected = thresholds.gpu_count;
    if !payload.success {
        return Finding::fail(
            issue::SMI_CMD_ERROR,
            format!("Command to get GPU count failed: {}", payload.error),
        );
    }

    match payload.output.trim().parse::<i64>() {
        Ok(count) if count != expected => Finding::fail(
            issue::GPU_COUNT,
            format!("Expected {expected} GPUs, but found {count}."),
        ),
        Ok(_) => Finding::pass([issue::GPU_COUNT, issue::SMI_CMD_ERROR]),
        Err(_) => Finding::fail(
            issue::UNKNOWN,
            format!(
                "Could not parse GPU count from output: '{}'",
                payload.output
            ),
        ),
    }
}

// --- GPU temperature (two-level) ---

pub fn temperature_command(_thresholds: &Thresholds) -> String {
    "nvidia-smi --query-gpu=temperature.gpu --format=csv,noheader".to_string()
}

/// Critical readings preempt warning readings in the same run; warning lines
/// are not surfaced in a cycle that raised the critical type.
pub fn parse_temperature(
    payload: &RawPayload,
    _node: &NodeSpec,
    thresholds: &Thresholds,
) -> Finding {
    let warn_threshold = thresholds.gpu_temp;
    let critical_threshold = thresholds.gpu_high_temp;
    if !payload.success {
        return Finding::fail(
            issue::SMI_CMD_ERROR,
            format!("Command to get GPU temperature failed: {}", payload.error),
        );
    }

    let mut critical = Vec::new();
    let mut warning = Vec::new();
    for (index, line) in payload.output.trim().lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let temp: i64 = match line.parse() {
            Ok(temp) => temp,
            Err(err) => {
                return Finding::fail(
                    issue::UNKNOWN,
                    format!(
                        "Failed to parse GPU temperature output. Error: {err}. Output: '{}'",
                        truncate(&payload.output, 100)
                    ),
                )
            }
        };
        if temp > critical_threshold {
            critical.push(format!("GPU-{index} at {temp}C"));
        } else if temp > warn_threshold {
            warning.push(format!("GPU-{index} at {temp}C"));
        }
    }

    if !critical.is_empty() {
        return Finding::fail(
            issue::GPU_HIGH_TEMP,
            format!("Critical temperature detected: {}", critical.join("; ")),
        );
    }
    if !warning.is_empty() {
        return Finding::fail(
            issue::GPU_TEMP,
            format!("Warning temperature detected: {}", warning.join("; ")),
        );
    }
    Finding::pass([issue::GPU_HIGH_TEMP, issue::GPU_TEMP, issue::SMI_CMD_ERROR])
}

// --- XID errors ---

pub fn xid_command(_thresholds: &Thresholds) -> String {
    "dmesg -T | grep -i xid | tail -n 20".to_string()
}

pub fn parse_xid(payload: &RawPayload, node: &NodeSpec, _thresholds: &Thresholds) -> Finding {
    if !payload.success {
        // dmesg is unavailable to unprivileged users on some images; treat as
        // clean rather than raising a phantom alert every cycle.
        debug!(node = %node.display(), "dmesg unavailable for XID check: {}", payload.error);
        return Finding::pass([issue::XID_ERROR, issue::XID_INFO]);
    }

    let output = payload.output.trim();
    if output.is_empty() {
        return Finding::pass([issue::XID_ERROR, issue::XID_INFO]);
    }

    let critical = CRITICAL_XID_CODES
        .iter()
        .any(|code| output.contains(&format!("Xid: {code}")));
    if critical {
        Finding::fail(
            issue::XID_ERROR,
            format!("Critical XID error found. Recent logs: {output}"),
        )
    } else {
        Finding::fail(
            issue::XID_INFO,
            format!("Non-critical XID error found. Recent logs: {output}"),
        )
    }
}

// --- ECC uncorrected errors ---

pub fn ecc_soft_command(_thresholds: &Thresholds) -> String {
    "nvidia-smi --query-gpu=ecc.errors.uncorrected.volatile.total --format=csv,noheader".to_string()
}

pub fn parse_ecc_soft(payload: &RawPayload, _node: &NodeSpec, _thresholds: &Thresholds) -> Finding {
    parse_numeric_list(
        payload,
        issue::ECC_SOFT,
        issue::SMI_CMD_ERROR,
        0,
        "ECC Soft Uncorr",
    )
}

// --- PCIe link status ---

pub fn pcie_command(_thresholds: &Thresholds) -> String {
    r#"
    for dev_pci_addr in $(ibdev2netdev -v | grep 'ConnectX-7' | awk '{print $1}'); do
      status=$(lspci -vv -s "$dev_pci_addr" | grep 'LnkSta:');
      capability=$(lspci -vv -s "$dev_pci_addr" | grep 'LnkCap:');

      status_speed=$(echo "$status" | awk -F',|:' '{print $2}' | sed 's/Speed //g;s/GT.*//g' | xargs);
      status_width=$(echo "$status" | awk -F',|:' '{print $3}' | sed 's/Width //g' | xargs);
      cap_speed=$(echo "$capability" | awk -F',|:' '{print $2}' | sed 's/Speed //g;s/GT.*//g' | xargs);
      cap_width=$(echo "$capability" | awk -F',|:' '{print $3}' | sed 's/Width //g' | xargs);

      if [ $(echo "$status_speed < $cap_speed" | bc) -ne 0 ] || [ "$status_width" != "$cap_width" ]; then
        echo "DEGRADED: Device $dev_pci_addr. Capability:[$capability], Current Status:[$status]";
      fi
    done
    "#
    .to_string()
}

pub fn parse_pcie(payload: &RawPayload, _node: &NodeSpec, _thresholds: &Thresholds) -> Finding {
    if !payload.success {
        return Finding::fail(
            issue::UNKNOWN,
            format!("[PCIe] Command execution failed: {}", payload.error),
        );
    }
    if !payload.output.trim().is_empty() {
        return Finding::fail(
            issue::PCIE,
            format!("PCIe link degradation detected: {}", payload.output),
        );
    }
    Finding::pass([issue::PCIE])
}

// --- NVLink bridges ---

pub fn nvlink_command(_thresholds: &Thresholds) -> String {
    // grep -c exits 1 when the count is zero, which is a finding, not an
    // execution failure.
    "lspci | grep -i 'nvidia' | grep -c 'bridge' || true".to_string()
}

pub fn parse_nvlink(payload: &RawPayload, _node: &NodeSpec, thresholds: &Thresholds) -> Finding {
    let expected = thresholds.nvlink_bridge_count;
    if !payload.success {
        return Finding::fail(
            issue::UNKNOWN,
            format!("[NVLink] Command execution failed: {}", payload.error),
        );
    }

    match payload.output.trim().parse::<i64>() {
        Ok(bridges) if bridges != expected => Finding::fail(
            issue::NVLINK,
            format!("Expected {expected} NVIDIA bridges, but found {bridges}."),
        ),
        Ok(_) => Finding::pass([issue::NVLINK]),
        Err(_) => Finding::fail(
            issue::UNKNOWN,
            format!(
                "[NVLink] Could not parse bridge count from output: '{}'",
                payload.output
            ),
        ),
    }
}

// --- GPUDirect RDMA ---

pub fn gdr_command(_thresholds: &Thresholds) -> String {
    "lsmod | grep -c 'nv_peer_mem' || true".to_string()
}

pub fn parse_gdr(payload: &RawPayload, _node: &NodeSpec, _thresholds: &Thresholds) -> Finding {
    if !payload.success {
        return Finding::fail(
            issue::UNKNOWN,
            format!("[GDR] Command execution failed: {}", payload.error),
        );
    }

    match payload.output.trim().parse::<i64>() {
        Ok(0) => Finding::fail(
            issue::GDR,
            "GPUDirect RDMA module (nv_peer_mem) is not loaded.",
        ),
        Ok(_) => Finding::pass([issue::GDR]),
        Err(_) => Finding::fail(
            issue::UNKNOWN,
            format!("[GDR] Could not parse lsmod output: '{}'", payload.output),
        ),
    }
}

// --- Fabric Manager ---

pub fn fabric_manager_command(_thresholds: &Thresholds) -> String {
    "systemctl is-active nvidia-fabricmanager.service".to_string()
}

pub fn parse_fabric_manager(
    payload: &RawPayload,
    node: &NodeSpec,
    _thresholds: &Thresholds,
) -> Finding {
    if !payload.success {
        // Nodes without NVSwitch do not run the service at all.
        debug!(
            node = %node.display(),
            "fabric manager check failed (likely not installed): {}", payload.error
        );
        return Finding::pass([issue::FABRIC_MANAGER]);
    }

    let state = payload.output.trim();
    if state != "active" {
        return Finding::fail(
            issue::FABRIC_MANAGER,
            format!("NVIDIA Fabric Manager service is not active. Current state: {state}."),
        );
    }
    Finding::pass([issue::FABRIC_MANAGER])
}

// --- ACS ---

pub fn acs_command(_thresholds: &Thresholds) -> String {
    "lspci -vvv | grep ACSCtl | grep 'SrcValid+' || true".to_string()
}

pub fn parse_acs(payload: &RawPayload, _node: &NodeSpec, _thresholds: &Thresholds) -> Finding {
    if !payload.success {
        return Finding::fail(
            issue::UNKNOWN,
            format!("[ACS] Command execution failed: {}", payload.error),
        );
    }
    if !payload.output.trim().is_empty() {
        return Finding::fail(
            issue::ACS,
            format!(
                "ACS validation is improperly enabled on one or more devices: {}",
                payload.output
            ),
        );
    }
    Finding::pass([issue::ACS])
}

// --- Thermal slowdown ---

pub fn thermal_slowdown_command(_thresholds: &Thresholds) -> String {
    "nvidia-smi -q | grep 'Thermal Slowdown' || true".to_string()
}

pub fn parse_thermal_slowdown(
    payload: &RawPayload,
    _node: &NodeSpec,
    _thresholds: &Thresholds,
) -> Finding {
    if !payload.success {
        return Finding::fail(
            issue::SMI_CMD_ERROR,
            format!("[Thermal] Command execution failed: {}", payload.error),
        );
    }

    let active: Vec<&str> = payload
        .output
        .trim()
        .lines()
        .filter(|line| !line.is_empty() && !line.contains("Not Active"))
        .map(str::trim)
        .collect();
    if !active.is_empty() {
        return Finding::fail(
            issue::THERMAL_SLOWDOWN,
            format!("GPU thermal slowdown detected: {}", active.join("; ")),
        );
    }
    Finding::pass([issue::THERMAL_SLOWDOWN])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeSpec {
        NodeSpec {
            host: "10.0.0.1".to_string(),
            hostname: Some("gpu-node-01".to_string()),
            port: 22,
            username: "ops".to_string(),
            password: "secret".to_string(),
        }
    }

    fn thresholds() -> Thresholds {
        Thresholds::default()
    }

    #[test]
    fn count_mismatch_raises_gpu_count() {
        let finding = parse_count(&RawPayload::ok("7\n"), &node(), &thresholds());
        assert_eq!(
            finding,
            Finding::fail(issue::GPU_COUNT, "Expected 8 GPUs, but found 7.")
        );
    }

    #[test]
    fn count_match_covers_count_and_smi() {
        let finding = parse_count(&RawPayload::ok("8\n"), &node(), &thresholds());
        assert_eq!(
            finding,
            Finding::pass([issue::GPU_COUNT, issue::SMI_CMD_ERROR])
        );
    }

    #[test]
    fn count_exec_failure_raises_smi_cmd_error() {
        let finding = parse_count(
            &RawPayload::err("ExitCode:127, Stderr:'nvidia-smi: not found', Stdout:''"),
            &node(),
            &thresholds(),
        );
        match finding {
            Finding::Fail { issue, .. } => assert_eq!(issue, issue::SMI_CMD_ERROR),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn count_garbage_output_raises_unknown() {
        let finding = parse_count(&RawPayload::ok("not a number\n"), &node(), &thresholds());
        match finding {
            Finding::Fail { issue, .. } => assert_eq!(issue, issue::UNKNOWN),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn critical_temperature_preempts_warning() {
        let finding = parse_temperature(&RawPayload::ok("70\n88\n79\n"), &node(), &thresholds());
        assert_eq!(
            finding,
            Finding::fail(
                issue::GPU_HIGH_TEMP,
                "Critical temperature detected: GPU-1 at 88C"
            )
        );
    }

    #[test]
    fn warning_temperature_raises_lower_type() {
        let finding = parse_temperature(&RawPayload::ok("70\n82\n79\n"), &node(), &thresholds());
        assert_eq!(
            finding,
            Finding::fail(issue::GPU_TEMP, "Warning temperature detected: GPU-1 at 82C")
        );
    }

    #[test]
    fn cool_temperatures_cover_all_three_types() {
        let finding = parse_temperature(&RawPayload::ok("60\n61\n"), &node(), &thresholds());
        assert_eq!(
            finding,
            Finding::pass([issue::GPU_HIGH_TEMP, issue::GPU_TEMP, issue::SMI_CMD_ERROR])
        );
    }

    #[test]
    fn zero_ecc_counters_cover_ecc_and_smi() {
        let finding = parse_ecc_soft(
            &RawPayload::ok("0\n0\n0\n0\n0\n0\n0\n0\n"),
            &node(),
            &thresholds(),
        );
        assert_eq!(finding, Finding::pass([issue::ECC_SOFT, issue::SMI_CMD_ERROR]));
    }

    #[test]
    fn nonzero_ecc_counter_raises_ecc_soft() {
        let finding = parse_ecc_soft(&RawPayload::ok("0\n2\n0\n"), &node(), &thresholds());
        match finding {
            Finding::Fail { issue, detail } => {
                assert_eq!(issue, issue::ECC_SOFT);
                assert!(detail.contains("GPU-1 value is 2"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn critical_xid_is_elevated() {
        let logs = "[Mon] NVRM: Xid: 79, GPU has fallen off the bus";
        let finding = parse_xid(&RawPayload::ok(logs), &node(), &thresholds());
        match finding {
            Finding::Fail { issue, .. } => assert_eq!(issue, issue::XID_ERROR),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn other_xid_is_informational() {
        let logs = "[Mon] NVRM: Xid: 31, MMU fault";
        let finding = parse_xid(&RawPayload::ok(logs), &node(), &thresholds());
        match finding {
            Finding::Fail { issue, .. } => assert_eq!(issue, issue::XID_INFO),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn xid_tolerates_dmesg_failure() {
        let finding = parse_xid(&RawPayload::err("dmesg: permission denied"), &node(), &thresholds());
        assert_eq!(finding, Finding::pass([issue::XID_ERROR, issue::XID_INFO]));
    }

    #[test]
    fn fabric_manager_inactive_state_raises() {
        let finding = parse_fabric_manager(&RawPayload::ok("inactive\n"), &node(), &thresholds());
        match finding {
            Finding::Fail { issue, detail } => {
                assert_eq!(issue, issue::FABRIC_MANAGER);
                assert!(detail.contains("inactive"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn fabric_manager_tolerates_missing_service() {
        let finding = parse_fabric_manager(
            &RawPayload::err("ExitCode:4, Stderr:'Unit not found'"),
            &node(),
            &thresholds(),
        );
        assert_eq!(finding, Finding::pass([issue::FABRIC_MANAGER]));
    }

    #[test]
    fn gdr_missing_module_raises() {
        let finding = parse_gdr(&RawPayload::ok("0\n"), &node(), &thresholds());
        match finding {
            Finding::Fail { issue, .. } => assert_eq!(issue, issue::GDR),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn thermal_slowdown_ignores_inactive_lines() {
        let output = "        Thermal Slowdown            : Not Active\n        Thermal Slowdown            : Not Active\n";
        let finding = parse_thermal_slowdown(&RawPayload::ok(output), &node(), &thresholds());
        assert_eq!(finding, Finding::pass([issue::THERMAL_SLOWDOWN]));
    }

    #[test]
    fn thermal_slowdown_active_line_raises() {
        let output = "        Thermal Slowdown            : Active\n";
        let finding = parse_thermal_slowdown(&RawPayload::ok(output), &node(), &thresholds());
        match finding {
            Finding::Fail { issue, .. } => assert_eq!(issue, issue::THERMAL_SLOWDOWN),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
