//! Probe registry.
//!
//! A probe is a named pair of command producer and parser. The registry is a
//! static table; the executor looks probes up by the names listed in the
//! profiles configuration. Parsers are pure and panic-isolated: a parser
//! that cannot interpret a payload returns an `unknown` finding, and a
//! parser that panics is caught here and converted to the same.

pub mod gpu;
pub mod muxi;
pub mod network;
pub mod storage;
pub mod system;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use once_cell::sync::Lazy;

use crate::catalog::issue;
use crate::config::Thresholds;
use crate::model::{Finding, IssueType, NodeSpec, RawPayload};
use crate::utils::truncate;

type CommandFn = fn(&Thresholds) -> String;
type ParseFn = fn(&RawPayload, &NodeSpec, &Thresholds) -> Finding;

pub struct Probe {
    pub name: &'static str,
    command: CommandFn,
    parser: ParseFn,
}

impl Probe {
    pub const fn new(name: &'static str, command: CommandFn, parser: ParseFn) -> Self {
        Self {
            name,
            command,
            parser,
        }
    }

    pub fn command(&self, thresholds: &Thresholds) -> String {
        (self.command)(thresholds)
    }

    /// Runs the parser with panic isolation.
    pub fn parse(&self, payload: &RawPayload, node: &NodeSpec, thresholds: &Thresholds) -> Finding {
        match catch_unwind(AssertUnwindSafe(|| (self.parser)(payload, node, thresholds))) {
            Ok(finding) => finding,
            Err(panic) => Finding::fail(
                issue::UNKNOWN,
                format!("[{}] parser panicked: {}", self.name, panic_message(&panic)),
            ),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "opaque panic payload"
    }
}

static REGISTRY: Lazy<HashMap<&'static str, Probe>> = Lazy::new(|| {
    let probes = [
        // NVIDIA GPU
        Probe::new("gpu.count", gpu::count_command, gpu::parse_count),
        Probe::new(
            "gpu.temperature",
            gpu::temperature_command,
            gpu::parse_temperature,
        ),
        Probe::new(
            "gpu.thermal_slowdown",
            gpu::thermal_slowdown_command,
            gpu::parse_thermal_slowdown,
        ),
        Probe::new(
            "gpu.ecc_soft_error",
            gpu::ecc_soft_command,
            gpu::parse_ecc_soft,
        ),
        Probe::new("gpu.xid_error", gpu::xid_command, gpu::parse_xid),
        Probe::new("gpu.nvlink_status", gpu::nvlink_command, gpu::parse_nvlink),
        Probe::new("gpu.pcie_status", gpu::pcie_command, gpu::parse_pcie),
        Probe::new("gpu.gdr_status", gpu::gdr_command, gpu::parse_gdr),
        Probe::new("gpu.acs_status", gpu::acs_command, gpu::parse_acs),
        Probe::new(
            "gpu.fabric_manager_status",
            gpu::fabric_manager_command,
            gpu::parse_fabric_manager,
        ),
        // System
        Probe::new(
            "system.disk_usage",
            system::disk_usage_command,
            system::parse_disk_usage,
        ),
        Probe::new(
            "system.memory_usage",
            system::memory_usage_command,
            system::parse_memory_usage,
        ),
        Probe::new(
            "system.hw_error",
            system::hardware_error_command,
            system::parse_hardware_error,
        ),
        // Network
        Probe::new("network.route", network::route_command, network::parse_route),
        Probe::new(
            "network.ib_device_status",
            network::ib_status_command,
            network::parse_ib_status,
        ),
        Probe::new(
            "network.ib_device_count",
            network::ib_count_command,
            network::parse_ib_count,
        ),
        Probe::new(
            "network.ip_rule",
            network::ip_rule_command,
            network::parse_ip_rule,
        ),
        // Storage
        Probe::new("storage.gpfs", storage::gpfs_command, storage::parse_gpfs),
        // Muxi GPU
        Probe::new("gpu.muxi.count", muxi::count_command, muxi::parse_count),
        Probe::new(
            "gpu.muxi.temperature",
            muxi::temperature_command,
            muxi::parse_temperature,
        ),
        Probe::new(
            "gpu.muxi.ecc_state",
            muxi::ecc_state_command,
            muxi::parse_ecc_state,
        ),
        Probe::new("gpu.muxi.pcie_status", muxi::pcie_command, muxi::parse_pcie),
        Probe::new(
            "gpu.muxi.thermal_status",
            muxi::thermal_command,
            muxi::parse_thermal,
        ),
        Probe::new(
            "network.muxi.metaxlink_status",
            muxi::metaxlink_command,
            muxi::parse_metaxlink,
        ),
    ];
    probes.into_iter().map(|probe| (probe.name, probe)).collect()
});

pub fn get(name: &str) -> Option<&'static Probe> {
    REGISTRY.get(name)
}

pub fn names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = REGISTRY.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Per-device numeric list: one integer per GPU index, failure listing the
/// devices over the threshold. Shared by the ECC and Muxi temperature
/// probes.
pub(crate) fn parse_numeric_list(
    payload: &RawPayload,
    issue_type: IssueType,
    exec_error_type: IssueType,
    threshold: i64,
    label: &str,
) -> Finding {
    if !payload.success {
        return Finding::fail(
            exec_error_type,
            format!("[{label}] Command execution failed: {}", payload.error),
        );
    }

    let mut over = Vec::new();
    for (index, line) in payload.output.trim().lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<i64>() {
            Ok(value) if value > threshold => over.push(format!("GPU-{index} value is {value}")),
            Ok(_) => {}
            Err(err) => {
                return Finding::fail(
                    issue::UNKNOWN,
                    format!(
                        "[{label}] Failed to parse output. Error: {err}. Output: '{}'",
                        truncate(&payload.output, 100)
                    ),
                )
            }
        }
    }

    if !over.is_empty() {
        return Finding::fail(
            issue_type,
            format!(
                "[{label}] Found {} GPU(s) over threshold > {threshold}. Details: {}",
                over.len(),
                over.join("; ")
            ),
        );
    }

    Finding::pass([issue_type, exec_error_type])
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

    #[test]
    fn registry_resolves_every_declared_probe() {
        for name in [
            "gpu.count",
            "gpu.temperature",
            "gpu.ecc_soft_error",
            "system.disk_usage",
            "network.route",
            "storage.gpfs",
            "gpu.muxi.count",
            "network.muxi.metaxlink_status",
        ] {
            assert!(get(name).is_some(), "missing probe {name}");
        }
        assert!(get("gpu.nonexistent").is_none());
    }

    #[test]
    fn zz_minimal_repro() {
        fn boom() -> i32 {
            panic!("fixture parser exploded");
        }
        let r = catch_unwind(AssertUnwindSafe(boom));
        if let Err(e) = &r {
            eprintln!("MINIMAL is_str={} is_string={}", e.is::<&str>(), e.is::<String>());
        }
    }

    #[test]
    fn zz_minimal_repro5() {
        struct P { name: &'static str, command: CommandFn, parser: ParseFn }
        impl P {
            const fn new(name: &'static str, command: CommandFn, parser: ParseFn) -> Self {
                Self { name, command, parser }
            }
            fn parse(&self, payload: &RawPayload, node: &NodeSpec, thresholds: &Thresholds) -> Finding {
                match catch_unwind(AssertUnwindSafe(|| (self.parser)(payload, node, thresholds))) {
                    Ok(finding) => finding,
                    Err(panic) => {
                        eprintln!("MINIMAL5 is_str={} is_string={}", panic.is::<&str>(), panic.is::<String>());
                        Finding::fail(issue::UNKNOWN, format!("[{}] boom", self.name))
                    }
                }
            }
        }
        fn boom_command(_: &Thresholds) -> String { "true".into() }
        fn boom_parser(_: &RawPayload, _: &NodeSpec, _: &Thresholds) -> Finding {
            panic!("fixture parser exploded");
        }
        let p = P::new("test.boom", boom_command, boom_parser);
        let _finding = p.parse(&RawPayload::ok(""), &node(), &Thresholds::default());
    }

    #[test]
    fn zz_minimal_repro4() {
        fn boom_parser(_: &RawPayload, _: &NodeSpec, _: &Thresholds) -> Finding {
            panic!("fixture parser exploded");
        }
        let fp: ParseFn = boom_parser;
        let payload = RawPayload::ok("");
        let n = node();
        let t = Thresholds::default();
        let r = catch_unwind(AssertUnwindSafe(|| fp(&payload, &n, &t)));
        if let Err(e) = &r {
            eprintln!("MINIMAL4 is_str={} is_string={}", e.is::<&str>(), e.is::<String>());
        }
    }

    #[test]
    fn zz_minimal_repro3() {
        fn boom_command(_: &Thresholds) -> String { "true".to_string() }
        fn boom_parser(_: &RawPayload, _: &NodeSpec, _: &Thresholds) -> Finding {
            panic!("fixture parser exploded");
        }
        let probe = Probe::new("test.boom", boom_command, boom_parser);
        let finding = probe.parse(&RawPayload::ok(""), &node(), &Thresholds::default());
        eprintln!("MINIMAL3 finding={:?}", finding);
    }

    #[test]
    fn zz_minimal_repro2() {
        fn boom_parser(_: &RawPayload, _: &NodeSpec, _: &Thresholds) -> Finding {
            panic!("fixture parser exploded");
        }
        let payload = RawPayload::ok("");
        let n = node();
        let t = Thresholds::default();
        let r = catch_unwind(AssertUnwindSafe(|| boom_parser(&payload, &n, &t)));
        if let Err(e) = &r {
            eprintln!("MINIMAL2 is_str={} is_string={}", e.is::<&str>(), e.is::<String>());
        }
    }

    #[test]
    fn a_panicking_parser_becomes_an_unknown_finding() {
        fn boom_command(_thresholds: &Thresholds) -> String {
            "true".to_string()
        }
        fn boom_parser(_: &RawPayload, _: &NodeSpec, _: &Thresholds) -> Finding {
            panic!("fixture parser exploded");
        }
        let probe = Probe::new("test.boom", boom_command, boom_parser);

    let finding = probe.parse(&RawPayload::ok(""), &node(), &Thresholds::default());
        let r = catch_unwind(AssertUnwindSafe(|| boom_parser(&RawPayload::ok(""), &node(), &Thresholds::default())));
        if let Err(e) = &r {
            eprintln!("DIRECT is_str={} is_string={} fnptr={:?}", e.is::<&str>(), e.is::<String>(), boom_parser as usize);
        }
        match finding {
            Finding::Fail { issue, detail } => {
                assert_eq!(issue, issue::UNKNOWN);
                assert!(detail.contains("fixture parser exploded"));
            }
            other => panic!("expected unknown failure, got {other:?}"),
        }
    }

    #[test]
    fn numeric_list_flags_devices_over_threshold() {
        let payload = RawPayload::ok("0\n3\n0\n");
        let finding = parse_numeric_list(&payload, "t.issue", "t.exec", 0, "Fixture");
        match finding {
            Finding::Fail { issue, detail } => {
                assert_eq!(issue, "t.issue");
                assert!(detail.contains("GPU-1 value is 3"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn numeric_list_passes_and_covers_both_types() {
        let payload = RawPayload::ok("0\n0\n");
        let finding = parse_numeric_list(&payload, "t.issue", "t.exec", 0, "Fixture");
        assert_eq!(finding, Finding::pass(["t.issue", "t.exec"]));
    }

    #[test]
    fn numeric_list_exec_failure_uses_exec_error_type() {
        let payload = RawPayload::err("boom");
        let finding = parse_numeric_list(&payload, "t.issue", "t.exec", 0, "Fixture");
        match finding {
            Finding::Fail { issue, .. } => assert_eq!(issue, "t.exec"),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
