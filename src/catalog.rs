//! Static alert metadata: issue-type constants and the priority / routing
//! table.
//!
//! Probes never name priorities, they name issue types; this catalog is the
//! single place where an issue type gains a priority, a routing group and a
//! human title.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::model::IssueType;

/// Interned issue-type names.
pub mod issue {
    use crate::model::IssueType;

    pub const UNKNOWN: IssueType = "unknown";

    // System & server
    pub const SSH: IssueType = "system.ssh";
    pub const SHUTDOWN: IssueType = "system.shutdown";
    pub const DISK_USAGE: IssueType = "system.disk_usage";
    pub const MEMORY_USAGE: IssueType = "system.memory_usage";
    pub const HW_ERROR: IssueType = "system.hw_error";

    // Network
    pub const ROUTE: IssueType = "network.route";
    pub const IB_DEVICE: IssueType = "network.ib_device_status";
    pub const IB_DEVICE_COUNT: IssueType = "network.ib_device_count";
    pub const IP_RULE: IssueType = "network.ip_rule";

    // NVIDIA GPU
    pub const GPU_COUNT: IssueType = "gpu.count";
    pub const GPU_TEMP: IssueType = "gpu.temperature";
    pub const GPU_HIGH_TEMP: IssueType = "gpu.high_temp";
    pub const ECC_SOFT: IssueType = "gpu.ecc_soft_error";
    pub const PCIE: IssueType = "gpu.pcie_status";
    pub const NVLINK: IssueType = "gpu.nvlink_status";
    pub const GDR: IssueType = "gpu.gdr_status";
    pub const FABRIC_MANAGER: IssueType = "gpu.fabric_manager_status";
    pub const ACS: IssueType = "gpu.acs_status";
    pub const THERMAL_SLOWDOWN: IssueType = "gpu.thermal_slowdown";
    pub const XID_INFO: IssueType = "gpu.xid_info";
    pub const XID_ERROR: IssueType = "gpu.xid_error";
    pub const SMI_CMD_ERROR: IssueType = "gpu.smi_cmd_error";

    // Storage
    pub const GPFS: IssueType = "storage.gpfs";

    // Muxi GPU
    pub const MUXI_SMI_CMD_ERROR: IssueType = "gpu.muxi.smi_cmd_error";
    pub const MUXI_GPU_COUNT: IssueType = "gpu.muxi.count";
    pub const MUXI_GPU_TEMP: IssueType = "gpu.muxi.temperature";
    pub const MUXI_ECC_STATE: IssueType = "gpu.muxi.ecc_state";
    pub const MUXI_PCIE: IssueType = "gpu.muxi.pcie_status";
    pub const MUXI_THERMAL: IssueType = "gpu.muxi.thermal_status";
    pub const MUXI_METAXLINK: IssueType = "network.muxi.metaxlink_status";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl Priority {
    pub fn label(self) -> &'static str {
        match self {
            Priority::P0 => "P0 - Critical",
            Priority::P1 => "P1 - High",
            Priority::P2 => "P2 - Medium",
            Priority::P3 => "P3 - Low",
        }
    }

    /// P0/P1 alerts embed an at-all mention in the webhook payload.
    pub fn pages_everyone(self) -> bool {
        matches!(self, Priority::P0 | Priority::P1)
    }
}

/// Routing bucket selecting the destination webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertGroup {
    Hardware,
    Software,
    Analytics,
}

impl AlertGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertGroup::Hardware => "hardware_group",
            AlertGroup::Software => "software_group",
            AlertGroup::Analytics => "analytics_group",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AlertMeta {
    pub priority: Priority,
    pub group: AlertGroup,
    pub title: &'static str,
}

const fn meta(priority: Priority, group: AlertGroup, title: &'static str) -> AlertMeta {
    AlertMeta {
        priority,
        group,
        title,
    }
}

static CATALOG: Lazy<HashMap<IssueType, AlertMeta>> = Lazy::new(|| {
    use AlertGroup::{Analytics, Hardware, Software};
    use Priority::{P1, P2, P3};

    HashMap::from([
        // P1 hardware
        (issue::SSH, meta(P1, Hardware, "Node SSH login failed")),
        (issue::IB_DEVICE, meta(P1, Hardware, "Node IB port down")),
        (issue::GPU_COUNT, meta(P1, Hardware, "Node GPU count mismatch")),
        (issue::ECC_SOFT, meta(P1, Hardware, "Node GPU ECC errors")),
        (
            issue::SMI_CMD_ERROR,
            meta(P1, Hardware, "Node nvidia-smi hung or failing"),
        ),
        (
            issue::IB_DEVICE_COUNT,
            meta(P1, Hardware, "Node IB device count mismatch"),
        ),
        (
            issue::GPU_HIGH_TEMP,
            meta(P1, Hardware, "Node GPU critically over temperature"),
        ),
        (
            issue::XID_ERROR,
            meta(P1, Hardware, "Node critical XID error"),
        ),
        (
            issue::SHUTDOWN,
            meta(P1, Hardware, "Node instance unreachable"),
        ),
        (issue::HW_ERROR, meta(P1, Hardware, "Node hardware error")),
        (
            issue::NVLINK,
            meta(P1, Hardware, "Node NVLink link state abnormal"),
        ),
        (
            issue::MUXI_PCIE,
            meta(P1, Hardware, "Node Muxi GPU PCIe link degraded"),
        ),
        // P2 software / ops
        (
            issue::PCIE,
            meta(P2, Software, "Node NIC PCIe link degraded"),
        ),
        (
            issue::DISK_USAGE,
            meta(P2, Software, "Node disk usage over threshold"),
        ),
        (
            issue::MEMORY_USAGE,
            meta(P2, Software, "Node memory usage over threshold"),
        ),
        (
            issue::GPU_TEMP,
            meta(P2, Software, "Node GPU over temperature"),
        ),
        (
            issue::ACS,
            meta(P2, Software, "Node PCIe ACS state abnormal"),
        ),
        (
            issue::FABRIC_MANAGER,
            meta(P2, Software, "Node Fabric Manager service abnormal"),
        ),
        (
            issue::GDR,
            meta(P2, Software, "Node GPUDirect RDMA (GDR) abnormal"),
        ),
        (
            issue::GPFS,
            meta(P2, Software, "Node GPFS mount state abnormal"),
        ),
        (
            issue::ROUTE,
            meta(P2, Software, "Node route state abnormal"),
        ),
        (issue::UNKNOWN, meta(P2, Software, "Unknown check error")),
        (
            issue::MUXI_SMI_CMD_ERROR,
            meta(P2, Software, "Node mxgpu-smi hung or failing"),
        ),
        (
            issue::MUXI_GPU_COUNT,
            meta(P2, Software, "Node Muxi GPU count mismatch"),
        ),
        (
            issue::MUXI_GPU_TEMP,
            meta(P2, Software, "Node Muxi GPU over temperature"),
        ),
        (
            issue::MUXI_ECC_STATE,
            meta(P2, Software, "Node Muxi GPU ECC errors"),
        ),
        (
            issue::MUXI_METAXLINK,
            meta(P2, Software, "Node Muxi MetaXLink link state abnormal"),
        ),
        // P3 analytics (daily digest)
        (
            issue::THERMAL_SLOWDOWN,
            meta(P3, Analytics, "Node GPU thermal slowdown (recorded)"),
        ),
        (
            issue::XID_INFO,
            meta(P3, Analytics, "Node non-critical XID error (recorded)"),
        ),
        (
            issue::IP_RULE,
            meta(P3, Analytics, "Node IP rule check abnormal (recorded)"),
        ),
        (
            issue::MUXI_THERMAL,
            meta(P3, Analytics, "Node Muxi GPU throttling (recorded)"),
        ),
    ])
});

/// Metadata for an issue type. Unlisted types fall back to P2 / software so a
/// finding is never dropped for lacking a catalog entry.
pub fn lookup(issue_type: &str) -> AlertMeta {
    CATALOG.get(issue_type).copied().unwrap_or(meta(
        Priority::P2,
        AlertGroup::Software,
        "Unclassified check failure",
    ))
}

/// All issue types the daily digest aggregates, in stable order.
pub fn p3_types() -> Vec<IssueType> {
    let mut types: Vec<IssueType> = CATALOG
        .iter()
        .filter(|(_, meta)| meta.priority == Priority::P3)
        .map(|(issue_type, _)| *issue_type)
        .collect();
    types.sort_unstable();
    types
}
