//! Per-dispatch node profile discovery.
//!
//! Two cheap probes on the live session classify the node's GPU vendor.
//! Discovery runs once per task dispatch and is deliberately not cached
//! across cycles: vendors can change after a hardware swap and the cost is
//! two round-trips.

use std::time::Duration;

use tracing::{info, warn};

use crate::session::NodeSession;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    NvidiaDatacenter,
    Nvidia4090,
    MuxiC100,
    Unknown,
}

impl Profile {
    /// Label used as the key into the profiles configuration.
    pub fn label(self) -> &'static str {
        match self {
            Profile::NvidiaDatacenter => "nvidia_datacenter",
            Profile::Nvidia4090 => "nvidia_4090",
            Profile::MuxiC100 => "muxi_c100",
            Profile::Unknown => "unknown",
        }
    }
}

pub async fn discover_profile(session: &dyn NodeSession, node_name: &str) -> Profile {
    let muxi = session.exec("which mxgpu-smi", DISCOVERY_TIMEOUT).await;
    if muxi.success && muxi.output.contains("mxgpu-smi") {
        info!(node = %node_name, "discovered Muxi GPU, profile 'muxi_c100'");
        return Profile::MuxiC100;
    }

    let nvidia = session.exec("nvidia-smi -L", DISCOVERY_TIMEOUT).await;
    if nvidia.success && !nvidia.output.trim().is_empty() {
        if nvidia.output.contains("GeForce RTX 4090") {
            info!(node = %node_name, "discovered NVIDIA 4090 GPU, profile 'nvidia_4090'");
            return Profile::Nvidia4090;
        }
        info!(node = %node_name, "discovered NVIDIA datacenter GPU, profile 'nvidia_datacenter'");
        return Profile::NvidiaDatacenter;
    }

    warn!(node = %node_name, "could not identify GPU vendor, profile 'unknown'");
    Profile::Unknown
}
