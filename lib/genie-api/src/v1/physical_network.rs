use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::non_blank;

/// PhysicalNetwork describes the underlay a LogicalNetwork is carved from
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "alpha.network.k8s.io",
    version = "v1",
    kind = "PhysicalNetwork",
    plural = "physicalnetworks",
    namespaced,
    derive = "Default",
)]
pub struct PhysicalNetworkSpec {
    /// Host NIC backing this network (e.g., "eth1")
    #[serde(rename = "refer_nic", default)]
    pub refer_nic: String,

    /// Sharing mode and the carve-out owned by a dedicated network
    #[serde(rename = "sharedStatus", default)]
    pub shared_status: SharedStatus,
}

/// Sharing mode of a physical network
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct SharedStatus {
    /// Plugin owning the network (required when dedicated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,

    /// Outer subnet (CIDR)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,

    /// Whether the network is dedicated to a single plugin
    #[serde(rename = "dedicatedNetwork", default)]
    pub dedicated: bool,
}

impl PhysicalNetworkSpec {
    pub fn is_dedicated(&self) -> bool {
        self.shared_status.dedicated
    }

    pub fn plugin(&self) -> Option<&str> {
        non_blank(&self.shared_status.plugin)
    }

    pub fn subnet(&self) -> Option<&str> {
        non_blank(&self.shared_status.subnet)
    }

    pub fn refer_nic(&self) -> Option<&str> {
        Some(self.refer_nic.trim()).filter(|nic| !nic.is_empty())
    }
}
