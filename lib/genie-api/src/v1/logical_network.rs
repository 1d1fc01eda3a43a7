use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::non_blank;

/// LogicalNetwork names a plugin and/or a subnet carve-out for pods,
/// optionally referring to a PhysicalNetwork in the same namespace
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "alpha.network.k8s.io",
    version = "v1",
    kind = "LogicalNetwork",
    plural = "logicalnetworks",
    namespaced,
    derive = "Default",
    printcolumn = r#"{"name":"Plugin","type":"string","jsonPath":".spec.plugin"}"#,
    printcolumn = r#"{"name":"Subnet","type":"string","jsonPath":".spec.sub_subnet"}"#,
)]
pub struct LogicalNetworkSpec {
    /// Name of the PhysicalNetwork this logical network is carved from
    #[serde(rename = "physicalNet", default, skip_serializing_if = "Option::is_none")]
    pub physical_net: Option<String>,

    /// Subnet (CIDR) handed to the plugin's IPAM
    #[serde(rename = "sub_subnet", default, skip_serializing_if = "Option::is_none")]
    pub sub_subnet: Option<String>,

    /// Plugin to use (required unless a dedicated physical network supplies it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
}

impl LogicalNetworkSpec {
    pub fn physical_net(&self) -> Option<&str> {
        non_blank(&self.physical_net)
    }

    pub fn sub_subnet(&self) -> Option<&str> {
        non_blank(&self.sub_subnet)
    }

    pub fn plugin(&self) -> Option<&str> {
        non_blank(&self.plugin)
    }
}
