//! Pod annotation keys and the JSON payloads carried under them

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Comma-separated `plugin[@ifname]` or `name:ifname` tokens
pub const CNI_ANNOTATION: &str = "cni";
/// Comma-separated logical network references with optional `:ifname`
pub const NETWORKS_ANNOTATION: &str = "networks";
/// Standard multi-network selection annotation
pub const NETWORK_SELECTION_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";
/// Standard network status annotation (written)
pub const NETWORK_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/network-status";
/// Legacy multi-IP status annotation (written when already present on the pod)
pub const MULTI_IP_PREFERENCES_ANNOTATION: &str = "multi-ip-preferences";

/// A single element of the standard network selection annotation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSelectionElement {
    /// Name of the NetworkAttachmentDefinition
    pub name: String,

    /// Namespace of the NetworkAttachmentDefinition (defaults to the pod namespace)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Requested IP addresses
    #[serde(default, rename = "ips", skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,

    /// Requested MAC address
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,

    /// Requested interface name inside the pod
    #[serde(default, rename = "interface", skip_serializing_if = "String::is_empty")]
    pub interface: String,
}

/// DNS settings as reported by a CNI result
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dns {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Dns {
    pub fn is_empty(&self) -> bool {
        self.nameservers.is_empty()
            && self.domain.is_none()
            && self.search.is_empty()
            && self.options.is_empty()
    }
}

/// One element of the network status annotation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interface: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,

    #[serde(default)]
    pub default: bool,

    #[serde(default, skip_serializing_if = "Dns::is_empty")]
    pub dns: Dns,
}

/// Legacy per-pod multi-IP status
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiIpPreferences {
    #[serde(rename = "multi-entry", alias = "multi_entry", default)]
    pub multi_entry: u32,

    /// Keyed `ip1`, `ip2`, … in attachment order
    #[serde(default)]
    pub ips: BTreeMap<String, IpAddressPreference>,
}

/// One entry of the legacy multi-IP status
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddressPreference {
    pub ip: String,

    #[serde(rename = "interfaces", alias = "interface")]
    pub interfaces: String,
}

impl MultiIpPreferences {
    /// Record the next entry as `ip<N>` and bump the entry count
    pub fn push(&mut self, ip: impl Into<String>, interface: impl Into<String>) {
        self.multi_entry += 1;
        self.ips.insert(
            format!("ip{}", self.multi_entry),
            IpAddressPreference {
                ip: ip.into(),
                interfaces: interface.into(),
            },
        );
    }
}
