//! CNI result types
//!
//! See: https://github.com/containernetworking/cni/blob/spec-v1.0.0/SPEC.md#success

use genie_api::annotations::Dns;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GenieError, Result};

/// CNI ADD result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CniResult {
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<IpConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,

    #[serde(default, skip_serializing_if = "Dns::is_empty")]
    pub dns: Dns,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,

    /// Network namespace path; empty for host interfaces
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sandbox: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpConfig {
    /// "4" or "6"; dropped from 1.0.0 results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// CIDR notation (e.g., "10.0.0.5/24")
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// Index into `interfaces`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub dst: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<String>,
}

/// 0.2.0 `ip4` / `ip6` block
#[derive(Deserialize)]
struct LegacyIp {
    ip: String,
    #[serde(default)]
    gateway: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

impl CniResult {
    /// Decode a delegate's stdout, normalising 0.2.0 `ip4`/`ip6` results
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut value: Value = serde_json::from_slice(bytes)?;
        let mut legacy = Vec::new();
        if let Value::Object(obj) = &mut value {
            for (key, version) in [("ip4", "4"), ("ip6", "6")] {
                if let Some(block) = obj.remove(key) {
                    legacy.push((version, serde_json::from_value::<LegacyIp>(block)?));
                }
            }
        } else {
            return Err(GenieError::InvalidConfig(
                "delegate result is not a JSON object".to_string(),
            ));
        }

        let mut result: CniResult = serde_json::from_value(value)?;
        for (version, ip) in legacy {
            result.ips.push(IpConfig {
                version: Some(version.to_string()),
                address: ip.ip,
                gateway: ip.gateway,
                interface: None,
            });
            result.routes.extend(ip.routes);
        }
        Ok(result)
    }

    /// Aggregate per-attachment results in attachment order
    ///
    /// Interfaces and routes are concatenated, IP interface indices are
    /// rebased onto the merged interface list and DNS comes from the first
    /// (default) attachment.
    pub fn merge<'a>(results: impl IntoIterator<Item = &'a CniResult>, cni_version: &str) -> Self {
        let mut merged = CniResult {
            cni_version: cni_version.to_string(),
            ..Default::default()
        };
        for (n, result) in results.into_iter().enumerate() {
            let offset = merged.interfaces.len();
            merged.interfaces.extend(result.interfaces.iter().cloned());
            merged.ips.extend(result.ips.iter().map(|ip| IpConfig {
                interface: ip.interface.map(|idx| idx + offset),
                ..ip.clone()
            }));
            merged.routes.extend(result.routes.iter().cloned());
            if n == 0 {
                merged.dns = result.dns.clone();
            }
        }
        merged
    }

    /// Render for the runtime in the requested result version
    pub fn to_output(&self, cni_version: &str) -> Result<Vec<u8>> {
        let mut out = self.clone();
        out.cni_version = cni_version.to_string();
        let legacy = cni_version.starts_with("0.");
        for ip in &mut out.ips {
            if legacy {
                if ip.version.is_none() {
                    ip.version = Some(ip_version(&ip.address).to_string());
                }
            } else {
                ip.version = None;
            }
        }
        Ok(serde_json::to_vec(&out)?)
    }

    /// Addresses without their prefix length
    pub fn addresses(&self) -> Vec<String> {
        self.ips
            .iter()
            .map(|ip| strip_prefix_len(&ip.address).to_string())
            .collect()
    }

    pub fn first_address(&self) -> Option<String> {
        self.ips
            .first()
            .map(|ip| strip_prefix_len(&ip.address).to_string())
    }

    /// MAC of the sandbox interface named `ifname`
    pub fn mac_for(&self, ifname: &str) -> Option<&str> {
        self.interfaces
            .iter()
            .find(|iface| iface.name == ifname && !iface.mac.is_empty())
            .map(|iface| iface.mac.as_str())
    }
}

fn strip_prefix_len(address: &str) -> &str {
    address.split('/').next().unwrap_or(address)
}

fn ip_version(address: &str) -> &'static str {
    if strip_prefix_len(address).contains(':') {
        "6"
    } else {
        "4"
    }
}
