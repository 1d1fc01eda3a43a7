//! Network configuration handed to genie on stdin

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{GenieError, Result};

pub const DEFAULT_CNI_VERSION: &str = "0.3.1";
pub const DEFAULT_NET_DIR: &str = "/etc/cni/net.d";
pub const DEFAULT_BIN_DIR: &str = "/opt/cni/bin";
/// Plugin used when a pod expresses no networking intent
pub const DEFAULT_PLUGIN: &str = "weave";

/// Genie's own netconf
///
/// Unknown keys are ignored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenieConf {
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub plugin_type: String,

    /// Plugin used when the pod has no networking annotations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_plugin: Option<String>,

    #[serde(default)]
    pub kubernetes: KubernetesConf,

    #[serde(default)]
    pub policy: PolicyConf,

    /// Node-local cAdvisor endpoint used by the usage selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cadvisor_addr: Option<String>,

    #[serde(default = "default_num_stats")]
    pub cadvisor_num_stats: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cni_net_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cni_bin_dir: Option<PathBuf>,

    /// Write synthesized built-in configs to the CNI directory
    #[serde(default = "default_true")]
    pub persist_synthesized_configs: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KubernetesConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_api_root: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PolicyConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_api_root: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_client_certificate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_client_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_certificate_authority: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_auth_token: Option<String>,
}

fn default_num_stats() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Default for GenieConf {
    fn default() -> Self {
        Self {
            cni_version: DEFAULT_CNI_VERSION.to_string(),
            name: "genie".to_string(),
            plugin_type: "genie".to_string(),
            default_plugin: None,
            kubernetes: KubernetesConf::default(),
            policy: PolicyConf::default(),
            cadvisor_addr: None,
            cadvisor_num_stats: default_num_stats(),
            cni_net_dir: None,
            cni_bin_dir: None,
            persist_synthesized_configs: true,
        }
    }
}

impl GenieConf {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut conf: GenieConf = serde_json::from_slice(bytes)
            .map_err(|e| GenieError::InvalidEnvelope(format!("invalid netconf on stdin: {}", e)))?;
        if conf.cni_version.trim().is_empty() {
            conf.cni_version = DEFAULT_CNI_VERSION.to_string();
        }
        Ok(conf)
    }

    pub fn default_plugin(&self) -> &str {
        non_blank(&self.default_plugin).unwrap_or(DEFAULT_PLUGIN)
    }

    pub fn net_dir(&self) -> PathBuf {
        self.cni_net_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_NET_DIR))
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.cni_bin_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BIN_DIR))
    }

    pub fn cadvisor_addr(&self) -> Option<&str> {
        non_blank(&self.cadvisor_addr)
    }
}

impl KubernetesConf {
    pub fn kubeconfig(&self) -> Option<&str> {
        non_blank(&self.kubeconfig)
    }

    pub fn api_root(&self) -> Option<&str> {
        non_blank(&self.k8s_api_root)
    }
}

impl PolicyConf {
    /// API root with any `/api/...` suffix removed
    pub fn api_root(&self) -> Option<&str> {
        let root = non_blank(&self.k8s_api_root)?;
        Some(match root.find("/api/") {
            Some(idx) => &root[..idx],
            None => root,
        })
    }

    pub fn client_certificate(&self) -> Option<&str> {
        non_blank(&self.k8s_client_certificate)
    }

    pub fn client_key(&self) -> Option<&str> {
        non_blank(&self.k8s_client_key)
    }

    pub fn certificate_authority(&self) -> Option<&str> {
        non_blank(&self.k8s_certificate_authority)
    }

    pub fn auth_token(&self) -> Option<&str> {
        non_blank(&self.k8s_auth_token)
    }
}
