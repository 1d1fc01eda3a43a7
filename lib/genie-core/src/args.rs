//! CNI invocation envelope
//!
//! The runtime passes the invocation through `CNI_*` environment variables
//! and the network configuration on stdin.

use std::fmt;
use std::path::PathBuf;

use crate::error::{GenieError, Result};

/// CNI command carried in `CNI_COMMAND`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CniCommand {
    Add,
    Del,
    Check,
    Version,
}

impl CniCommand {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "ADD" => Ok(CniCommand::Add),
            "DEL" => Ok(CniCommand::Del),
            "CHECK" => Ok(CniCommand::Check),
            "VERSION" => Ok(CniCommand::Version),
            other => Err(GenieError::InvalidEnvelope(format!(
                "unknown CNI_COMMAND {:?}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CniCommand::Add => "ADD",
            CniCommand::Del => "DEL",
            CniCommand::Check => "CHECK",
            CniCommand::Version => "VERSION",
        }
    }
}

impl fmt::Display for CniCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded CNI envelope
#[derive(Debug, Clone)]
pub struct CniArgs {
    pub command: CniCommand,
    pub container_id: String,
    pub netns: String,
    pub ifname: String,
    pub args: String,
    pub path: Vec<PathBuf>,
    pub stdin: Vec<u8>,
}

impl CniArgs {
    /// Decode the envelope from the process environment
    pub fn from_env(stdin: Vec<u8>) -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), stdin)
    }

    /// Decode the envelope from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F, stdin: Vec<u8>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let command = lookup("CNI_COMMAND")
            .ok_or_else(|| GenieError::InvalidEnvelope("CNI_COMMAND is not set".to_string()))?;
        let command = CniCommand::parse(command.trim())?;

        let var = |key: &str| lookup(key).unwrap_or_default().trim().to_string();
        let container_id = var("CNI_CONTAINERID");
        let netns = var("CNI_NETNS");
        let ifname = match var("CNI_IFNAME") {
            name if name.is_empty() => "eth0".to_string(),
            name => name,
        };
        let path = var("CNI_PATH")
            .split(':')
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .collect();

        if command != CniCommand::Version {
            if container_id.is_empty() {
                return Err(GenieError::InvalidEnvelope(
                    "CNI_CONTAINERID is not set".to_string(),
                ));
            }
            if command != CniCommand::Del && netns.is_empty() {
                return Err(GenieError::InvalidEnvelope("CNI_NETNS is not set".to_string()));
            }
            if stdin.iter().all(u8::is_ascii_whitespace) {
                return Err(GenieError::InvalidEnvelope(
                    "network configuration missing on stdin".to_string(),
                ));
            }
        }

        Ok(Self {
            command,
            container_id,
            netns,
            ifname,
            args: var("CNI_ARGS"),
            path,
            stdin,
        })
    }

    pub fn k8s_args(&self) -> Result<K8sArgs> {
        K8sArgs::parse(&self.args)
    }

    /// `CNI_ARGS` as ordered `(key, value)` pairs, malformed pairs dropped
    pub fn arg_pairs(&self) -> Vec<(String, String)> {
        self.args
            .split(';')
            .map(str::trim)
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// Kubernetes identity passed through `CNI_ARGS`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct K8sArgs {
    pub pod_name: Option<String>,
    pub pod_namespace: Option<String>,
}

impl K8sArgs {
    /// Parse `K=V;K=V` pairs. Unknown keys are rejected unless
    /// `IgnoreUnknown` is set to a true value.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parsed = K8sArgs::default();
        let mut ignore_unknown = false;
        let mut unknown = Vec::new();

        for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                GenieError::InvalidEnvelope(format!("invalid CNI_ARGS pair {:?}", pair))
            })?;
            let value = Some(value.to_string()).filter(|v| !v.is_empty());
            match key {
                "K8S_POD_NAME" => parsed.pod_name = value,
                "K8S_POD_NAMESPACE" => parsed.pod_namespace = value,
                // passed through to delegates untouched
                "K8S_POD_INFRA_CONTAINER_ID" | "K8S_POD_UID" => {}
                "IgnoreUnknown" => {
                    ignore_unknown = matches!(
                        value.as_deref().map(str::to_ascii_lowercase).as_deref(),
                        Some("1") | Some("true")
                    )
                }
                other => unknown.push(other.to_string()),
            }
        }

        if !ignore_unknown && !unknown.is_empty() {
            return Err(GenieError::InvalidEnvelope(format!(
                "unknown CNI_ARGS keys: {}",
                unknown.join(", ")
            )));
        }
        Ok(parsed)
    }

    /// Namespace and name, when the invocation is for a Kubernetes pod
    pub fn pod(&self) -> Option<(&str, &str)> {
        let name = self.pod_name.as_deref()?;
        Some((self.pod_namespace.as_deref().unwrap_or("default"), name))
    }
}
