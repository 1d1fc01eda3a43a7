//! Choice of the plugin for pods that express no networking intent

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cnidir::CniDir;
use crate::conflist::ConfList;
use crate::error::Result;
use crate::netconf::GenieConf;

/// What a selector may look at
pub struct SelectionContext<'a> {
    pub conf: &'a GenieConf,
    pub cni_dir: &'a CniDir,
}

#[async_trait]
pub trait DefaultSelector: Send + Sync {
    async fn pick(&self, ctx: &SelectionContext<'_>) -> Result<String>;

    /// Dynamic choices are recorded in the pod's `cni` annotation so that
    /// DEL tears down what ADD set up
    fn is_dynamic(&self) -> bool {
        false
    }
}

/// `default_plugin` from the netconf, else the built-in default
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredDefault;

#[async_trait]
impl DefaultSelector for ConfiguredDefault {
    async fn pick(&self, ctx: &SelectionContext<'_>) -> Result<String> {
        Ok(ctx.conf.default_plugin().to_string())
    }
}

/// Picks the installed plugin whose host interfaces carry the least traffic,
/// as reported by the node's cAdvisor
pub struct UsageSelector {
    client: reqwest::Client,
    base_url: String,
    num_stats: u32,
}

#[derive(Debug, Serialize)]
struct ContainerInfoRequest {
    num_stats: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerInfo {
    #[serde(default)]
    stats: Vec<ContainerStats>,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerStats {
    #[serde(default)]
    network: NetworkStats,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkStats {
    #[serde(default)]
    interfaces: Vec<InterfaceStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterfaceStats {
    pub name: String,
    #[serde(default)]
    pub rx_bytes: u64,
    #[serde(default)]
    pub tx_bytes: u64,
}

impl UsageSelector {
    pub fn new(cadvisor_addr: &str, num_stats: u32) -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: cadvisor_addr.trim_end_matches('/').to_string(),
            num_stats: if num_stats == 0 { 10 } else { num_stats },
        })
    }

    async fn interface_usage(&self) -> anyhow::Result<Vec<InterfaceStats>> {
        let url = format!("{}/api/v1.3/containers/", self.base_url);
        debug!(url = %url, num_stats = self.num_stats, "Querying cAdvisor");
        let info: ContainerInfo = self
            .client
            .post(&url)
            .json(&ContainerInfoRequest {
                num_stats: self.num_stats,
            })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("cAdvisor query to {} failed", url))?
            .json()
            .await
            .context("undecodable cAdvisor container info")?;
        Ok(info
            .stats
            .into_iter()
            .last()
            .map(|stat| stat.network.interfaces)
            .unwrap_or_default())
    }

    async fn rank(&self, cni_dir: &CniDir) -> anyhow::Result<Option<String>> {
        let candidates = installed_plugins(cni_dir)?;
        if candidates.is_empty() {
            return Ok(None);
        }
        let usage = self.interface_usage().await?;
        Ok(least_used(&candidates, &usage))
    }
}

#[async_trait]
impl DefaultSelector for UsageSelector {
    async fn pick(&self, ctx: &SelectionContext<'_>) -> Result<String> {
        match self.rank(ctx.cni_dir).await {
            Ok(Some(plugin)) => {
                info!(plugin = %plugin, "Selected least used network");
                Ok(plugin)
            }
            Ok(None) => ConfiguredDefault.pick(ctx).await,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Network usage unavailable, using configured default");
                ConfiguredDefault.pick(ctx).await
            }
        }
    }

    fn is_dynamic(&self) -> bool {
        true
    }
}

/// Plugin types configured in the CNI directory, genie excluded
fn installed_plugins(cni_dir: &CniDir) -> Result<Vec<String>> {
    let mut plugins = Vec::new();
    for path in cni_dir.config_files()? {
        let Ok(list) = ConfList::from_file(&path) else {
            continue;
        };
        let plugin = list.primary_type().to_string();
        if plugin != "genie" && !plugins.contains(&plugin) {
            plugins.push(plugin);
        }
    }
    Ok(plugins)
}

/// Candidate whose matching host interfaces carry the least rx+tx bytes.
///
/// An interface belongs to a candidate when its name contains the plugin
/// name; candidates without a matching interface are not ranked.
pub fn least_used(candidates: &[String], usage: &[InterfaceStats]) -> Option<String> {
    let mut traffic: BTreeMap<&str, u64> = BTreeMap::new();
    for iface in usage {
        for plugin in candidates {
            if iface.name.contains(plugin.as_str()) {
                *traffic.entry(plugin.as_str()).or_default() +=
                    iface.rx_bytes.saturating_add(iface.tx_bytes);
            }
        }
    }
    candidates
        .iter()
        .filter_map(|plugin| traffic.get(plugin.as_str()).map(|bytes| (plugin, *bytes)))
        .min_by_key(|(_, bytes)| *bytes)
        .map(|(plugin, _)| plugin.clone())
}
