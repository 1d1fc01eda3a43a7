//! In-memory cluster and delegate fakes that record every call

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use genie_api::netattach::NetworkAttachmentDefinitionSpec;
use genie_api::v1::{LogicalNetworkSpec, PhysicalNetworkSpec, SharedStatus};
use genie_api::{LogicalNetwork, NetworkAttachmentDefinition, PhysicalNetwork};
use k8s_openapi::api::core::v1::Pod;
use kube::api::ObjectMeta;
use serde_json::json;

use crate::args::CniCommand;
use crate::cluster::ClusterApi;
use crate::delegate::{DelegateExec, RuntimeConf};
use crate::error::{CniError, GenieError, Result};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

pub fn pod(namespace: &str, name: &str, annotations: &[(&str, &str)]) -> Pod {
    let mut metadata = meta(namespace, name);
    metadata.annotations = Some(
        annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    Pod {
        metadata,
        ..Default::default()
    }
}

pub fn logical_network(
    namespace: &str,
    name: &str,
    plugin: Option<&str>,
    physical_net: Option<&str>,
    sub_subnet: Option<&str>,
) -> LogicalNetwork {
    LogicalNetwork {
        metadata: meta(namespace, name),
        spec: LogicalNetworkSpec {
            physical_net: physical_net.map(str::to_string),
            sub_subnet: sub_subnet.map(str::to_string),
            plugin: plugin.map(str::to_string),
        },
    }
}

pub fn physical_network(
    namespace: &str,
    name: &str,
    refer_nic: &str,
    dedicated: bool,
    plugin: Option<&str>,
    subnet: Option<&str>,
) -> PhysicalNetwork {
    PhysicalNetwork {
        metadata: meta(namespace, name),
        spec: PhysicalNetworkSpec {
            refer_nic: refer_nic.to_string(),
            shared_status: SharedStatus {
                plugin: plugin.map(str::to_string),
                subnet: subnet.map(str::to_string),
                dedicated,
            },
        },
    }
}

pub fn net_attach_def(namespace: &str, name: &str, config: Option<&str>) -> NetworkAttachmentDefinition {
    NetworkAttachmentDefinition {
        metadata: meta(namespace, name),
        spec: NetworkAttachmentDefinitionSpec {
            config: config.map(str::to_string),
        },
    }
}

#[derive(Default)]
pub struct FakeCluster {
    pods: Mutex<HashMap<Key, Pod>>,
    logical: Mutex<Vec<LogicalNetwork>>,
    physical: Mutex<HashMap<Key, PhysicalNetwork>>,
    nads: Mutex<HashMap<Key, NetworkAttachmentDefinition>>,
    patches: Mutex<Vec<(Key, BTreeMap<String, String>)>>,
    fail_patches: Mutex<bool>,
}

impl FakeCluster {
    pub fn add_pod(&self, pod: Pod) {
        let k = key(
            pod.metadata.namespace.as_deref().unwrap_or_default(),
            pod.metadata.name.as_deref().unwrap_or_default(),
        );
        self.pods.lock().unwrap().insert(k, pod);
    }

    pub fn add_logical_network(&self, network: LogicalNetwork) {
        self.logical.lock().unwrap().push(network);
    }

    pub fn add_physical_network(&self, network: PhysicalNetwork) {
        let k = key(
            network.metadata.namespace.as_deref().unwrap_or_default(),
            network.metadata.name.as_deref().unwrap_or_default(),
        );
        self.physical.lock().unwrap().insert(k, network);
    }

    pub fn add_net_attach_def(&self, nad: NetworkAttachmentDefinition) {
        let k = key(
            nad.metadata.namespace.as_deref().unwrap_or_default(),
            nad.metadata.name.as_deref().unwrap_or_default(),
        );
        self.nads.lock().unwrap().insert(k, nad);
    }

    pub fn fail_patches(&self) {
        *self.fail_patches.lock().unwrap() = true;
    }

    pub fn patches(&self) -> Vec<BTreeMap<String, String>> {
        self.patches
            .lock()
            .unwrap()
            .iter()
            .map(|(_, patch)| patch.clone())
            .collect()
    }
}

fn not_found(kind: &'static str, namespace: &str, name: &str) -> GenieError {
    GenieError::CrdNotFound {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.pods
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| GenieError::PodNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn patch_pod_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        if *self.fail_patches.lock().unwrap() {
            return Err(GenieError::PatchFailed("injected failure".to_string()));
        }
        if let Some(pod) = self.pods.lock().unwrap().get_mut(&key(namespace, name)) {
            pod.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .extend(annotations.clone());
        }
        self.patches
            .lock()
            .unwrap()
            .push((key(namespace, name), annotations));
        Ok(())
    }

    async fn get_logical_network(&self, namespace: &str, name: &str) -> Result<LogicalNetwork> {
        self.logical
            .lock()
            .unwrap()
            .iter()
            .find(|n| {
                n.metadata.namespace.as_deref() == Some(namespace)
                    && n.metadata.name.as_deref() == Some(name)
            })
            .cloned()
            .ok_or_else(|| not_found("LogicalNetwork", namespace, name))
    }

    async fn list_logical_networks(&self, namespace: &str) -> Result<Vec<LogicalNetwork>> {
        Ok(self
            .logical
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn get_physical_network(&self, namespace: &str, name: &str) -> Result<PhysicalNetwork> {
        self.physical
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("PhysicalNetwork", namespace, name))
    }

    async fn get_net_attach_def(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<NetworkAttachmentDefinition> {
        self.nads
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("NetworkAttachmentDefinition", namespace, name))
    }
}

/// One recorded plugin execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub command: CniCommand,
    pub plugin_type: String,
    pub ifname: String,
    /// `CNI_ARGS` the plugin would see
    pub cni_args: String,
    pub stdin: serde_json::Value,
}

/// Delegate fake: every ADD succeeds with a generated address unless a
/// failure was injected for the plugin type
#[derive(Default)]
pub struct FakeExec {
    calls: Mutex<Vec<ExecCall>>,
    failures: Mutex<HashMap<(String, CniCommand), CniError>>,
}

impl FakeExec {
    pub fn fail(&self, plugin_type: &str, command: CniCommand, error: CniError) {
        self.failures
            .lock()
            .unwrap()
            .insert((plugin_type.to_string(), command), error);
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().unwrap().clone()
    }

    /// `(command, plugin type, ifname)` of every call
    pub fn summary(&self) -> Vec<(CniCommand, String, String)> {
        self.calls()
            .into_iter()
            .map(|c| (c.command, c.plugin_type, c.ifname))
            .collect()
    }
}

#[async_trait]
impl DelegateExec for FakeExec {
    async fn exec(
        &self,
        plugin_type: &str,
        command: CniCommand,
        runtime: &RuntimeConf,
        stdin: &[u8],
    ) -> Result<Vec<u8>> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(ExecCall {
                command,
                plugin_type: plugin_type.to_string(),
                ifname: runtime.ifname.clone(),
                cni_args: runtime.cni_args(),
                stdin: serde_json::from_slice(stdin).unwrap_or_default(),
            });
            calls.len()
        };

        if let Some(error) = self
            .failures
            .lock()
            .unwrap()
            .get(&(plugin_type.to_string(), command))
        {
            return Err(GenieError::DelegateFailed {
                plugin: plugin_type.to_string(),
                interface: runtime.ifname.clone(),
                source: error.clone(),
            });
        }

        if command != CniCommand::Add {
            return Ok(Vec::new());
        }
        let result = json!({
            "cniVersion": "0.3.1",
            "interfaces": [{
                "name": runtime.ifname,
                "mac": format!("0a:58:0a:00:00:{:02x}", n),
                "sandbox": runtime.netns,
            }],
            "ips": [{"version": "4", "address": format!("10.0.{}.5/24", n), "interface": 0}],
            "dns": {"nameservers": [format!("10.96.0.{}", n)]}
        });
        Ok(serde_json::to_vec(&result)?)
    }
}
