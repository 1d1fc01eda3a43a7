//! kube-rs backed cluster access

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use genie_api::{LogicalNetwork, NetworkAttachmentDefinition, PhysicalNetwork};
use genie_core::{ClusterApi, GenieConf, GenieError, Result};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

/// ClusterApi over a live API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the kubeconfig and policy settings of `conf`
    pub async fn from_conf(conf: &GenieConf) -> anyhow::Result<Self> {
        Ok(Self::new(crate::client::kube_client(conf).await?))
    }

    async fn get_namespaced<K>(&self, kind: &'static str, namespace: &str, name: &str) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        debug!(kind, namespace, name, "Fetching resource");
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| lookup_error(kind, namespace, name, e))
    }
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(response) if response.code == 404)
}

/// Absent objects and undecodable specs get their own error kinds
fn lookup_error(kind: &'static str, namespace: &str, name: &str, e: kube::Error) -> GenieError {
    if is_not_found(&e) {
        return match kind {
            "Pod" => GenieError::PodNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            _ => GenieError::CrdNotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
        };
    }
    match e {
        kube::Error::SerdeError(err) => GenieError::invalid_crd(kind, namespace, name, err.to_string()),
        other => GenieError::Kubernetes(other),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.get_namespaced("Pod", namespace, name).await
    }

    async fn patch_pod_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "metadata": { "annotations": annotations } });
        api.patch(name, &PatchParams::default(), &Patch::Strategic(&patch))
            .await
            .map_err(|e| GenieError::PatchFailed(format!("{}/{}: {}", namespace, name, e)))?;
        Ok(())
    }

    async fn get_logical_network(&self, namespace: &str, name: &str) -> Result<LogicalNetwork> {
        self.get_namespaced("LogicalNetwork", namespace, name).await
    }

    async fn list_logical_networks(&self, namespace: &str) -> Result<Vec<LogicalNetwork>> {
        let api: Api<LogicalNetwork> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        debug!(namespace, count = list.items.len(), "Listed logical networks");
        Ok(list.items)
    }

    async fn get_physical_network(&self, namespace: &str, name: &str) -> Result<PhysicalNetwork> {
        self.get_namespaced("PhysicalNetwork", namespace, name).await
    }

    async fn get_net_attach_def(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<NetworkAttachmentDefinition> {
        self.get_namespaced("NetworkAttachmentDefinition", namespace, name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "NotFound".to_string(),
            code,
        })
    }

    #[test]
    fn test_not_found_mapping() {
        assert!(matches!(
            lookup_error("Pod", "default", "web", api_error(404)),
            GenieError::PodNotFound { .. }
        ));
        match lookup_error("LogicalNetwork", "test", "net1", api_error(404)) {
            GenieError::CrdNotFound { kind, name, .. } => {
                assert_eq!(kind, "LogicalNetwork");
                assert_eq!(name, "net1");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(matches!(
            lookup_error("Pod", "default", "web", api_error(500)),
            GenieError::Kubernetes(_)
        ));
    }

    #[test]
    fn test_undecodable_resource() {
        let serde_err = serde_json::from_str::<LogicalNetwork>("{").unwrap_err();
        assert!(matches!(
            lookup_error("LogicalNetwork", "test", "net1", kube::Error::SerdeError(serde_err)),
            GenieError::InvalidCrd { .. }
        ));
    }
}
