//! Read access to cluster resources and the single pod write genie performs

use std::collections::BTreeMap;

use async_trait::async_trait;
use genie_api::{LogicalNetwork, NetworkAttachmentDefinition, PhysicalNetwork};
use k8s_openapi::api::core::v1::Pod;

use crate::error::Result;

/// Cluster operations used by the controller
///
/// Lookups of absent objects fail with `PodNotFound` / `CrdNotFound`.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    /// Strategic-merge patch of `metadata.annotations`
    async fn patch_pod_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<()>;

    async fn get_logical_network(&self, namespace: &str, name: &str) -> Result<LogicalNetwork>;

    async fn list_logical_networks(&self, namespace: &str) -> Result<Vec<LogicalNetwork>>;

    async fn get_physical_network(&self, namespace: &str, name: &str) -> Result<PhysicalNetwork>;

    async fn get_net_attach_def(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<NetworkAttachmentDefinition>;
}
