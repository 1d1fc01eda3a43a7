use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// NetworkAttachmentDefinition selects a CNI configuration for an additional
/// pod interface, either inline or by name from the CNI configuration directory
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "k8s.cni.cncf.io",
    version = "v1",
    kind = "NetworkAttachmentDefinition",
    plural = "network-attachment-definitions",
    shortname = "net-attach-def",
    namespaced,
    derive = "Default",
)]
pub struct NetworkAttachmentDefinitionSpec {
    /// CNI conf or conflist JSON. When empty, the configuration named after
    /// the resource is loaded from the CNI directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

impl NetworkAttachmentDefinitionSpec {
    pub fn inline_config(&self) -> Option<&str> {
        self.config
            .as_deref()
            .filter(|config| !config.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inline_config() {
        let json = r#"{
            "apiVersion": "k8s.cni.cncf.io/v1",
            "kind": "NetworkAttachmentDefinition",
            "metadata": {"name": "weave", "namespace": "network"},
            "spec": {"config": "{\"cniVersion\": \"0.3.0\", \"type\": \"weave-net\"}"}
        }"#;

        let nad: NetworkAttachmentDefinition = serde_json::from_str(json).unwrap();
        assert!(nad.spec.inline_config().unwrap().contains("weave-net"));
    }

    #[test]
    fn test_missing_spec_means_file_lookup() {
        let json = r#"{
            "apiVersion": "k8s.cni.cncf.io/v1",
            "kind": "NetworkAttachmentDefinition",
            "metadata": {"name": "flannel-conf"},
            "spec": {"config": "  "}
        }"#;

        let nad: NetworkAttachmentDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(nad.spec.inline_config(), None);
    }
}
