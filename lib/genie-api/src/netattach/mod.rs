//! Network-attachment-definition (k8s.cni.cncf.io/v1)

pub mod network_attachment_definition;

pub use network_attachment_definition::{NetworkAttachmentDefinition, NetworkAttachmentDefinitionSpec};
