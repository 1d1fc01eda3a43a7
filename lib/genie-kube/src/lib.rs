//! Kubernetes access for genie
pub mod client;
pub mod cluster;

pub use client::{kube_client, kube_config};
pub use cluster::KubeCluster;
