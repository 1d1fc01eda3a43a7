//! Genie API types for Kubernetes integration
//!
//! This library defines the cluster resources consumed by the genie meta plugin:
//! - LogicalNetwork: A plugin and/or subnet carve-out, optionally bound to a physical network
//! - PhysicalNetwork: A shared or dedicated underlay (NIC, outer subnet, plugin)
//! - NetworkAttachmentDefinition: The standard multi-network resource
//!
//! It also carries the pod annotation wire types read and written by the plugin.

pub mod annotations;
pub mod netattach;
pub mod v1;

pub use annotations::{Dns, IpAddressPreference, MultiIpPreferences, NetworkSelectionElement, NetworkStatus};
pub use netattach::NetworkAttachmentDefinition;
pub use v1::{LogicalNetwork, PhysicalNetwork};
