/// API version v1 for the genie logical/physical network CRDs

pub mod logical_network;
pub mod physical_network;

pub use logical_network::{LogicalNetwork, LogicalNetworkSpec};
pub use physical_network::{PhysicalNetwork, PhysicalNetworkSpec, SharedStatus};

/// Returns `Some` for a non-blank value, trimmed
pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
