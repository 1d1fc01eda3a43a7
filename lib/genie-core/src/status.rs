//! Per-interface status written back to the pod

use std::collections::BTreeMap;

use genie_api::annotations::{
    MultiIpPreferences, NetworkStatus, MULTI_IP_PREFERENCES_ANNOTATION, NETWORK_STATUS_ANNOTATION,
};
use tracing::{debug, info, warn};

use crate::cluster::ClusterApi;
use crate::error::{GenieError, Result};
use crate::resolver::ResolvedAttachment;
use crate::result::CniResult;

/// One status entry per attachment; the first is the default network
pub fn network_status(attachments: &[ResolvedAttachment], results: &[CniResult]) -> Vec<NetworkStatus> {
    attachments
        .iter()
        .zip(results)
        .enumerate()
        .map(|(n, (attachment, result))| NetworkStatus {
            name: attachment.status_name(),
            interface: attachment.interface().to_string(),
            ips: result.addresses(),
            mac: result
                .mac_for(attachment.interface())
                .unwrap_or_default()
                .to_string(),
            default: n == 0,
            dns: result.dns.clone(),
        })
        .collect()
}

/// Legacy multi-IP status: `existing` extended by one entry per attachment
///
/// Attachments without an address still take an entry, with an empty `ip`.
pub fn multi_ip_preferences(
    existing: Option<&str>,
    attachments: &[ResolvedAttachment],
    results: &[CniResult],
) -> MultiIpPreferences {
    let mut prefs = match existing.map(serde_json::from_str::<MultiIpPreferences>) {
        Some(Ok(prefs)) => prefs,
        Some(Err(e)) => {
            warn!(error = %e, "Unreadable multi-IP annotation, starting over");
            MultiIpPreferences::default()
        }
        None => MultiIpPreferences::default(),
    };
    for (attachment, result) in attachments.iter().zip(results) {
        let ip = result.first_address().unwrap_or_default();
        if ip.is_empty() {
            debug!(interface = attachment.interface(), "No IP in result");
        }
        prefs.push(ip, attachment.interface());
    }
    prefs
}

/// Annotations describing a successful ADD
///
/// The legacy multi-IP annotation is only maintained on pods that already
/// carry it.
pub fn status_annotations(
    pod_annotations: &BTreeMap<String, String>,
    attachments: &[ResolvedAttachment],
    results: &[CniResult],
) -> Result<BTreeMap<String, String>> {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        NETWORK_STATUS_ANNOTATION.to_string(),
        serde_json::to_string_pretty(&network_status(attachments, results))?,
    );
    if let Some(existing) = pod_annotations.get(MULTI_IP_PREFERENCES_ANNOTATION) {
        annotations.insert(
            MULTI_IP_PREFERENCES_ANNOTATION.to_string(),
            serde_json::to_string(&multi_ip_preferences(Some(existing), attachments, results))?,
        );
    }
    Ok(annotations)
}

/// Apply `annotations` with one strategic-merge patch; failures are logged only
pub async fn write_status(
    cluster: &dyn ClusterApi,
    namespace: &str,
    name: &str,
    annotations: BTreeMap<String, String>,
) {
    let keys: Vec<String> = annotations.keys().cloned().collect();
    match cluster
        .patch_pod_annotations(namespace, name, annotations)
        .await
    {
        Ok(()) => info!(pod = %format!("{}/{}", namespace, name), ?keys, "Updated pod network status"),
        Err(e) => {
            let e = match e {
                GenieError::PatchFailed(_) => e,
                other => GenieError::PatchFailed(other.to_string()),
            };
            warn!(pod = %format!("{}/{}", namespace, name), error = %e, "Pod status not written");
        }
    }
}
