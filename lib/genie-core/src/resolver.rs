//! Turns attachment requests into concrete configuration lists

use tracing::{debug, info};

use crate::builtins;
use crate::cluster::ClusterApi;
use crate::cnidir::CniDir;
use crate::conflist::ConfList;
use crate::error::{GenieError, Result};
use crate::intent::{AttachmentRequest, AttachmentSource};
use crate::subnet;

const LOGICAL_NETWORK: &str = "LogicalNetwork";
const PHYSICAL_NETWORK: &str = "PhysicalNetwork";

/// A request with its delegate configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAttachment {
    pub request: AttachmentRequest,
    pub conflist: ConfList,
    /// Subnet forced into the first plugin's ipam
    pub subnet: Option<String>,
}

impl ResolvedAttachment {
    pub fn interface(&self) -> &str {
        &self.request.interface
    }

    pub fn plugin(&self) -> &str {
        &self.request.plugin
    }

    /// Name reported in the network status annotation
    pub fn status_name(&self) -> String {
        match &self.request.source {
            AttachmentSource::NetAttachDef { namespace, name } => format!("{}/{}", namespace, name),
            AttachmentSource::LogicalNetwork { name, .. } => name.clone(),
            AttachmentSource::Plugin { name } => name.clone(),
            AttachmentSource::ClusterDefault => self.conflist.name.clone(),
        }
    }
}

struct LogicalAttachment {
    plugin: String,
    conflist: ConfList,
    subnet: Option<String>,
}

pub struct Resolver<'a> {
    cluster: Option<&'a dyn ClusterApi>,
    cni_dir: &'a CniDir,
    default_plugin: &'a str,
    persist_synthesized: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(
        cluster: Option<&'a dyn ClusterApi>,
        cni_dir: &'a CniDir,
        default_plugin: &'a str,
        persist_synthesized: bool,
    ) -> Self {
        Self {
            cluster,
            cni_dir,
            default_plugin,
            persist_synthesized,
        }
    }

    /// Network references need the API server
    fn cluster(&self) -> Result<&'a dyn ClusterApi> {
        self.cluster.ok_or_else(|| {
            GenieError::InvalidEnvelope(
                "network resources requested without a Kubernetes pod in CNI_ARGS".to_string(),
            )
        })
    }

    pub async fn resolve_all(
        &self,
        requests: Vec<AttachmentRequest>,
    ) -> Result<Vec<ResolvedAttachment>> {
        let mut resolved = Vec::with_capacity(requests.len());
        for request in requests {
            resolved.push(self.resolve(request).await?);
        }
        Ok(resolved)
    }

    pub async fn resolve(&self, mut request: AttachmentRequest) -> Result<ResolvedAttachment> {
        debug!(source = %request.source, interface = %request.interface, "Resolving attachment");

        let (conflist, subnet) = match request.source.clone() {
            AttachmentSource::Plugin { name } => (self.plugin_conflist(&name)?, None),
            AttachmentSource::ClusterDefault => match self.cni_dir.cluster_default()? {
                Some(list) => (list, None),
                None => {
                    request.plugin = self.default_plugin.to_string();
                    (self.plugin_conflist(self.default_plugin)?, None)
                }
            },
            AttachmentSource::NetAttachDef { namespace, name } => {
                (self.net_attach_def_conflist(&namespace, &name).await?, None)
            }
            AttachmentSource::LogicalNetwork { namespace, name } => {
                let network = self.logical_network_conflist(&namespace, &name).await?;
                request.plugin = network.plugin;
                (network.conflist, network.subnet)
            }
        };

        if request.plugin.is_empty() {
            request.plugin = conflist.primary_type().to_string();
        }
        Ok(ResolvedAttachment {
            request,
            conflist,
            subnet,
        })
    }

    /// Config file matching the plugin, else a synthesized built-in
    pub fn plugin_conflist(&self, plugin: &str) -> Result<ConfList> {
        if let Some(path) = self.cni_dir.find_plugin_config(plugin)? {
            debug!(plugin, path = %path.display(), "Using CNI config from disk");
            return ConfList::from_file(&path);
        }

        let Some(conf) = builtins::synthesize(plugin) else {
            return Err(GenieError::UnknownPlugin(plugin.to_string()));
        };
        if self.cni_dir.find_binary(plugin).is_none() {
            return Err(GenieError::PluginBinaryMissing {
                plugin: plugin.to_string(),
                dir: self
                    .cni_dir
                    .bin_dirs()
                    .iter()
                    .map(|d| d.display().to_string())
                    .collect::<Vec<_>>()
                    .join(":"),
            });
        }

        if self.persist_synthesized {
            let path = self
                .cni_dir
                .write_conf(&builtins::file_name(plugin), &conf)?;
            info!(plugin, path = %path.display(), "Wrote built-in CNI config");
        }
        match conf {
            serde_json::Value::Object(conf) => ConfList::from_conf(conf),
            _ => Err(GenieError::InvalidConfig(format!(
                "built-in config for {} is not an object",
                plugin
            ))),
        }
    }

    async fn net_attach_def_conflist(&self, namespace: &str, name: &str) -> Result<ConfList> {
        let nad = self.cluster()?.get_net_attach_def(namespace, name).await?;
        if let Some(config) = nad.spec.inline_config() {
            return ConfList::parse_any(config.as_bytes(), name);
        }
        self.cni_dir.load_by_name(name)?.ok_or_else(|| {
            GenieError::InvalidConfig(format!(
                "net-attach-def {}/{} has no config and no network named {} exists in {}",
                namespace,
                name,
                name,
                self.cni_dir.net_dir().display()
            ))
        })
    }

    async fn logical_network_conflist(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<LogicalAttachment> {
        let logical = self.cluster()?.get_logical_network(namespace, name).await?;
        let mut plugin = logical.spec.plugin().map(str::to_string);
        let mut subnet = logical.spec.sub_subnet().map(str::to_string);
        let mut nic = None;

        if let Some(physical_name) = logical.spec.physical_net() {
            if physical_name == name {
                return Err(GenieError::invalid_crd(
                    LOGICAL_NETWORK,
                    namespace,
                    name,
                    "refers to itself as its physical network",
                ));
            }
            let physical = self
                .cluster()?
                .get_physical_network(namespace, physical_name)
                .await?;

            if physical.spec.is_dedicated() {
                let owner = physical.spec.plugin().ok_or_else(|| {
                    GenieError::invalid_crd(
                        PHYSICAL_NETWORK,
                        namespace,
                        physical_name,
                        "dedicated network names no plugin",
                    )
                })?;
                if let Some(requested) = plugin.as_deref().filter(|p| *p != owner) {
                    return Err(GenieError::invalid_crd(
                        LOGICAL_NETWORK,
                        namespace,
                        name,
                        format!(
                            "plugin {} conflicts with {} dedicated to {}",
                            requested, physical_name, owner
                        ),
                    ));
                }
                if plugin.is_none() {
                    plugin = Some(owner.to_string());
                }

                if let Some(outer) = physical.spec.subnet() {
                    match &subnet {
                        Some(inner) => {
                            check_contained(namespace, name, physical_name, inner, outer)?
                        }
                        None => subnet = Some(outer.to_string()),
                    }
                }
            } else if plugin.is_none() || subnet.is_none() {
                return Err(GenieError::invalid_crd(
                    LOGICAL_NETWORK,
                    namespace,
                    name,
                    format!("plugin and sub_subnet are required on shared network {}", physical_name),
                ));
            }

            if let Some(own) = logical.spec.sub_subnet() {
                self.check_siblings(namespace, name, physical_name, own)
                    .await?;
            }
            nic = physical.spec.refer_nic().map(str::to_string);
        }

        let plugin = plugin.ok_or_else(|| {
            GenieError::invalid_crd(LOGICAL_NETWORK, namespace, name, "no plugin")
        })?;
        if let Some(subnet) = &subnet {
            subnet::parse_cidr(subnet).map_err(|reason| {
                GenieError::invalid_crd(LOGICAL_NETWORK, namespace, name, reason)
            })?;
        }

        let mut conflist = self.plugin_conflist(&plugin)?;
        if let Some(subnet) = &subnet {
            conflist.set_subnet(subnet);
        }
        if let Some(nic) = &nic {
            if conflist.set_master(nic) {
                debug!(network = name, nic = %nic, "Bound delegate to physical NIC");
            }
        }
        Ok(LogicalAttachment {
            plugin,
            conflist,
            subnet,
        })
    }

    async fn check_siblings(
        &self,
        namespace: &str,
        name: &str,
        physical_name: &str,
        own: &str,
    ) -> Result<()> {
        let own_net = subnet::parse_cidr(own)
            .map_err(|reason| GenieError::invalid_crd(LOGICAL_NETWORK, namespace, name, reason))?;

        for sibling in self.cluster()?.list_logical_networks(namespace).await? {
            let sibling_name = sibling.metadata.name.as_deref().unwrap_or_default();
            if sibling_name == name || sibling.spec.physical_net() != Some(physical_name) {
                continue;
            }
            let Some(other) = sibling.spec.sub_subnet() else {
                continue;
            };
            // a malformed sibling is reported when it is itself resolved
            let Ok(other_net) = subnet::parse_cidr(other) else {
                continue;
            };
            if subnet::overlaps(&own_net, &other_net) {
                return Err(GenieError::invalid_crd(
                    LOGICAL_NETWORK,
                    namespace,
                    name,
                    format!("subnet {} overlaps {} of {}", own, other, sibling_name),
                ));
            }
        }
        Ok(())
    }
}

fn check_contained(
    namespace: &str,
    name: &str,
    physical_name: &str,
    inner: &str,
    outer: &str,
) -> Result<()> {
    let inner_net = subnet::parse_cidr(inner)
        .map_err(|reason| GenieError::invalid_crd(LOGICAL_NETWORK, namespace, name, reason))?;
    let outer_net = subnet::parse_cidr(outer).map_err(|reason| {
        GenieError::invalid_crd(PHYSICAL_NETWORK, namespace, physical_name, reason)
    })?;
    if !subnet::contains(&outer_net, &inner_net) {
        return Err(GenieError::invalid_crd(
            LOGICAL_NETWORK,
            namespace,
            name,
            format!("subnet {} is not within {} of {}", inner, outer, physical_name),
        ));
    }
    Ok(())
}
