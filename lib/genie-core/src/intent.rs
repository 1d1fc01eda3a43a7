//! Pod networking intent
//!
//! Annotations are read in priority order:
//! 1. `k8s.v1.cni.cncf.io/networks`, with the cluster default network on `eth0`
//! 2. `cni`, as `plugin`, `plugin@ifname` or `network:ifname` tokens
//! 3. `networks`, as `network` or `network:ifname` logical network references
//!
//! A non-blank `cni` annotation always wins over `networks`. With none of
//! them set the pod gets a single default attachment.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use genie_api::annotations::{
    NetworkSelectionElement, CNI_ANNOTATION, NETWORKS_ANNOTATION, NETWORK_SELECTION_ANNOTATION,
};
use ipnetwork::IpNetwork;
use regex::Regex;

use crate::builtins;
use crate::cnidir::CniDir;
use crate::error::{GenieError, Result};

const IFNAME_PATTERN: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$";
/// Linux IFNAMSIZ minus the trailing NUL
const MAX_IFNAME_LEN: usize = 15;
/// Interface of the first (default) attachment
pub const DEFAULT_INTERFACE: &str = "eth0";

fn ifname_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(IFNAME_PATTERN).expect("static pattern"))
}

/// EUI-48, EUI-64 or 20-byte InfiniBand address, written as hex octets
/// separated by one of `:` / `-`, or as dotted 16-bit groups
pub fn is_hardware_addr(mac: &str) -> bool {
    let hex = |group: &str, len: usize| {
        group.len() == len && group.bytes().all(|b| b.is_ascii_hexdigit())
    };
    if mac.contains('.') {
        let groups: Vec<&str> = mac.split('.').collect();
        return matches!(groups.len(), 3 | 4 | 10) && groups.iter().all(|g| hex(g, 4));
    }
    let separator = if mac.contains(':') { ':' } else { '-' };
    let octets: Vec<&str> = mac.split(separator).collect();
    matches!(octets.len(), 6 | 8 | 20) && octets.iter().all(|o| hex(o, 2))
}

/// Where the configuration for an attachment comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSource {
    /// A plugin named directly, configured from the CNI directory or a built-in
    Plugin { name: String },
    LogicalNetwork { namespace: String, name: String },
    NetAttachDef { namespace: String, name: String },
    /// The first non-genie network in the CNI directory
    ClusterDefault,
}

impl fmt::Display for AttachmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentSource::Plugin { name } => write!(f, "plugin {}", name),
            AttachmentSource::LogicalNetwork { namespace, name } => {
                write!(f, "logical network {}/{}", namespace, name)
            }
            AttachmentSource::NetAttachDef { namespace, name } => {
                write!(f, "net-attach-def {}/{}", namespace, name)
            }
            AttachmentSource::ClusterDefault => f.write_str("cluster default network"),
        }
    }
}

/// One pod interface backed by one delegate configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRequest {
    pub source: AttachmentSource,

    /// Plugin name; empty until resolved for network references
    pub plugin: String,

    /// Interface inside the sandbox; empty means auto-assign
    pub interface: String,

    pub ips: Vec<String>,

    pub mac: Option<String>,

    /// Extra `CNI_ARGS` pairs for this delegate
    pub args: BTreeMap<String, String>,
}

impl AttachmentRequest {
    pub fn new(source: AttachmentSource) -> Self {
        let plugin = match &source {
            AttachmentSource::Plugin { name } => name.clone(),
            _ => String::new(),
        };
        Self {
            source,
            plugin,
            interface: String::new(),
            ips: Vec::new(),
            mac: None,
            args: BTreeMap::new(),
        }
    }

    pub fn plugin(name: &str) -> Self {
        Self::new(AttachmentSource::Plugin {
            name: name.to_string(),
        })
    }

    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interface = interface.to_string();
        self
    }
}

/// Result of reading the pod's annotations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Requests(Vec<AttachmentRequest>),
    /// No networking annotation; the default selector decides
    Default,
}

pub struct IntentParser<'a> {
    namespace: &'a str,
    cni_dir: &'a CniDir,
}

impl<'a> IntentParser<'a> {
    pub fn new(namespace: &'a str, cni_dir: &'a CniDir) -> Self {
        Self { namespace, cni_dir }
    }

    pub fn parse(&self, annotations: &BTreeMap<String, String>) -> Result<Intent> {
        let mut requests = if let Some(value) = annotation(annotations, NETWORK_SELECTION_ANNOTATION)
        {
            let mut requests =
                vec![AttachmentRequest::new(AttachmentSource::ClusterDefault)
                    .with_interface(DEFAULT_INTERFACE)];
            requests.extend(self.parse_selection(value)?);
            requests
        } else if let Some(value) = annotation(annotations, CNI_ANNOTATION) {
            self.parse_cni(value)?
        } else if let Some(value) = annotation(annotations, NETWORKS_ANNOTATION) {
            self.parse_networks(value)?
        } else {
            return Ok(Intent::Default);
        };

        assign_interfaces(&mut requests)?;
        Ok(Intent::Requests(requests))
    }

    fn parse_selection(&self, value: &str) -> Result<Vec<AttachmentRequest>> {
        let elements: Vec<NetworkSelectionElement> = if value.starts_with('[') {
            serde_json::from_str(value).map_err(|e| {
                GenieError::InvalidAnnotation(format!(
                    "{}: invalid JSON: {}",
                    NETWORK_SELECTION_ANNOTATION, e
                ))
            })?
        } else {
            value
                .split(',')
                .map(|token| parse_selection_token(token.trim()))
                .collect::<Result<_>>()?
        };

        elements
            .into_iter()
            .map(|element| self.selection_request(element))
            .collect()
    }

    fn selection_request(&self, element: NetworkSelectionElement) -> Result<AttachmentRequest> {
        let name = element.name.trim();
        if name.is_empty() {
            return Err(GenieError::InvalidAnnotation(format!(
                "{}: network name is empty",
                NETWORK_SELECTION_ANNOTATION
            )));
        }
        for ip in &element.ips {
            ip.trim().parse::<IpNetwork>().map_err(|_| {
                GenieError::InvalidAnnotation(format!("{}: invalid IP {:?}", name, ip))
            })?;
        }
        let mac = Some(element.mac.trim().to_string()).filter(|m| !m.is_empty());
        if let Some(mac) = &mac {
            if !is_hardware_addr(mac) {
                return Err(GenieError::InvalidAnnotation(format!(
                    "{}: invalid MAC {:?}",
                    name, mac
                )));
            }
        }
        let namespace = match element.namespace.trim() {
            "" => self.namespace.to_string(),
            ns => ns.to_string(),
        };

        let mut request = AttachmentRequest::new(AttachmentSource::NetAttachDef {
            namespace,
            name: name.to_string(),
        })
        .with_interface(element.interface.trim());
        request.ips = element.ips.iter().map(|ip| ip.trim().to_string()).collect();
        request.mac = mac;
        if !request.ips.is_empty() {
            request.args.insert("ips".to_string(), request.ips.join(","));
        }
        if let Some(mac) = &request.mac {
            request.args.insert("mac".to_string(), mac.clone());
        }
        Ok(request)
    }

    fn parse_cni(&self, value: &str) -> Result<Vec<AttachmentRequest>> {
        let mut requests = Vec::new();
        for token in value.split(',').map(str::trim) {
            if token.is_empty() {
                return Err(GenieError::InvalidAnnotation(format!(
                    "{}: empty entry in {:?}",
                    CNI_ANNOTATION, value
                )));
            }
            if token.contains(':') && token.contains('@') {
                return Err(GenieError::InvalidAnnotation(format!(
                    "{}: {:?} mixes ':' and '@'",
                    CNI_ANNOTATION, token
                )));
            }

            if let Some((network, ifname)) = token.split_once(':') {
                requests.push(self.logical_network_request(network, Some(ifname))?);
                continue;
            }

            let (plugin, ifname) = match token.split_once('@') {
                Some((plugin, ifname)) => (plugin.trim(), Some(ifname.trim())),
                None => (token, None),
            };
            if plugin.is_empty() || ifname == Some("") {
                return Err(GenieError::InvalidAnnotation(format!(
                    "{}: malformed entry {:?}",
                    CNI_ANNOTATION, token
                )));
            }
            if !self.plugin_known(plugin)? {
                return Err(GenieError::UnknownPlugin(plugin.to_string()));
            }
            requests
                .push(AttachmentRequest::plugin(plugin).with_interface(ifname.unwrap_or_default()));
        }
        Ok(requests)
    }

    fn parse_networks(&self, value: &str) -> Result<Vec<AttachmentRequest>> {
        value
            .split(',')
            .map(str::trim)
            .map(|token| match token.split_once(':') {
                Some((network, ifname)) => self.logical_network_request(network, Some(ifname)),
                None => self.logical_network_request(token, None),
            })
            .collect()
    }

    fn logical_network_request(
        &self,
        network: &str,
        ifname: Option<&str>,
    ) -> Result<AttachmentRequest> {
        let network = network.trim();
        let ifname = ifname.map(str::trim);
        if network.is_empty() || ifname == Some("") {
            return Err(GenieError::InvalidAnnotation(format!(
                "malformed logical network reference {:?}",
                network
            )));
        }
        Ok(AttachmentRequest::new(AttachmentSource::LogicalNetwork {
            namespace: self.namespace.to_string(),
            name: network.to_string(),
        })
        .with_interface(ifname.unwrap_or_default()))
    }

    /// A config file, a built-in synthesis or at least a binary exists
    fn plugin_known(&self, plugin: &str) -> Result<bool> {
        Ok(self.cni_dir.find_plugin_config(plugin)?.is_some()
            || builtins::is_builtin(plugin)
            || self.cni_dir.find_binary(plugin).is_some())
    }
}

fn annotation<'a>(annotations: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    annotations
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

/// `[namespace/]name[@interface]`
fn parse_selection_token(token: &str) -> Result<NetworkSelectionElement> {
    let malformed = || {
        GenieError::InvalidAnnotation(format!(
            "{}: malformed entry {:?}",
            NETWORK_SELECTION_ANNOTATION, token
        ))
    };

    let (reference, interface) = match token.split_once('@') {
        Some((reference, interface)) if !interface.is_empty() => (reference, interface),
        Some(_) => return Err(malformed()),
        None => (token, ""),
    };
    let (namespace, name) = match reference.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() => (namespace, name),
        Some(_) => return Err(malformed()),
        None => ("", reference),
    };
    if name.is_empty() {
        return Err(malformed());
    }

    Ok(NetworkSelectionElement {
        name: name.to_string(),
        namespace: namespace.to_string(),
        interface: interface.to_string(),
        ..Default::default()
    })
}

/// Validate explicit interface names and fill blanks with the smallest
/// unused `eth<k>`
pub fn assign_interfaces(requests: &mut [AttachmentRequest]) -> Result<()> {
    let mut used = BTreeSet::new();
    for request in requests.iter().filter(|r| !r.interface.is_empty()) {
        validate_ifname(&request.interface)?;
        if !used.insert(request.interface.clone()) {
            return Err(GenieError::InvalidAnnotation(format!(
                "interface {} requested more than once",
                request.interface
            )));
        }
    }

    let mut next = 0;
    for request in requests.iter_mut().filter(|r| r.interface.is_empty()) {
        while used.contains(&format!("eth{}", next)) {
            next += 1;
        }
        request.interface = format!("eth{}", next);
        used.insert(request.interface.clone());
    }
    Ok(())
}

pub fn validate_ifname(ifname: &str) -> Result<()> {
    if ifname.len() > MAX_IFNAME_LEN || !ifname_regex().is_match(ifname) {
        return Err(GenieError::InvalidAnnotation(format!(
            "illegal interface name {:?}",
            ifname
        )));
    }
    Ok(())
}
